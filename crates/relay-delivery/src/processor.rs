//! Periodic delivery processor.
//!
//! Each tick selects a bounded batch of due records and walks them
//! sequentially. Records are independent units: a failure while processing
//! one is logged and never blocks the rest of the batch, and all outcomes
//! land on the record itself rather than propagating to any caller.
//!
//! There is no claim step before dispatch. A second processor instance
//! could select the same due rows and double-send, which at-least-once
//! delivery tolerates; receivers dedupe on the delivery-id header.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use relay_core::{
    models::{Delivery, Subscription},
    time::Clock,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    backoff,
    client::{DeliveryClient, DeliveryRequest},
    error::{DeliveryError, Result},
    signing,
    storage::DeliveryStorage,
};

/// Configuration for the delivery processor.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Maximum due records processed per tick.
    pub batch_limit: usize,

    /// Interval between ticks.
    pub poll_interval: std::time::Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            batch_limit: crate::DEFAULT_BATCH_LIMIT,
            poll_interval: crate::DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Outcome counters for one processor tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickStats {
    /// Records processed this tick.
    pub processed: usize,
    /// Records that reached `succeeded`.
    pub succeeded: usize,
    /// Records rescheduled for another attempt.
    pub retried: usize,
    /// Records that reached `failed`.
    pub failed: usize,
}

/// Terminal or rescheduled outcome of processing one record.
enum RecordOutcome {
    Succeeded,
    Retried,
    Failed,
}

/// Periodic worker that drives due delivery records to completion.
pub struct DeliveryProcessor {
    storage: Arc<dyn DeliveryStorage>,
    client: Arc<DeliveryClient>,
    clock: Arc<dyn Clock>,
    config: ProcessorConfig,
}

impl DeliveryProcessor {
    /// Creates a new processor.
    pub fn new(
        storage: Arc<dyn DeliveryStorage>,
        client: Arc<DeliveryClient>,
        clock: Arc<dyn Clock>,
        config: ProcessorConfig,
    ) -> Self {
        Self { storage, client, clock, config }
    }

    /// Runs ticks on the configured interval until cancelled.
    pub async fn run(&self, cancellation_token: CancellationToken) {
        info!(
            batch_limit = self.config.batch_limit,
            poll_interval_secs = self.config.poll_interval.as_secs(),
            "delivery processor starting"
        );

        loop {
            if cancellation_token.is_cancelled() {
                break;
            }

            match self.process_due(self.config.batch_limit).await {
                Ok(stats) if stats.processed > 0 => {
                    info!(
                        processed = stats.processed,
                        succeeded = stats.succeeded,
                        retried = stats.retried,
                        failed = stats.failed,
                        "processed due deliveries"
                    );
                },
                Ok(_) => {},
                Err(e) => {
                    error!(error = %e, "delivery tick failed");
                },
            }

            tokio::select! {
                () = self.clock.sleep(self.config.poll_interval) => {}
                () = cancellation_token.cancelled() => break,
            }
        }

        info!("delivery processor stopped");
    }

    /// Processes one batch of due records and returns tick counters.
    ///
    /// # Errors
    ///
    /// Returns error only if the due-record selection itself fails.
    /// Per-record failures are recorded on the record and counted, never
    /// propagated.
    pub async fn process_due(&self, batch_limit: usize) -> Result<TickStats> {
        let now = self.clock.now_utc();
        let due = self
            .storage
            .find_due_deliveries(batch_limit, now)
            .await
            .map_err(|e| DeliveryError::storage(format!("due-record selection failed: {e}")))?;

        debug!(batch = due.len(), "selected due deliveries");

        let mut stats = TickStats::default();
        for delivery in due {
            let delivery_id = delivery.id;
            stats.processed += 1;

            match self.process_record(delivery).await {
                Ok(RecordOutcome::Succeeded) => stats.succeeded += 1,
                Ok(RecordOutcome::Retried) => stats.retried += 1,
                Ok(RecordOutcome::Failed) => stats.failed += 1,
                Err(e) => {
                    // Keep going: one record's bookkeeping failure must not
                    // block the rest of the batch.
                    stats.failed += 1;
                    error!(delivery_id = %delivery_id, error = %e, "record processing failed");
                },
            }
        }

        Ok(stats)
    }

    /// Drives a single record through one delivery attempt.
    async fn process_record(&self, delivery: Delivery) -> Result<RecordOutcome> {
        let subscription = self
            .storage
            .find_subscription(delivery.subscription_id)
            .await
            .map_err(|e| DeliveryError::storage(format!("subscription lookup failed: {e}")))?;

        // A record queued against a since-disabled or deleted subscription
        // reflects stale intent: terminal, and never resurrected even if
        // the subscription comes back.
        let Some(subscription) = subscription.filter(|s| s.enabled) else {
            let now = self.clock.now_utc();
            self.storage
                .mark_failed(
                    delivery.id,
                    delivery.attempts,
                    delivery.last_status_code,
                    "subscription disabled or missing".to_string(),
                    now,
                )
                .await
                .map_err(|e| DeliveryError::storage(e.to_string()))?;

            warn!(
                delivery_id = %delivery.id,
                subscription_id = %delivery.subscription_id,
                "subscription disabled or missing, delivery terminally failed"
            );
            return Ok(RecordOutcome::Failed);
        };

        if delivery.attempts >= subscription.effective_max_attempts() {
            let now = self.clock.now_utc();
            self.storage
                .mark_failed(
                    delivery.id,
                    delivery.attempts,
                    delivery.last_status_code,
                    "max attempts reached".to_string(),
                    now,
                )
                .await
                .map_err(|e| DeliveryError::storage(e.to_string()))?;

            error!(
                delivery_id = %delivery.id,
                attempts = delivery.attempts,
                "attempts exhausted, delivery terminally failed"
            );
            return Ok(RecordOutcome::Failed);
        }

        let attempt_number = delivery.attempts + 1;
        let timestamp = self.clock.now_utc().timestamp().to_string();
        let request = DeliveryRequest {
            delivery_id: delivery.id,
            event_type: delivery.event_type,
            url: subscription.url.clone(),
            body: Bytes::from(delivery.payload.clone()),
            signature: subscription
                .signing_secret()
                .and_then(|secret| signing::signature(secret, &timestamp, &delivery.payload)),
            timestamp,
            timeout: subscription.effective_timeout(),
        };

        debug!(
            delivery_id = %delivery.id,
            subscription_id = %subscription.id,
            attempt = attempt_number,
            url = %subscription.url,
            "attempting webhook delivery"
        );

        match self.client.deliver(request).await {
            Ok(response) if response.is_success => {
                self.storage
                    .mark_succeeded(
                        delivery.id,
                        attempt_number,
                        i32::from(response.status_code),
                        self.clock.now_utc(),
                    )
                    .await
                    .map_err(|e| DeliveryError::storage(e.to_string()))?;

                info!(
                    delivery_id = %delivery.id,
                    subscription_id = %subscription.id,
                    status_code = response.status_code,
                    attempt = attempt_number,
                    duration_ms = response.duration.as_millis(),
                    "webhook delivered"
                );
                Ok(RecordOutcome::Succeeded)
            },
            Ok(response) => {
                self.record_failed_attempt(
                    &delivery,
                    &subscription,
                    attempt_number,
                    Some(i32::from(response.status_code)),
                    response.body,
                )
                .await
            },
            Err(transport_error) => {
                self.record_failed_attempt(
                    &delivery,
                    &subscription,
                    attempt_number,
                    None,
                    transport_error.to_string(),
                )
                .await
            },
        }
    }

    /// Books a failed attempt: reschedule per the backoff table, or fail
    /// terminally once the attempt budget is spent.
    async fn record_failed_attempt(
        &self,
        delivery: &Delivery,
        subscription: &Subscription,
        attempt_number: i32,
        status_code: Option<i32>,
        error: String,
    ) -> Result<RecordOutcome> {
        let now = self.clock.now_utc();

        if attempt_number >= subscription.effective_max_attempts() {
            self.storage
                .mark_failed(delivery.id, attempt_number, status_code, error.clone(), now)
                .await
                .map_err(|e| DeliveryError::storage(e.to_string()))?;

            error!(
                delivery_id = %delivery.id,
                subscription_id = %subscription.id,
                attempt = attempt_number,
                status_code,
                error = %error,
                "delivery permanently failed"
            );
            return Ok(RecordOutcome::Failed);
        }

        let next_attempt_at = next_attempt_time(now, attempt_number);
        self.storage
            .mark_retrying(
                delivery.id,
                attempt_number,
                next_attempt_at,
                status_code,
                error.clone(),
                now,
            )
            .await
            .map_err(|e| DeliveryError::storage(e.to_string()))?;

        warn!(
            delivery_id = %delivery.id,
            subscription_id = %subscription.id,
            attempt = attempt_number,
            status_code,
            next_attempt_at = %next_attempt_at,
            error = %error,
            "delivery failed, retry scheduled"
        );
        Ok(RecordOutcome::Retried)
    }
}

/// Computes when the next attempt becomes due after a failure.
fn next_attempt_time(now: DateTime<Utc>, attempt_number: i32) -> DateTime<Utc> {
    let delay = chrono::Duration::from_std(backoff::delay_for_attempt(attempt_number))
        .unwrap_or_else(|_| chrono::Duration::zero());
    now + delay
}
