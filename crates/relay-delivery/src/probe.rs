//! Ad-hoc test sender.
//!
//! Lets an operator verify a subscription's reachability and secret
//! without touching the delivery queue: a synthetic `webhook.test`
//! envelope is signed and POSTed exactly like a real delivery, and the
//! outcome is returned synchronously. Nothing is persisted; this is the
//! one path where a delivery result reaches its caller directly.

use std::sync::Arc;

use bytes::Bytes;
use relay_core::{
    models::{DeliveryId, Envelope, EventType, SubscriptionId},
    time::Clock,
};
use tracing::{debug, info};

use crate::{
    client::{DeliveryClient, DeliveryRequest},
    emitter::DEFAULT_SOURCE,
    signing,
    storage::DeliveryStorage,
};

/// Outcome of an ad-hoc test delivery, reported to the caller.
#[derive(Debug, Clone)]
pub struct TestSendReport {
    /// Whether the endpoint answered with a 2xx.
    pub ok: bool,
    /// HTTP status code, if a response was received.
    pub status_code: Option<u16>,
    /// Response body, if a response was received.
    pub body: Option<String>,
    /// Failure explanation when `ok` is false.
    pub message: Option<String>,
}

impl TestSendReport {
    fn failure(message: impl Into<String>) -> Self {
        Self { ok: false, status_code: None, body: None, message: Some(message.into()) }
    }
}

/// Synchronous single-shot sender for subscription diagnostics.
pub struct TestSender {
    storage: Arc<dyn DeliveryStorage>,
    client: Arc<DeliveryClient>,
    clock: Arc<dyn Clock>,
}

impl TestSender {
    /// Creates a new test sender.
    pub fn new(
        storage: Arc<dyn DeliveryStorage>,
        client: Arc<DeliveryClient>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { storage, client, clock }
    }

    /// Sends one synthetic event to the subscription's endpoint.
    ///
    /// Every failure mode, including an unknown subscription ID, comes
    /// back in the report; this method itself never fails and never
    /// creates or mutates delivery records.
    pub async fn send(&self, subscription_id: SubscriptionId) -> TestSendReport {
        let subscription = match self.storage.find_subscription(subscription_id).await {
            Ok(Some(subscription)) => subscription,
            Ok(None) => {
                return TestSendReport::failure(format!(
                    "subscription {subscription_id} not found"
                ));
            },
            Err(e) => {
                return TestSendReport::failure(format!("subscription lookup failed: {e}"));
            },
        };

        let now = self.clock.now_utc();
        let envelope = Envelope {
            event: EventType::Test,
            source: DEFAULT_SOURCE.to_string(),
            timestamp: now,
            data: serde_json::json!({
                "test": true,
                "message": "webhook connectivity check",
            }),
        };

        let body = match envelope.to_bytes() {
            Ok(body) => body,
            Err(e) => return TestSendReport::failure(format!("envelope serialization failed: {e}")),
        };

        let timestamp = now.timestamp().to_string();
        let request = DeliveryRequest {
            delivery_id: DeliveryId::new(),
            event_type: EventType::Test,
            url: subscription.url.clone(),
            signature: subscription
                .signing_secret()
                .and_then(|secret| signing::signature(secret, &timestamp, &body)),
            body: Bytes::from(body),
            timestamp,
            timeout: subscription.effective_timeout(),
        };

        debug!(subscription_id = %subscription.id, url = %subscription.url, "sending test webhook");

        match self.client.deliver(request).await {
            Ok(response) => {
                info!(
                    subscription_id = %subscription.id,
                    status_code = response.status_code,
                    ok = response.is_success,
                    "test webhook completed"
                );

                let message = if response.is_success {
                    None
                } else {
                    Some(format!("endpoint returned HTTP {}", response.status_code))
                };

                TestSendReport {
                    ok: response.is_success,
                    status_code: Some(response.status_code),
                    body: Some(response.body),
                    message,
                }
            },
            Err(e) => TestSendReport::failure(e.to_string()),
        }
    }
}
