//! Event fan-out into delivery records.
//!
//! `emit` is the single entry point producers call when a domain event
//! fires. It takes the emission-time snapshot: the set of enabled,
//! subscribed endpoints and the serialized envelope are both captured now,
//! so later registry or domain-object changes never affect queued records.
//!
//! Emission performs no network I/O. It is deliberately decoupled from the
//! business operation that triggered it: callers treat a returned error as
//! log-and-continue, never as a reason to fail the domain operation.

use std::sync::Arc;

use relay_core::{
    models::{Delivery, Envelope, EventType},
    time::Clock,
};
use tracing::{debug, info};

use crate::{
    error::{DeliveryError, Result},
    storage::DeliveryStorage,
};

/// Default envelope source when the producer supplies none.
pub const DEFAULT_SOURCE: &str = "relay";

/// Optional per-emission metadata.
#[derive(Debug, Clone, Default)]
pub struct EmitMetadata {
    /// Logical origin recorded in the envelope, overriding the default.
    pub source: Option<String>,
}

/// Fans domain events out into one delivery record per subscriber.
pub struct EventEmitter {
    storage: Arc<dyn DeliveryStorage>,
    clock: Arc<dyn Clock>,
    source: String,
}

impl EventEmitter {
    /// Creates an emitter with the default envelope source.
    pub fn new(storage: Arc<dyn DeliveryStorage>, clock: Arc<dyn Clock>) -> Self {
        Self::with_source(storage, clock, DEFAULT_SOURCE)
    }

    /// Creates an emitter with a custom default envelope source.
    pub fn with_source(
        storage: Arc<dyn DeliveryStorage>,
        clock: Arc<dyn Clock>,
        source: impl Into<String>,
    ) -> Self {
        Self { storage, clock, source: source.into() }
    }

    /// Queues the event for delivery to every matching subscription.
    ///
    /// One pending record per enabled subscription registered for
    /// `event_type`, all inserted in a single batch and due immediately.
    /// No matching subscriptions is a no-op, not an error. Returns the
    /// number of records created.
    ///
    /// # Errors
    ///
    /// Returns error if the registry read, envelope serialization, or batch
    /// insert fails. Callers log and swallow: delivery problems are never
    /// surfaced through the producing operation.
    pub async fn emit(
        &self,
        event_type: EventType,
        payload: serde_json::Value,
        metadata: Option<EmitMetadata>,
    ) -> Result<usize> {
        let subscriptions = self
            .storage
            .find_active_subscriptions(event_type)
            .await
            .map_err(|e| DeliveryError::storage(format!("subscription lookup failed: {e}")))?;

        if subscriptions.is_empty() {
            debug!(event = %event_type, "no matching subscriptions, skipping fan-out");
            return Ok(0);
        }

        let now = self.clock.now_utc();
        let source = metadata
            .and_then(|m| m.source)
            .unwrap_or_else(|| self.source.clone());

        let envelope = Envelope { event: event_type, source, timestamp: now, data: payload };
        let payload_bytes = envelope
            .to_bytes()
            .map_err(|e| DeliveryError::serialization(e.to_string()))?;

        let deliveries: Vec<Delivery> = subscriptions
            .iter()
            .map(|subscription| {
                Delivery::new(subscription.id, event_type, payload_bytes.clone(), now)
            })
            .collect();

        let created = deliveries.len();
        self.storage
            .insert_deliveries(deliveries)
            .await
            .map_err(|e| DeliveryError::storage(format!("delivery fan-out failed: {e}")))?;

        info!(event = %event_type, subscriptions = created, "event queued for delivery");

        Ok(created)
    }
}
