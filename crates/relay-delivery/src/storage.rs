//! Storage abstraction layer for the delivery pipeline.
//!
//! Provides trait-based abstractions over storage operations to enable
//! testability without database dependencies. Production uses the concrete
//! `relay_core::storage::Storage` repositories; tests provide the in-memory
//! mock for deterministic behavior validation.

use std::{future::Future, pin::Pin, sync::Arc};

use chrono::{DateTime, Utc};
use relay_core::{
    error::Result,
    models::{Delivery, DeliveryId, EventType, Subscription, SubscriptionId},
};

/// Storage operations required by the emitter, processor, and probe.
///
/// Reads cover the subscription registry's query contract; writes cover the
/// delivery record's full lifecycle. Implementations must preserve the
/// terminal-state guarantee: no update may transition a record out of
/// `succeeded` or `failed`.
pub trait DeliveryStorage: Send + Sync + 'static {
    /// Finds enabled subscriptions registered for an event type.
    fn find_active_subscriptions(
        &self,
        event_type: EventType,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Subscription>>> + Send + '_>>;

    /// Finds a subscription by ID, enabled or not.
    fn find_subscription(
        &self,
        id: SubscriptionId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Subscription>>> + Send + '_>>;

    /// Inserts a batch of freshly-emitted delivery records atomically.
    fn insert_deliveries(
        &self,
        deliveries: Vec<Delivery>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Selects up to `limit` due records, oldest-due first.
    fn find_due_deliveries(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Delivery>>> + Send + '_>>;

    /// Marks a record as successfully delivered. Terminal.
    fn mark_succeeded(
        &self,
        id: DeliveryId,
        attempts: i32,
        status_code: i32,
        at: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Records a failed attempt and schedules the next one.
    fn mark_retrying(
        &self,
        id: DeliveryId,
        attempts: i32,
        next_attempt_at: DateTime<Utc>,
        status_code: Option<i32>,
        error: String,
        at: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Marks a record as permanently failed. Terminal.
    fn mark_failed(
        &self,
        id: DeliveryId,
        attempts: i32,
        status_code: Option<i32>,
        error: String,
        at: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Finds a delivery record by ID.
    fn find_delivery(
        &self,
        id: DeliveryId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Delivery>>> + Send + '_>>;
}

/// Production storage implementation using PostgreSQL.
///
/// Wraps the concrete `relay_core::storage::Storage` repositories behind
/// the `DeliveryStorage` trait.
pub struct PostgresDeliveryStorage {
    storage: Arc<relay_core::storage::Storage>,
}

impl PostgresDeliveryStorage {
    /// Creates a new PostgreSQL storage adapter.
    pub fn new(storage: Arc<relay_core::storage::Storage>) -> Self {
        Self { storage }
    }
}

impl DeliveryStorage for PostgresDeliveryStorage {
    fn find_active_subscriptions(
        &self,
        event_type: EventType,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Subscription>>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.subscriptions.find_active_for(event_type).await })
    }

    fn find_subscription(
        &self,
        id: SubscriptionId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Subscription>>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.subscriptions.find_by_id(id).await })
    }

    fn insert_deliveries(
        &self,
        deliveries: Vec<Delivery>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.deliveries.insert_batch(&deliveries).await })
    }

    fn find_due_deliveries(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Delivery>>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.deliveries.find_due(limit, now).await })
    }

    fn mark_succeeded(
        &self,
        id: DeliveryId,
        attempts: i32,
        status_code: i32,
        at: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.deliveries.mark_succeeded(id, attempts, status_code, at).await })
    }

    fn mark_retrying(
        &self,
        id: DeliveryId,
        attempts: i32,
        next_attempt_at: DateTime<Utc>,
        status_code: Option<i32>,
        error: String,
        at: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move {
            storage
                .deliveries
                .mark_retrying(id, attempts, next_attempt_at, status_code, &error, at)
                .await
        })
    }

    fn mark_failed(
        &self,
        id: DeliveryId,
        attempts: i32,
        status_code: Option<i32>,
        error: String,
        at: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move {
            storage.deliveries.mark_failed(id, attempts, status_code, &error, at).await
        })
    }

    fn find_delivery(
        &self,
        id: DeliveryId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Delivery>>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.deliveries.find_by_id(id).await })
    }
}

pub mod mock {
    //! Mock storage implementation for testing.
    //!
    //! Stores subscriptions and delivery records in-memory with the same
    //! selection and terminal-state semantics as the PostgreSQL layer.
    //! Supports injecting a claim error to exercise the processor's
    //! failure path.

    use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

    use chrono::{DateTime, Utc};
    use relay_core::{error::CoreError, models::DeliveryStatus};
    use tokio::sync::RwLock;

    use super::{
        Delivery, DeliveryId, DeliveryStorage, EventType, Result, Subscription, SubscriptionId,
    };

    /// Mock storage for testing delivery logic without a database.
    #[derive(Default)]
    pub struct MockDeliveryStorage {
        subscriptions: Arc<RwLock<HashMap<SubscriptionId, Subscription>>>,
        deliveries: Arc<RwLock<HashMap<DeliveryId, Delivery>>>,
        claim_error: Arc<RwLock<Option<String>>>,
    }

    impl MockDeliveryStorage {
        /// Creates a new mock storage with empty state.
        pub fn new() -> Self {
            Self::default()
        }

        /// Registers a subscription.
        pub async fn add_subscription(&self, subscription: Subscription) {
            self.subscriptions.write().await.insert(subscription.id, subscription);
        }

        /// Seeds a delivery record directly, bypassing the emitter.
        pub async fn add_delivery(&self, delivery: Delivery) {
            self.deliveries.write().await.insert(delivery.id, delivery);
        }

        /// Injects an error for the next due-record selection.
        pub async fn inject_claim_error(&self, error: impl Into<String>) {
            *self.claim_error.write().await = Some(error.into());
        }

        /// Returns the total number of stored delivery records.
        pub async fn delivery_count(&self) -> usize {
            self.deliveries.read().await.len()
        }

        /// Returns a snapshot of a stored delivery record.
        pub async fn delivery(&self, id: DeliveryId) -> Option<Delivery> {
            self.deliveries.read().await.get(&id).cloned()
        }

        /// Returns all records for a subscription, oldest first.
        pub async fn deliveries_for(&self, subscription_id: SubscriptionId) -> Vec<Delivery> {
            let mut records: Vec<Delivery> = self
                .deliveries
                .read()
                .await
                .values()
                .filter(|d| d.subscription_id == subscription_id)
                .cloned()
                .collect();
            records.sort_by_key(|d| d.created_at);
            records
        }
    }

    impl DeliveryStorage for MockDeliveryStorage {
        fn find_active_subscriptions(
            &self,
            event_type: EventType,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<Subscription>>> + Send + '_>> {
            let subscriptions = self.subscriptions.clone();
            Box::pin(async move {
                let mut matched: Vec<Subscription> = subscriptions
                    .read()
                    .await
                    .values()
                    .filter(|s| s.enabled && s.is_subscribed_to(event_type))
                    .cloned()
                    .collect();
                matched.sort_by_key(|s| s.created_at);
                Ok(matched)
            })
        }

        fn find_subscription(
            &self,
            id: SubscriptionId,
        ) -> Pin<Box<dyn Future<Output = Result<Option<Subscription>>> + Send + '_>> {
            let subscriptions = self.subscriptions.clone();
            Box::pin(async move { Ok(subscriptions.read().await.get(&id).cloned()) })
        }

        fn insert_deliveries(
            &self,
            new_deliveries: Vec<Delivery>,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            let deliveries = self.deliveries.clone();
            Box::pin(async move {
                let mut map = deliveries.write().await;
                for delivery in new_deliveries {
                    map.insert(delivery.id, delivery);
                }
                Ok(())
            })
        }

        fn find_due_deliveries(
            &self,
            limit: usize,
            now: DateTime<Utc>,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<Delivery>>> + Send + '_>> {
            let deliveries = self.deliveries.clone();
            let claim_error = self.claim_error.clone();
            Box::pin(async move {
                if let Some(error) = claim_error.write().await.take() {
                    return Err(CoreError::Database(error));
                }

                let mut due: Vec<Delivery> = deliveries
                    .read()
                    .await
                    .values()
                    .filter(|d| d.is_due(now))
                    .cloned()
                    .collect();
                due.sort_by_key(|d| d.next_attempt_at);
                due.truncate(limit);
                Ok(due)
            })
        }

        fn mark_succeeded(
            &self,
            id: DeliveryId,
            attempts: i32,
            status_code: i32,
            at: DateTime<Utc>,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            let deliveries = self.deliveries.clone();
            Box::pin(async move {
                if let Some(delivery) = deliveries.write().await.get_mut(&id) {
                    if !delivery.status.is_terminal() {
                        delivery.status = DeliveryStatus::Succeeded;
                        delivery.attempts = attempts;
                        delivery.last_attempt_at = Some(at);
                        delivery.last_status_code = Some(status_code);
                        delivery.last_error = None;
                    }
                }
                Ok(())
            })
        }

        fn mark_retrying(
            &self,
            id: DeliveryId,
            attempts: i32,
            next_attempt_at: DateTime<Utc>,
            status_code: Option<i32>,
            error: String,
            at: DateTime<Utc>,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            let deliveries = self.deliveries.clone();
            Box::pin(async move {
                if let Some(delivery) = deliveries.write().await.get_mut(&id) {
                    if !delivery.status.is_terminal() {
                        delivery.status = DeliveryStatus::Retrying;
                        delivery.attempts = attempts;
                        delivery.next_attempt_at = next_attempt_at;
                        delivery.last_attempt_at = Some(at);
                        delivery.last_status_code = status_code;
                        delivery.last_error = Some(error);
                    }
                }
                Ok(())
            })
        }

        fn mark_failed(
            &self,
            id: DeliveryId,
            attempts: i32,
            status_code: Option<i32>,
            error: String,
            at: DateTime<Utc>,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            let deliveries = self.deliveries.clone();
            Box::pin(async move {
                if let Some(delivery) = deliveries.write().await.get_mut(&id) {
                    if !delivery.status.is_terminal() {
                        delivery.status = DeliveryStatus::Failed;
                        delivery.attempts = attempts;
                        delivery.last_attempt_at = Some(at);
                        delivery.last_status_code = status_code;
                        delivery.last_error = Some(error);
                    }
                }
                Ok(())
            })
        }

        fn find_delivery(
            &self,
            id: DeliveryId,
        ) -> Pin<Box<dyn Future<Output = Result<Option<Delivery>>> + Send + '_>> {
            let deliveries = self.deliveries.clone();
            Box::pin(async move { Ok(deliveries.read().await.get(&id).cloned()) })
        }
    }
}
