//! Repository for subscription reads.
//!
//! Subscription lifecycle management lives in the admin API; the pipeline
//! only ever reads. Two queries cover its contract: the enabled-and-
//! subscribed set for an event type at emission time, and a single lookup
//! by ID at processing time.

use std::sync::Arc;

use sqlx::PgPool;

use crate::{
    error::Result,
    models::{EventType, Subscription, SubscriptionId},
};

/// Read-side repository for webhook subscriptions.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Returns a reference to the database pool.
    pub fn pool(&self) -> Arc<PgPool> {
        self.pool.clone()
    }

    /// Finds enabled subscriptions registered for the given event type.
    ///
    /// This is the emission-time snapshot: subscription changes after a
    /// record is queued do not retroactively affect it.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_active_for(&self, event_type: EventType) -> Result<Vec<Subscription>> {
        let subscriptions = sqlx::query_as::<_, Subscription>(
            r"
            SELECT id, name, url, enabled, events, secret,
                   max_attempts, timeout_ms, created_at, updated_at
            FROM subscriptions
            WHERE enabled = TRUE AND $1 = ANY(events)
            ORDER BY created_at ASC
            ",
        )
        .bind(event_type.as_str())
        .fetch_all(&*self.pool)
        .await?;

        Ok(subscriptions)
    }

    /// Finds a subscription by ID, enabled or not.
    ///
    /// The processor needs disabled entries too, to terminally fail their
    /// queued records.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_id(&self, id: SubscriptionId) -> Result<Option<Subscription>> {
        let subscription = sqlx::query_as::<_, Subscription>(
            r"
            SELECT id, name, url, enabled, events, secret,
                   max_attempts, timeout_ms, created_at, updated_at
            FROM subscriptions
            WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(subscription)
    }
}
