//! Repository for delivery-record database operations.
//!
//! Delivery records form the durable work queue of the pipeline: one row
//! per (event, subscription) pair, created in a batch at emission time and
//! driven to a terminal state by the processor. Every state-changing update
//! carries a `status IN ('pending', 'retrying')` guard so terminal rows can
//! never transition again, whatever the caller does.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::{
    error::Result,
    models::{Delivery, DeliveryId, DeliveryStatus, SubscriptionId},
};

const DELIVERY_COLUMNS: &str = "id, subscription_id, event_type, payload, status, attempts, \
                                next_attempt_at, last_attempt_at, last_status_code, last_error, \
                                created_at";

/// Repository for delivery-record database operations.
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

    /// Inserts a batch of freshly-emitted delivery records atomically.
    ///
    /// All rows land or none do, so a storage failure at emission time never
    /// leaves a partially fanned-out event behind.
    ///
    /// # Errors
    ///
    /// Returns error if the transaction or any insert fails.
    pub async fn insert_batch(&self, deliveries: &[Delivery]) -> Result<()> {
        if deliveries.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for delivery in deliveries {
            sqlx::query(
                r"
                INSERT INTO deliveries (
                    id, subscription_id, event_type, payload, status, attempts,
                    next_attempt_at, last_attempt_at, last_status_code, last_error,
                    created_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                ",
            )
            .bind(delivery.id)
            .bind(delivery.subscription_id)
            .bind(delivery.event_type)
            .bind(&delivery.payload)
            .bind(delivery.status)
            .bind(delivery.attempts)
            .bind(delivery.next_attempt_at)
            .bind(delivery.last_attempt_at)
            .bind(delivery.last_status_code)
            .bind(&delivery.last_error)
            .bind(delivery.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(())
    }

    /// Selects up to `limit` due records, oldest-due first.
    ///
    /// A record is due when it is non-terminal and its `next_attempt_at`
    /// has passed. Ordering by `next_attempt_at` gives fairness across
    /// subscribers, not strict FIFO. There is no claim step: a second
    /// processor instance could select the same rows, which at-least-once
    /// semantics tolerate.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_due(&self, limit: usize, now: DateTime<Utc>) -> Result<Vec<Delivery>> {
        let deliveries = sqlx::query_as::<_, Delivery>(&format!(
            r"
            SELECT {DELIVERY_COLUMNS}
            FROM deliveries
            WHERE status IN ('pending', 'retrying') AND next_attempt_at <= $1
            ORDER BY next_attempt_at ASC
            LIMIT $2
            ",
        ))
        .bind(now)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&*self.pool)
        .await?;

        Ok(deliveries)
    }

    /// Marks a record as successfully delivered. Terminal.
    ///
    /// Clears `last_error`: the final word on this record is the 2xx.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn mark_succeeded(
        &self,
        id: DeliveryId,
        attempts: i32,
        status_code: i32,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE deliveries
            SET status = 'succeeded', attempts = $2, last_attempt_at = $3,
                last_status_code = $4, last_error = NULL
            WHERE id = $1 AND status IN ('pending', 'retrying')
            ",
        )
        .bind(id)
        .bind(attempts)
        .bind(at)
        .bind(status_code)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Records a failed attempt and schedules the next one.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn mark_retrying(
        &self,
        id: DeliveryId,
        attempts: i32,
        next_attempt_at: DateTime<Utc>,
        status_code: Option<i32>,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE deliveries
            SET status = 'retrying', attempts = $2, next_attempt_at = $3,
                last_attempt_at = $4, last_status_code = $5, last_error = $6
            WHERE id = $1 AND status IN ('pending', 'retrying')
            ",
        )
        .bind(id)
        .bind(attempts)
        .bind(next_attempt_at)
        .bind(at)
        .bind(status_code)
        .bind(error)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Marks a record as permanently failed. Terminal.
    ///
    /// Used both when attempts are exhausted and when the owning
    /// subscription is disabled or missing (in which case `attempts` is
    /// passed through unchanged).
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn mark_failed(
        &self,
        id: DeliveryId,
        attempts: i32,
        status_code: Option<i32>,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE deliveries
            SET status = 'failed', attempts = $2, last_attempt_at = $3,
                last_status_code = $4, last_error = $5
            WHERE id = $1 AND status IN ('pending', 'retrying')
            ",
        )
        .bind(id)
        .bind(attempts)
        .bind(at)
        .bind(status_code)
        .bind(error)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Finds a delivery record by ID.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_id(&self, id: DeliveryId) -> Result<Option<Delivery>> {
        let delivery = sqlx::query_as::<_, Delivery>(&format!(
            r"
            SELECT {DELIVERY_COLUMNS}
            FROM deliveries
            WHERE id = $1
            ",
        ))
        .bind(id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(delivery)
    }

    /// Lists deliveries for a subscription, newest first.
    ///
    /// Operator-facing: delivery health is only observable through these
    /// listings, never through a synchronous business-operation response.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn list_by_subscription(
        &self,
        subscription_id: SubscriptionId,
        limit: Option<i64>,
    ) -> Result<Vec<Delivery>> {
        let deliveries = sqlx::query_as::<_, Delivery>(&format!(
            r"
            SELECT {DELIVERY_COLUMNS}
            FROM deliveries
            WHERE subscription_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            ",
        ))
        .bind(subscription_id)
        .bind(limit.unwrap_or(100))
        .fetch_all(&*self.pool)
        .await?;

        Ok(deliveries)
    }

    /// Lists deliveries in a given status, newest first.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn list_by_status(
        &self,
        status: DeliveryStatus,
        limit: Option<i64>,
    ) -> Result<Vec<Delivery>> {
        let deliveries = sqlx::query_as::<_, Delivery>(&format!(
            r"
            SELECT {DELIVERY_COLUMNS}
            FROM deliveries
            WHERE status = $1
            ORDER BY created_at DESC
            LIMIT $2
            ",
        ))
        .bind(status)
        .bind(limit.unwrap_or(100))
        .fetch_all(&*self.pool)
        .await?;

        Ok(deliveries)
    }

    /// Counts deliveries in a given status.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn count_by_status(&self, status: DeliveryStatus) -> Result<i64> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM deliveries WHERE status = $1")
                .bind(status)
                .fetch_one(&*self.pool)
                .await?;

        Ok(count.0)
    }
}
