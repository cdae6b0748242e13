//! Database access layer implementing the repository pattern for webhook
//! persistence.
//!
//! The repository layer acts as an anti-corruption layer, translating
//! between domain models and the database schema. All database operations
//! go through these repositories; direct SQL elsewhere is forbidden to keep
//! the schema evolvable.

use std::sync::Arc;

use sqlx::PgPool;

pub mod deliveries;
pub mod subscriptions;

use crate::error::Result;

/// Container for all repository instances providing unified database access.
#[derive(Clone)]
pub struct Storage {
    /// Repository for delivery-record operations.
    pub deliveries: Arc<deliveries::Repository>,

    /// Repository for subscription reads.
    pub subscriptions: Arc<subscriptions::Repository>,
}

impl Storage {
    /// Creates a new storage instance with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        let pool = Arc::new(pool);

        Self {
            deliveries: Arc::new(deliveries::Repository::new(pool.clone())),
            subscriptions: Arc::new(subscriptions::Repository::new(pool)),
        }
    }

    /// Performs a health check on the database connection.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the connection is unhealthy.
    pub async fn health_check(&self) -> Result<()> {
        let _: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&*self.deliveries.pool()).await?;

        Ok(())
    }
}
