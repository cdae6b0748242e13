//! Relay webhook delivery service.
//!
//! Main entry point. Initializes logging and the database pool, ensures the
//! schema exists, and runs the delivery processor on its tick until a
//! shutdown signal arrives.

mod config;

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use relay_core::{storage::Storage, time::RealClock};
use relay_delivery::{
    storage::PostgresDeliveryStorage, DeliveryClient, DeliveryProcessor, ProcessorConfig,
};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("starting relay webhook delivery service");

    let config = Config::load()?;
    info!(
        database_url = %config.database_url_masked(),
        batch_limit = config.batch_limit,
        poll_interval_seconds = config.poll_interval_seconds,
        "configuration loaded"
    );

    let db_pool = create_database_pool(&config).await?;
    info!("database connection pool established");

    run_migrations(&db_pool).await?;
    info!("database schema ensured");

    let storage = Arc::new(Storage::new(db_pool.clone()));
    let delivery_storage = Arc::new(PostgresDeliveryStorage::new(storage));
    let client = Arc::new(DeliveryClient::with_defaults().context("failed to build HTTP client")?);
    let clock = Arc::new(RealClock::new());

    let processor = Arc::new(DeliveryProcessor::new(
        delivery_storage,
        client,
        clock,
        ProcessorConfig {
            batch_limit: config.batch_limit,
            poll_interval: Duration::from_secs(config.poll_interval_seconds),
        },
    ));

    let cancellation_token = CancellationToken::new();
    let processor_handle = tokio::spawn({
        let processor = processor.clone();
        let token = cancellation_token.clone();
        async move {
            processor.run(token).await;
        }
    });

    info!("relay is processing webhook deliveries");

    shutdown_signal().await;
    info!("shutdown signal received, starting graceful shutdown");

    cancellation_token.cancel();
    if let Err(e) = processor_handle.await {
        error!(error = %e, "processor task terminated abnormally");
    }

    db_pool.close().await;
    info!("relay shutdown complete");
    Ok(())
}

/// Initializes tracing with environment-based configuration.
fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,relay=debug"))
        .expect("Invalid RUST_LOG environment variable");

    let fmt_layer = fmt::layer().with_target(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}

/// Creates the database connection pool with bounded retries.
async fn create_database_pool(config: &Config) -> Result<sqlx::PgPool> {
    const MAX_RETRIES: u32 = 5;
    const RETRY_DELAY: Duration = Duration::from_secs(2);

    let mut retries = 0;

    loop {
        match PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(config.database_min_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&config.database_url)
            .await
        {
            Ok(pool) => {
                sqlx::query("SELECT 1")
                    .fetch_one(&pool)
                    .await
                    .context("failed to verify database connection")?;

                return Ok(pool);
            },
            Err(_e) if retries < MAX_RETRIES => {
                retries += 1;
                info!(
                    attempt = retries,
                    max_retries = MAX_RETRIES,
                    "database connection failed, retrying"
                );
                tokio::time::sleep(RETRY_DELAY).await;
            },
            Err(e) => {
                return Err(e).context("failed to create database connection pool after retries");
            },
        }
    }
}

/// Ensures the subscriptions and deliveries tables exist.
async fn run_migrations(pool: &sqlx::PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS subscriptions (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            name TEXT NOT NULL,
            url TEXT NOT NULL,
            enabled BOOLEAN NOT NULL DEFAULT TRUE,
            events TEXT[] NOT NULL DEFAULT '{}',
            secret TEXT,
            max_attempts INTEGER NOT NULL DEFAULT 10,
            timeout_ms BIGINT NOT NULL DEFAULT 10000,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create subscriptions table")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS deliveries (
            id UUID PRIMARY KEY,
            subscription_id UUID NOT NULL,
            event_type TEXT NOT NULL,
            payload BYTEA NOT NULL,
            status TEXT NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            next_attempt_at TIMESTAMPTZ NOT NULL,
            last_attempt_at TIMESTAMPTZ,
            last_status_code INTEGER,
            last_error TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create deliveries table")?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_deliveries_due
        ON deliveries(next_attempt_at)
        WHERE status IN ('pending', 'retrying')
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create due-deliveries index")?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_deliveries_subscription
        ON deliveries(subscription_id, created_at DESC)
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create subscription-deliveries index")?;

    Ok(())
}

/// Waits for shutdown signal (CTRL+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received CTRL+C signal");
        },
        _ = terminate => {
            info!("received SIGTERM signal");
        },
    }
}
