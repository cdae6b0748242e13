//! Outbound webhook delivery pipeline.
//!
//! This crate implements the event-webhook core of the admin backend:
//! fanning domain events out into durable delivery records, and driving
//! each record independently to a signed HTTP POST with exponential backoff
//! and at-least-once semantics.
//!
//! # Architecture
//!
//! ```text
//! domain event ──▶ EventEmitter ──▶ delivery records (one per subscriber)
//!                                          │
//!                                          ▼
//!                  DeliveryProcessor (periodic tick, batch of due records)
//!                                          │
//!                                          ▼
//!                  DeliveryClient ──▶ subscriber endpoint (signed POST)
//!                                          │
//!                                          ▼
//!                  record update: succeeded | retrying (backoff) | failed
//! ```
//!
//! Emission never blocks or fails the business operation that triggered it:
//! the emitter's only side effect is persisted rows, and delivery outcomes
//! are observable solely through the record store. Each record succeeds or
//! fails on its own; a slow or broken subscriber never delays another.

pub mod backoff;
pub mod client;
pub mod emitter;
pub mod error;
pub mod probe;
pub mod processor;
pub mod signing;
pub mod storage;

pub use client::{ClientConfig, DeliveryClient};
pub use emitter::{EmitMetadata, EventEmitter};
pub use error::{DeliveryError, Result};
pub use probe::{TestSendReport, TestSender};
pub use processor::{DeliveryProcessor, ProcessorConfig, TickStats};

/// Default maximum due records processed per tick.
pub const DEFAULT_BATCH_LIMIT: usize = 50;

/// Default interval between processor ticks.
pub const DEFAULT_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);
