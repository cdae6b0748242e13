//! Core domain models for the outbound webhook pipeline.
//!
//! Provides strongly-typed identifiers, the closed set of domain event
//! types, subscription and delivery-record models, the clock abstraction,
//! and the PostgreSQL repository layer. The delivery crate builds the
//! actual pipeline on top of these foundations.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod storage;
pub mod time;

pub use error::{CoreError, Result};
pub use models::{
    Delivery, DeliveryId, DeliveryStatus, Envelope, EventType, Subscription, SubscriptionId,
};
pub use time::{Clock, RealClock, TestClock};
