//! Error types for delivery operations.
//!
//! Categorizes failures for retry decisions: transport-level problems are
//! retryable, while configuration and serialization problems are not.
//! Non-2xx responses are not errors at this level; the processor reads them
//! off the response and applies the retry policy itself.

use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Error types for delivery operations.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// Network-level connectivity failure.
    #[error("network connection failed: {message}")]
    Network {
        /// Error message describing the network failure
        message: String,
    },

    /// Per-attempt timeout exceeded; the request was aborted.
    #[error("request aborted after {timeout_ms}ms timeout")]
    Timeout {
        /// Timeout that was exceeded, in milliseconds
        timeout_ms: u64,
    },

    /// Record-store operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Storage error message
        message: String,
    },

    /// Invalid client or subscription configuration.
    #[error("configuration error: {message}")]
    Configuration {
        /// Configuration error message
        message: String,
    },

    /// Envelope could not be serialized.
    #[error("envelope serialization failed: {message}")]
    Serialization {
        /// Serialization error message
        message: String,
    },
}

impl DeliveryError {
    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_ms: u64) -> Self {
        Self::Timeout { timeout_ms }
    }

    /// Creates a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage { message: message.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Creates a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into() }
    }

    /// Whether this failure should count as a transient delivery error.
    ///
    /// Transient errors consume an attempt and reschedule per the backoff
    /// table; the rest surface to the caller without touching the record.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Timeout { .. } | Self::Storage { .. } => true,
            Self::Configuration { .. } | Self::Serialization { .. } => false,
        }
    }
}
