//! HTTP client for webhook delivery.
//!
//! Handles request construction, per-attempt timeouts, and response
//! capture. Non-2xx responses come back as responses, not errors; only
//! transport failures (connect errors, aborts on timeout) surface as
//! [`DeliveryError`] so the processor can distinguish "endpoint answered
//! badly" from "endpoint never answered".

use std::time::Duration;

use bytes::Bytes;
use relay_core::models::{DeliveryId, EventType};
use tracing::{info_span, Instrument};

use crate::error::{DeliveryError, Result};

/// Captured response bodies are cut at this size before storage.
const MAX_CAPTURED_BODY: usize = 1024;

/// Configuration for the webhook delivery client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// User agent string for requests.
    pub user_agent: String,
    /// Maximum number of redirects to follow.
    pub max_redirects: u32,
    /// Whether to verify TLS certificates.
    pub verify_tls: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_agent: "Relay-Webhooks/1.0".to_string(),
            max_redirects: 3,
            verify_tls: true,
        }
    }
}

/// HTTP client optimized for webhook delivery.
///
/// Connection pooling is shared across subscribers; the timeout is applied
/// per request from the subscription's own limit rather than globally.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    client: reqwest::Client,
}

/// One outbound delivery attempt.
#[derive(Debug, Clone)]
pub struct DeliveryRequest {
    /// Delivery-record identity, sent as the receiver's dedupe key.
    pub delivery_id: DeliveryId,
    /// Event type tag for the event-type header.
    pub event_type: EventType,
    /// Destination URL.
    pub url: String,
    /// Serialized envelope, sent verbatim.
    pub body: Bytes,
    /// Timestamp string bound into the signature.
    pub timestamp: String,
    /// Signature header value, when the subscription has a secret.
    pub signature: Option<String>,
    /// Per-attempt timeout; the request aborts when it elapses.
    pub timeout: Duration,
}

/// Response from a webhook delivery attempt.
#[derive(Debug, Clone)]
pub struct DeliveryResponse {
    /// HTTP status code.
    pub status_code: u16,
    /// Response body, truncated to a bounded size.
    pub body: String,
    /// Total duration of the request.
    pub duration: Duration,
    /// Whether the request was successful (2xx status).
    pub is_success: bool,
}

impl DeliveryClient {
    /// Creates a new delivery client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` if the HTTP client cannot be
    /// built with the provided settings.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects as usize))
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(|e| {
                DeliveryError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client })
    }

    /// Creates a new delivery client with default configuration.
    pub fn with_defaults() -> Result<Self> {
        Self::new(ClientConfig::default())
    }

    /// Delivers a webhook request to its destination.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` when the per-attempt deadline aborts the call and
    /// `Network` for connect or transport failures. HTTP error statuses are
    /// returned inside `Ok` for the caller to interpret.
    pub async fn deliver(&self, request: DeliveryRequest) -> Result<DeliveryResponse> {
        let start_time = std::time::Instant::now();

        let span = info_span!(
            "webhook_delivery",
            delivery_id = %request.delivery_id,
            event = %request.event_type,
            url = %request.url,
        );

        async move {
            let mut http_request = self
                .client
                .post(&request.url)
                .timeout(request.timeout)
                .header("content-type", "application/json")
                .header("X-Relay-Event", request.event_type.as_str())
                .header("X-Relay-Delivery", request.delivery_id.to_string())
                .header("X-Relay-Timestamp", &request.timestamp)
                .body(request.body.clone());

            if let Some(signature) = &request.signature {
                http_request = http_request.header("X-Relay-Signature", signature);
            }

            let response = match http_request.send().await {
                Ok(response) => response,
                Err(e) => {
                    let duration = start_time.elapsed();
                    tracing::warn!(duration_ms = duration.as_millis(), "request failed: {e}");

                    if e.is_timeout() {
                        return Err(DeliveryError::timeout(request.timeout.as_millis() as u64));
                    }
                    if e.is_connect() {
                        return Err(DeliveryError::network(format!("connection failed: {e}")));
                    }
                    return Err(DeliveryError::network(e.to_string()));
                },
            };

            let duration = start_time.elapsed();
            let status_code = response.status().as_u16();
            let is_success = response.status().is_success();

            tracing::debug!(
                status = status_code,
                duration_ms = duration.as_millis(),
                "received response"
            );

            let body = match response.bytes().await {
                Ok(bytes) => truncate_body(&bytes),
                Err(e) => format!("[failed to read response body: {e}]"),
            };

            Ok(DeliveryResponse { status_code, body, duration, is_success })
        }
        .instrument(span)
        .await
    }
}

/// Bounds a response body for storage on the delivery record.
fn truncate_body(bytes: &[u8]) -> String {
    if bytes.len() > MAX_CAPTURED_BODY {
        let suffix = "... (truncated)";
        let kept = String::from_utf8_lossy(&bytes[..MAX_CAPTURED_BODY - suffix.len()]);
        format!("{kept}{suffix}")
    } else {
        String::from_utf8_lossy(bytes).into_owned()
    }
}
