//! Domain models and strongly-typed identifiers.
//!
//! Defines subscriptions, delivery records, the closed event-type set, and
//! the wire envelope. Newtype ID wrappers give compile-time separation
//! between subscription and delivery identifiers, and the enums carry their
//! database text encodings so repositories stay free of stringly-typed
//! status handling.

use std::{fmt, str::FromStr, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

type PgDb = sqlx::Postgres;
type PgRow = sqlx::postgres::PgRow;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type PgArgumentBuffer = sqlx::postgres::PgArgumentBuffer;
type EncodeResult =
    Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>;
type BoxDynError = sqlx::error::BoxDynError;

/// Strongly-typed subscription identifier.
///
/// Wraps a UUID to prevent mixing with delivery identifiers. Subscriptions
/// are owned by the external registry; this core only reads them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
    /// Creates a new random subscription ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for SubscriptionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for SubscriptionId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for SubscriptionId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for SubscriptionId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Strongly-typed delivery-record identifier.
///
/// One delivery record represents a single subscriber's obligation to
/// receive one event. The ID doubles as the receiver-side deduplication key
/// carried in the delivery-id header, since delivery is at-least-once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeliveryId(pub Uuid);

impl DeliveryId {
    /// Creates a new random delivery ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DeliveryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for DeliveryId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for DeliveryId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for DeliveryId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for DeliveryId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Domain event types that can be published to subscribers.
///
/// A closed set rather than free-form strings, so producers cannot emit a
/// tag no subscriber could ever have registered for. The wire tag is used
/// identically in the envelope `event` field, the event-type header, and
/// the `subscriptions.events` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// A project was created.
    #[serde(rename = "project.created")]
    ProjectCreated,
    /// A project's status changed.
    #[serde(rename = "project.status_changed")]
    ProjectStatusChanged,
    /// A task was assigned to a user.
    #[serde(rename = "task.assigned")]
    TaskAssigned,
    /// A task was marked completed.
    #[serde(rename = "task.completed")]
    TaskCompleted,
    /// A piece of equipment was checked out.
    #[serde(rename = "equipment.checked_out")]
    EquipmentCheckedOut,
    /// A piece of equipment was returned.
    #[serde(rename = "equipment.returned")]
    EquipmentReturned,
    /// A maintenance window was scheduled.
    #[serde(rename = "maintenance.scheduled")]
    MaintenanceScheduled,
    /// A maintenance window was completed.
    #[serde(rename = "maintenance.completed")]
    MaintenanceCompleted,
    /// A client was created.
    #[serde(rename = "client.created")]
    ClientCreated,
    /// Synthetic event used by the ad-hoc test sender.
    #[serde(rename = "webhook.test")]
    Test,
}

impl EventType {
    /// Returns the wire tag for this event type.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ProjectCreated => "project.created",
            Self::ProjectStatusChanged => "project.status_changed",
            Self::TaskAssigned => "task.assigned",
            Self::TaskCompleted => "task.completed",
            Self::EquipmentCheckedOut => "equipment.checked_out",
            Self::EquipmentReturned => "equipment.returned",
            Self::MaintenanceScheduled => "maintenance.scheduled",
            Self::MaintenanceCompleted => "maintenance.completed",
            Self::ClientCreated => "client.created",
            Self::Test => "webhook.test",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = crate::error::CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "project.created" => Ok(Self::ProjectCreated),
            "project.status_changed" => Ok(Self::ProjectStatusChanged),
            "task.assigned" => Ok(Self::TaskAssigned),
            "task.completed" => Ok(Self::TaskCompleted),
            "equipment.checked_out" => Ok(Self::EquipmentCheckedOut),
            "equipment.returned" => Ok(Self::EquipmentReturned),
            "maintenance.scheduled" => Ok(Self::MaintenanceScheduled),
            "maintenance.completed" => Ok(Self::MaintenanceCompleted),
            "client.created" => Ok(Self::ClientCreated),
            "webhook.test" => Ok(Self::Test),
            _ => Err(crate::error::CoreError::InvalidInput(format!("unknown event type: {s}"))),
        }
    }
}

impl sqlx::Type<PgDb> for EventType {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for EventType {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        s.parse().map_err(|_| format!("invalid event type: {s}").into())
    }
}

impl sqlx::Encode<'_, PgDb> for EventType {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <&str as sqlx::Encode<PgDb>>::encode_by_ref(&self.as_str(), buf)
    }
}

/// Delivery-record lifecycle status.
///
/// ```text
/// Pending -> Retrying -> ... -> Succeeded
///        \            \
///         `------------`-----> Failed
/// ```
///
/// `Pending` and `Retrying` are equivalent for due-record selection and
/// differ only in whether an attempt has been made. `Succeeded` and
/// `Failed` are terminal; no transition leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Queued, no attempt made yet.
    Pending,

    /// At least one attempt failed; waiting for the next attempt window.
    Retrying,

    /// Delivered with a 2xx response. Terminal.
    Succeeded,

    /// Permanently failed. Terminal.
    Failed,
}

impl DeliveryStatus {
    /// Returns true for terminal states.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Retrying => write!(f, "retrying"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl sqlx::Type<PgDb> for DeliveryStatus {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for DeliveryStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        match s {
            "pending" => Ok(Self::Pending),
            "retrying" => Ok(Self::Retrying),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("invalid delivery status: {s}").into()),
        }
    }
}

impl sqlx::Encode<'_, PgDb> for DeliveryStatus {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <String as sqlx::Encode<PgDb>>::encode_by_ref(&self.to_string(), buf)
    }
}

/// Webhook subscription configuration.
///
/// Owned by the external registry; the pipeline only reads active entries.
/// Limits are clamped at use via [`Subscription::effective_max_attempts`]
/// and [`Subscription::effective_timeout`] so registry rows cannot push the
/// processor outside documented bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    /// Unique identifier for this subscription.
    pub id: SubscriptionId,

    /// Human-readable subscription name.
    pub name: String,

    /// Target URL for webhook delivery.
    pub url: String,

    /// Whether this subscription should receive new events.
    ///
    /// Disabling stops new deliveries and terminally fails queued ones at
    /// their next processing; already-queued records are never resurrected
    /// by re-enabling.
    pub enabled: bool,

    /// Event types this subscription is registered for.
    pub events: Vec<EventType>,

    /// Shared secret for request signing. Empty or absent disables signing.
    pub secret: Option<String>,

    /// Maximum delivery attempts per record, including the first.
    pub max_attempts: i32,

    /// Per-attempt HTTP timeout in milliseconds.
    pub timeout_ms: i64,

    /// When this subscription was created.
    pub created_at: DateTime<Utc>,

    /// When configuration was last modified.
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Default maximum delivery attempts.
    pub const DEFAULT_MAX_ATTEMPTS: i32 = 10;
    /// Lower/upper bounds on configured attempts.
    pub const MAX_ATTEMPTS_BOUNDS: (i32, i32) = (1, 50);
    /// Default per-attempt timeout in milliseconds.
    pub const DEFAULT_TIMEOUT_MS: i64 = 10_000;
    /// Lower/upper bounds on the configured timeout.
    pub const TIMEOUT_MS_BOUNDS: (i64, i64) = (1_000, 60_000);

    /// Configured attempt limit clamped into documented bounds.
    pub fn effective_max_attempts(&self) -> i32 {
        let (min, max) = Self::MAX_ATTEMPTS_BOUNDS;
        self.max_attempts.clamp(min, max)
    }

    /// Configured per-attempt timeout clamped into documented bounds.
    pub fn effective_timeout(&self) -> Duration {
        let (min, max) = Self::TIMEOUT_MS_BOUNDS;
        Duration::from_millis(self.timeout_ms.clamp(min, max) as u64)
    }

    /// Returns whether this subscription listens for the given event type.
    pub fn is_subscribed_to(&self, event_type: EventType) -> bool {
        self.events.contains(&event_type)
    }

    /// Returns the signing secret if signing is enabled.
    ///
    /// An empty string counts as disabled so a blanked-out secret in the
    /// registry does not produce signatures over an empty key.
    pub fn signing_secret(&self) -> Option<&str> {
        self.secret.as_deref().filter(|s| !s.is_empty())
    }
}

impl<'r> sqlx::FromRow<'r, PgRow> for Subscription {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;

        let tags: Vec<String> = row.try_get("events")?;
        let events = tags
            .iter()
            .map(|tag| tag.parse::<EventType>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| sqlx::Error::Decode(e.to_string().into()))?;

        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            url: row.try_get("url")?,
            enabled: row.try_get("enabled")?,
            events,
            secret: row.try_get("secret")?,
            max_attempts: row.try_get("max_attempts")?,
            timeout_ms: row.try_get("timeout_ms")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// A single subscriber's obligation to receive one event.
///
/// Created by the emitter in `Pending`, mutated exclusively by the
/// processor, never deleted by the pipeline (retention is an external
/// concern). The `payload` is the serialized envelope captured at emission
/// time and is write-once: later changes to the domain object are not
/// reflected, and the stored bytes are exactly what gets signed and sent.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Delivery {
    /// Unique identifier, also the receiver-side dedupe key.
    pub id: DeliveryId,

    /// Owning subscription. Lookup-only weak reference: the record outlives
    /// subscription disablement or deletion.
    pub subscription_id: SubscriptionId,

    /// Event type captured at emission time.
    pub event_type: EventType,

    /// Serialized envelope, transmitted and signed verbatim.
    pub payload: Vec<u8>,

    /// Current lifecycle status.
    pub status: DeliveryStatus,

    /// Attempts made so far. Starts at 0, only increases.
    pub attempts: i32,

    /// Earliest time this record is eligible for processing.
    pub next_attempt_at: DateTime<Utc>,

    /// Timestamp of the most recent attempt.
    pub last_attempt_at: Option<DateTime<Utc>>,

    /// HTTP status of the most recent attempt, if a response was received.
    pub last_status_code: Option<i32>,

    /// Truncated response body or transport error of the last failure.
    pub last_error: Option<String>,

    /// When the record was created.
    pub created_at: DateTime<Utc>,
}

impl Delivery {
    /// Creates a new pending delivery record, due immediately.
    pub fn new(
        subscription_id: SubscriptionId,
        event_type: EventType,
        payload: Vec<u8>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: DeliveryId::new(),
            subscription_id,
            event_type,
            payload,
            status: DeliveryStatus::Pending,
            attempts: 0,
            next_attempt_at: now,
            last_attempt_at: None,
            last_status_code: None,
            last_error: None,
            created_at: now,
        }
    }

    /// Returns whether the record is eligible for processing at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.status.is_terminal() && self.next_attempt_at <= now
    }
}

/// Wire envelope wrapping a domain event for transmission.
///
/// The serialized envelope, not the raw payload, is the immutable snapshot
/// stored on the delivery record, so the signature covers exactly what is
/// sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Event type tag.
    pub event: EventType,

    /// Logical origin of the event.
    pub source: String,

    /// Emission time.
    pub timestamp: DateTime<Utc>,

    /// Event payload as provided by the producer.
    pub data: serde_json::Value,
}

impl Envelope {
    /// Serializes the envelope to the bytes stored and transmitted.
    pub fn to_bytes(&self) -> crate::error::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}
