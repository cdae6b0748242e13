//! Fan-out semantics of the event emitter.
//!
//! Verifies that emission creates exactly one pending record per enabled,
//! subscribed endpoint, that non-matches are a no-op, and that the stored
//! envelope is an immutable snapshot of the event at emission time.

use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use chrono::{DateTime, Utc};
use relay_core::{
    models::{DeliveryStatus, Envelope, EventType, Subscription, SubscriptionId},
    time::{Clock, TestClock},
};
use relay_delivery::{
    storage::mock::MockDeliveryStorage, EmitMetadata, EventEmitter,
};

fn subscription(name: &str, events: Vec<EventType>, enabled: bool) -> Subscription {
    Subscription {
        id: SubscriptionId::new(),
        name: name.to_string(),
        url: format!("https://{name}.example.com/hook"),
        enabled,
        events,
        secret: None,
        max_attempts: 10,
        timeout_ms: 10_000,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn test_clock() -> TestClock {
    TestClock::with_start_time(SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000))
}

fn emitter(storage: &Arc<MockDeliveryStorage>, clock: &TestClock) -> EventEmitter {
    EventEmitter::new(storage.clone(), Arc::new(clock.clone()))
}

#[tokio::test]
async fn emit_creates_one_pending_record_per_matching_subscription() {
    let storage = Arc::new(MockDeliveryStorage::new());
    let clock = test_clock();

    let first = subscription("first", vec![EventType::ProjectStatusChanged], true);
    let second = subscription(
        "second",
        vec![EventType::ProjectStatusChanged, EventType::TaskCompleted],
        true,
    );
    let other_events = subscription("other", vec![EventType::ClientCreated], true);
    let disabled = subscription("disabled", vec![EventType::ProjectStatusChanged], false);

    for sub in [&first, &second, &other_events, &disabled] {
        storage.add_subscription(sub.clone()).await;
    }

    let created = emitter(&storage, &clock)
        .emit(
            EventType::ProjectStatusChanged,
            serde_json::json!({"projectId": "p-1", "status": "active"}),
            None,
        )
        .await
        .expect("emission should succeed");

    assert_eq!(created, 2);
    assert_eq!(storage.delivery_count().await, 2);

    for matched in [&first, &second] {
        let records = storage.deliveries_for(matched.id).await;
        assert_eq!(records.len(), 1, "expected one record for {}", matched.name);

        let record = &records[0];
        assert_eq!(record.status, DeliveryStatus::Pending);
        assert_eq!(record.attempts, 0);
        assert_eq!(record.event_type, EventType::ProjectStatusChanged);
        assert_eq!(record.next_attempt_at, clock.now_utc());
        assert!(record.last_attempt_at.is_none());
    }

    assert!(storage.deliveries_for(other_events.id).await.is_empty());
    assert!(storage.deliveries_for(disabled.id).await.is_empty());
}

#[tokio::test]
async fn emit_with_no_matching_subscriptions_is_a_noop() {
    let storage = Arc::new(MockDeliveryStorage::new());
    let clock = test_clock();

    storage
        .add_subscription(subscription("other", vec![EventType::ClientCreated], true))
        .await;

    let created = emitter(&storage, &clock)
        .emit(EventType::EquipmentReturned, serde_json::json!({"equipmentId": "e-9"}), None)
        .await
        .expect("no matches is not an error");

    assert_eq!(created, 0);
    assert_eq!(storage.delivery_count().await, 0);
}

#[tokio::test]
async fn stored_envelope_carries_event_source_and_data() {
    let storage = Arc::new(MockDeliveryStorage::new());
    let clock = test_clock();

    let sub = subscription("observer", vec![EventType::TaskAssigned], true);
    storage.add_subscription(sub.clone()).await;

    emitter(&storage, &clock)
        .emit(
            EventType::TaskAssigned,
            serde_json::json!({"taskId": "t-7", "assignee": "u-2"}),
            None,
        )
        .await
        .unwrap();

    let records = storage.deliveries_for(sub.id).await;
    let envelope: Envelope = serde_json::from_slice(&records[0].payload).unwrap();

    assert_eq!(envelope.event, EventType::TaskAssigned);
    assert_eq!(envelope.source, "relay");
    assert_eq!(envelope.timestamp, clock.now_utc());
    assert_eq!(envelope.data["taskId"], "t-7");

    // The wire tag, not the variant name, is what goes over the wire
    let raw: serde_json::Value = serde_json::from_slice(&records[0].payload).unwrap();
    assert_eq!(raw["event"], "task.assigned");
}

#[tokio::test]
async fn metadata_source_overrides_default() {
    let storage = Arc::new(MockDeliveryStorage::new());
    let clock = test_clock();

    let sub = subscription("observer", vec![EventType::MaintenanceScheduled], true);
    storage.add_subscription(sub.clone()).await;

    emitter(&storage, &clock)
        .emit(
            EventType::MaintenanceScheduled,
            serde_json::json!({"equipmentId": "e-3"}),
            Some(EmitMetadata { source: Some("maintenance-scheduler".to_string()) }),
        )
        .await
        .unwrap();

    let records = storage.deliveries_for(sub.id).await;
    let envelope: Envelope = serde_json::from_slice(&records[0].payload).unwrap();
    assert_eq!(envelope.source, "maintenance-scheduler");
}

#[tokio::test]
async fn payload_snapshot_is_unaffected_by_later_mutation() {
    let storage = Arc::new(MockDeliveryStorage::new());
    let clock = test_clock();

    let sub = subscription("observer", vec![EventType::ProjectCreated], true);
    storage.add_subscription(sub.clone()).await;

    let mut domain_object = serde_json::json!({"projectId": "p-1", "status": "draft"});

    emitter(&storage, &clock)
        .emit(EventType::ProjectCreated, domain_object.clone(), None)
        .await
        .unwrap();

    // The domain object moves on after emission
    domain_object["status"] = serde_json::Value::String("archived".to_string());

    let records = storage.deliveries_for(sub.id).await;
    let envelope: Envelope = serde_json::from_slice(&records[0].payload).unwrap();
    assert_eq!(envelope.data["status"], "draft");
}

#[tokio::test]
async fn same_event_emitted_twice_queues_independent_records() {
    let storage = Arc::new(MockDeliveryStorage::new());
    let clock = test_clock();

    let sub = subscription("observer", vec![EventType::TaskCompleted], true);
    storage.add_subscription(sub.clone()).await;

    let emitter = emitter(&storage, &clock);
    emitter.emit(EventType::TaskCompleted, serde_json::json!({"taskId": "t-1"}), None).await.unwrap();
    clock.advance(Duration::from_secs(5));
    emitter.emit(EventType::TaskCompleted, serde_json::json!({"taskId": "t-2"}), None).await.unwrap();

    let records = storage.deliveries_for(sub.id).await;
    assert_eq!(records.len(), 2);
    assert_ne!(records[0].id, records[1].id);

    let due_times: Vec<DateTime<Utc>> = records.iter().map(|r| r.next_attempt_at).collect();
    assert_ne!(due_times[0], due_times[1]);
}
