//! Delivery processor state machine and backoff behavior.
//!
//! Drives records through the processor against wiremock endpoints and the
//! in-memory store, with a controlled clock for exact backoff timestamps.

use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use chrono::Utc;
use relay_core::{
    models::{Delivery, DeliveryStatus, EventType, Subscription, SubscriptionId},
    time::{Clock, TestClock},
};
use relay_delivery::{
    signing,
    storage::{mock::MockDeliveryStorage, DeliveryStorage},
    DeliveryClient, DeliveryProcessor, ProcessorConfig,
};
use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

fn subscription(url: String) -> Subscription {
    Subscription {
        id: SubscriptionId::new(),
        name: "test-subscription".to_string(),
        url,
        enabled: true,
        events: vec![EventType::ProjectStatusChanged],
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

fn processor(storage: &Arc<MockDeliveryStorage>, clock: &TestClock) -> DeliveryProcessor {
    DeliveryProcessor::new(
        storage.clone(),
        Arc::new(DeliveryClient::with_defaults().expect("client should build")),
        Arc::new(clock.clone()),
        ProcessorConfig::default(),
    )
}

async fn seed_delivery(
    storage: &MockDeliveryStorage,
    sub: &Subscription,
    clock: &TestClock,
) -> Delivery {
    let delivery = Delivery::new(
        sub.id,
        EventType::ProjectStatusChanged,
        br#"{"event":"project.status_changed","data":{}}"#.to_vec(),
        clock.now_utc(),
    );
    storage.add_delivery(delivery.clone()).await;
    delivery
}

#[tokio::test]
async fn successful_delivery_marks_record_succeeded() {
    let mock_server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .and(matchers::path("/hook"))
        .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let storage = Arc::new(MockDeliveryStorage::new());
    let clock = test_clock();
    let sub = subscription(format!("{}/hook", mock_server.uri()));
    storage.add_subscription(sub.clone()).await;
    let delivery = seed_delivery(&storage, &sub, &clock).await;

    let stats = processor(&storage, &clock).process_due(50).await.unwrap();
    assert_eq!(stats.processed, 1);
    assert_eq!(stats.succeeded, 1);

    let updated = storage.delivery(delivery.id).await.unwrap();
    assert_eq!(updated.status, DeliveryStatus::Succeeded);
    assert_eq!(updated.attempts, 1);
    assert_eq!(updated.last_status_code, Some(200));
    assert!(updated.last_error.is_none());
    assert_eq!(updated.last_attempt_at, Some(clock.now_utc()));

    mock_server.verify().await;
}

#[tokio::test]
async fn request_carries_delivery_headers_and_signature() {
    let storage = Arc::new(MockDeliveryStorage::new());
    let clock = test_clock();

    let mock_server = MockServer::start().await;
    let mut sub = subscription(format!("{}/hook", mock_server.uri()));
    sub.secret = Some("whsec_test".to_string());
    storage.add_subscription(sub.clone()).await;
    let delivery = seed_delivery(&storage, &sub, &clock).await;

    // TestClock starts at a known epoch, so the signed timestamp is fixed
    let expected_signature =
        signing::signature("whsec_test", "1700000000", &delivery.payload).unwrap();

    Mock::given(matchers::method("POST"))
        .and(matchers::header("content-type", "application/json"))
        .and(matchers::header("X-Relay-Event", "project.status_changed"))
        .and(matchers::header("X-Relay-Delivery", delivery.id.to_string().as_str()))
        .and(matchers::header("X-Relay-Timestamp", "1700000000"))
        .and(matchers::header("X-Relay-Signature", expected_signature.as_str()))
        .and(matchers::body_bytes(delivery.payload.clone()))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let stats = processor(&storage, &clock).process_due(50).await.unwrap();
    assert_eq!(stats.succeeded, 1);

    mock_server.verify().await;
}

#[tokio::test]
async fn failed_delivery_schedules_first_backoff_step() {
    let mock_server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
        .mount(&mock_server)
        .await;

    let storage = Arc::new(MockDeliveryStorage::new());
    let clock = test_clock();
    let sub = subscription(format!("{}/hook", mock_server.uri()));
    storage.add_subscription(sub.clone()).await;
    let delivery = seed_delivery(&storage, &sub, &clock).await;

    let queued_at = clock.now_utc();
    let stats = processor(&storage, &clock).process_due(50).await.unwrap();
    assert_eq!(stats.retried, 1);

    let updated = storage.delivery(delivery.id).await.unwrap();
    assert_eq!(updated.status, DeliveryStatus::Retrying);
    assert_eq!(updated.attempts, 1);
    assert_eq!(updated.last_status_code, Some(500));
    assert_eq!(updated.last_error.as_deref(), Some("Internal Server Error"));
    assert_eq!(updated.next_attempt_at, queued_at + chrono::Duration::minutes(1));
}

#[tokio::test]
async fn retries_walk_the_backoff_schedule_then_fail() {
    let mock_server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("still broken"))
        .expect(3)
        .mount(&mock_server)
        .await;

    let storage = Arc::new(MockDeliveryStorage::new());
    let clock = test_clock();
    let mut sub = subscription(format!("{}/hook", mock_server.uri()));
    sub.max_attempts = 3;
    storage.add_subscription(sub.clone()).await;
    let delivery = seed_delivery(&storage, &sub, &clock).await;

    let processor = processor(&storage, &clock);
    let queued_at = clock.now_utc();

    // Attempt 1 fails, next attempt one minute out
    processor.process_due(50).await.unwrap();
    let after_first = storage.delivery(delivery.id).await.unwrap();
    assert_eq!(after_first.status, DeliveryStatus::Retrying);
    assert_eq!(after_first.next_attempt_at, queued_at + chrono::Duration::minutes(1));

    // Not due yet: the record is untouched until its window arrives
    let idle = processor.process_due(50).await.unwrap();
    assert_eq!(idle.processed, 0);

    // Attempt 2 at t0+1m fails, next attempt five minutes out
    clock.advance(Duration::from_secs(60));
    processor.process_due(50).await.unwrap();
    let after_second = storage.delivery(delivery.id).await.unwrap();
    assert_eq!(after_second.attempts, 2);
    assert_eq!(
        after_second.next_attempt_at,
        queued_at + chrono::Duration::minutes(1) + chrono::Duration::minutes(5)
    );

    // Attempt 3 exhausts the budget
    clock.advance(Duration::from_secs(300));
    processor.process_due(50).await.unwrap();
    let after_third = storage.delivery(delivery.id).await.unwrap();
    assert_eq!(after_third.status, DeliveryStatus::Failed);
    assert_eq!(after_third.attempts, 3);
    assert_eq!(after_third.last_error.as_deref(), Some("still broken"));

    // Terminal: nothing left to process however far time advances
    clock.advance(Duration::from_secs(6 * 60 * 60));
    let done = processor.process_due(50).await.unwrap();
    assert_eq!(done.processed, 0);

    mock_server.verify().await;
}

#[tokio::test]
async fn single_attempt_budget_fails_immediately_without_retrying() {
    let mock_server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let storage = Arc::new(MockDeliveryStorage::new());
    let clock = test_clock();
    let mut sub = subscription(format!("{}/hook", mock_server.uri()));
    sub.max_attempts = 1;
    storage.add_subscription(sub.clone()).await;
    let delivery = seed_delivery(&storage, &sub, &clock).await;

    let stats = processor(&storage, &clock).process_due(50).await.unwrap();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.retried, 0);

    let updated = storage.delivery(delivery.id).await.unwrap();
    assert_eq!(updated.status, DeliveryStatus::Failed);
    assert_eq!(updated.attempts, 1);

    mock_server.verify().await;
}

#[tokio::test]
async fn disabled_subscription_fails_record_terminally() {
    let storage = Arc::new(MockDeliveryStorage::new());
    let clock = test_clock();

    let mut sub = subscription("https://unused.example.com/hook".to_string());
    sub.enabled = false;
    storage.add_subscription(sub.clone()).await;
    let delivery = seed_delivery(&storage, &sub, &clock).await;

    let stats = processor(&storage, &clock).process_due(50).await.unwrap();
    assert_eq!(stats.failed, 1);

    let updated = storage.delivery(delivery.id).await.unwrap();
    assert_eq!(updated.status, DeliveryStatus::Failed);
    assert_eq!(updated.last_error.as_deref(), Some("subscription disabled or missing"));
    // No attempt was made against the endpoint
    assert_eq!(updated.attempts, 0);
}

#[tokio::test]
async fn missing_subscription_fails_record_terminally() {
    let storage = Arc::new(MockDeliveryStorage::new());
    let clock = test_clock();

    let orphaned = Delivery::new(
        SubscriptionId::new(),
        EventType::TaskCompleted,
        b"{}".to_vec(),
        clock.now_utc(),
    );
    storage.add_delivery(orphaned.clone()).await;

    processor(&storage, &clock).process_due(50).await.unwrap();

    let updated = storage.delivery(orphaned.id).await.unwrap();
    assert_eq!(updated.status, DeliveryStatus::Failed);
    assert_eq!(updated.last_error.as_deref(), Some("subscription disabled or missing"));
}

#[tokio::test]
async fn timeout_is_a_transient_failure() {
    let mock_server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&mock_server)
        .await;

    let storage = Arc::new(MockDeliveryStorage::new());
    let clock = test_clock();
    let mut sub = subscription(format!("{}/hook", mock_server.uri()));
    sub.timeout_ms = 1_000;
    storage.add_subscription(sub.clone()).await;
    let delivery = seed_delivery(&storage, &sub, &clock).await;

    let stats = processor(&storage, &clock).process_due(50).await.unwrap();
    assert_eq!(stats.retried, 1);

    let updated = storage.delivery(delivery.id).await.unwrap();
    assert_eq!(updated.status, DeliveryStatus::Retrying);
    assert_eq!(updated.last_status_code, None);
    assert!(updated.last_error.as_deref().unwrap().contains("timeout"));
}

#[tokio::test]
async fn one_subscriber_failing_never_blocks_another() {
    let mock_server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let storage = Arc::new(MockDeliveryStorage::new());
    let clock = test_clock();

    // Connection refused for the broken subscriber
    let broken = subscription("http://127.0.0.1:9/hook".to_string());
    let healthy = subscription(format!("{}/hook", mock_server.uri()));
    storage.add_subscription(broken.clone()).await;
    storage.add_subscription(healthy.clone()).await;

    let broken_delivery = seed_delivery(&storage, &broken, &clock).await;
    clock.advance(Duration::from_millis(1));
    let healthy_delivery = seed_delivery(&storage, &healthy, &clock).await;

    let stats = processor(&storage, &clock).process_due(50).await.unwrap();
    assert_eq!(stats.processed, 2);
    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.retried, 1);

    let broken_updated = storage.delivery(broken_delivery.id).await.unwrap();
    assert_eq!(broken_updated.status, DeliveryStatus::Retrying);

    let healthy_updated = storage.delivery(healthy_delivery.id).await.unwrap();
    assert_eq!(healthy_updated.status, DeliveryStatus::Succeeded);

    mock_server.verify().await;
}

#[tokio::test]
async fn batch_limit_bounds_each_tick() {
    let mock_server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&mock_server)
        .await;

    let storage = Arc::new(MockDeliveryStorage::new());
    let clock = test_clock();
    let sub = subscription(format!("{}/hook", mock_server.uri()));
    storage.add_subscription(sub.clone()).await;

    for _ in 0..3 {
        seed_delivery(&storage, &sub, &clock).await;
        clock.advance(Duration::from_millis(1));
    }

    let stats = processor(&storage, &clock).process_due(2).await.unwrap();
    assert_eq!(stats.processed, 2);

    let remaining_pending = storage
        .deliveries_for(sub.id)
        .await
        .into_iter()
        .filter(|d| d.status == DeliveryStatus::Pending)
        .count();
    assert_eq!(remaining_pending, 1);

    mock_server.verify().await;
}

#[tokio::test]
async fn records_not_yet_due_are_left_alone() {
    let storage = Arc::new(MockDeliveryStorage::new());
    let clock = test_clock();
    let sub = subscription("https://unused.example.com/hook".to_string());
    storage.add_subscription(sub.clone()).await;

    let mut delivery = Delivery::new(
        sub.id,
        EventType::ProjectStatusChanged,
        b"{}".to_vec(),
        clock.now_utc(),
    );
    delivery.next_attempt_at = clock.now_utc() + chrono::Duration::minutes(1);
    storage.add_delivery(delivery.clone()).await;

    let stats = processor(&storage, &clock).process_due(50).await.unwrap();
    assert_eq!(stats.processed, 0);

    let untouched = storage.delivery(delivery.id).await.unwrap();
    assert_eq!(untouched.status, DeliveryStatus::Pending);
    assert_eq!(untouched.attempts, 0);
}

#[tokio::test]
async fn terminal_records_never_transition_again() {
    let storage = Arc::new(MockDeliveryStorage::new());
    let clock = test_clock();
    let sub = subscription("https://unused.example.com/hook".to_string());
    storage.add_subscription(sub.clone()).await;

    let mut delivered = seed_delivery(&storage, &sub, &clock).await;
    delivered.status = DeliveryStatus::Succeeded;
    delivered.attempts = 1;
    storage.add_delivery(delivered.clone()).await;

    // Not selected as due despite next_attempt_at being in the past
    let stats = processor(&storage, &clock).process_due(50).await.unwrap();
    assert_eq!(stats.processed, 0);

    // A stray failure update cannot pull it out of the terminal state
    storage
        .mark_failed(delivered.id, 2, None, "late failure".to_string(), clock.now_utc())
        .await
        .unwrap();

    let still_succeeded = storage.delivery(delivered.id).await.unwrap();
    assert_eq!(still_succeeded.status, DeliveryStatus::Succeeded);
    assert_eq!(still_succeeded.attempts, 1);
}

#[tokio::test]
async fn due_selection_failure_surfaces_as_tick_error() {
    let storage = Arc::new(MockDeliveryStorage::new());
    let clock = test_clock();

    storage.inject_claim_error("simulated database failure").await;

    let result = processor(&storage, &clock).process_due(50).await;
    assert!(result.is_err());
}
