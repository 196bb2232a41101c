//! Webhook notifier tests against a mock receiver

mod common;

use std::time::{Duration, Instant};

use chrono::{NaiveDate, Utc};
use common::{local, RecordingExecutor};
use dawnbell::executor::ExecutionReport;
use dawnbell::lock::MemoryLockManager;
use dawnbell::models::{BroadcastSlot, BroadcastType, ReservationId};
use dawnbell::notifications::{
    CoordinationEvent, Notifier, NotifierSet, NotifyError, WebhookConfig, WebhookNotifier,
};
use dawnbell::scheduler::{BroadcastGate, TriggerSource, WindowSchedule};
use dawnbell::storage::InMemoryReservationLedger;
use std::sync::Arc;
use wiremock::matchers::{body_partial_json, header, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn completed() -> CoordinationEvent {
    CoordinationEvent::BroadcastCompleted {
        slot: BroadcastSlot::daily(
            BroadcastType::Wisdom,
            NaiveDate::from_ymd_opt(2025, 9, 26).unwrap(),
        ),
        reservation_id: ReservationId(11),
        report: ExecutionReport::new(120, 3),
        at: Utc::now(),
    }
}

#[tokio::test]
async fn test_webhook_posts_event() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("authorization", "Bearer hook-token"))
        .and(body_partial_json(serde_json::json!({
            "event": "broadcast_completed"
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let notifier =
        WebhookNotifier::new(WebhookConfig::new(server.uri()).with_auth_token("hook-token"))
            .unwrap();
    notifier.notify(&completed()).await.unwrap();
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad payload"))
        .expect(1)
        .mount(&server)
        .await;

    let notifier = WebhookNotifier::from_url(server.uri()).unwrap();
    let err = notifier.notify(&completed()).await.unwrap_err();
    assert!(matches!(err, NotifyError::Rejected { status: 400, .. }));
}

#[tokio::test]
async fn test_server_error_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let notifier =
        WebhookNotifier::new(WebhookConfig::new(server.uri()).with_max_retries(1)).unwrap();
    assert!(notifier.notify(&completed()).await.is_err());
}

#[tokio::test]
async fn test_set_reports_failure_after_all_channels_ran() {
    let good = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&good)
        .await;

    let bad = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&bad)
        .await;

    let set = NotifierSet::new()
        .with(Arc::new(WebhookNotifier::from_url(bad.uri()).unwrap()))
        .with(Arc::new(WebhookNotifier::from_url(good.uri()).unwrap()));

    assert_eq!(set.len(), 2);
    assert!(set.notify(&completed()).await.is_err());
}

#[tokio::test]
async fn test_slow_webhook_does_not_hold_the_broadcast() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_delay(Duration::from_secs(30)))
        .mount(&server)
        .await;

    let executor = Arc::new(RecordingExecutor::new(40, 0));
    let gate = BroadcastGate::new(
        Arc::new(MemoryLockManager::new()),
        Arc::new(InMemoryReservationLedger::new()),
        executor.clone(),
        WindowSchedule::with_defaults(),
    )
    .with_notifier(Arc::new(WebhookNotifier::from_url(server.uri()).unwrap()))
    .with_notify_timeout(Duration::from_millis(200));

    let started = Instant::now();
    let outcome = gate
        .tick_at(local(8, 0), TriggerSource::ExternalTrigger, None)
        .await;

    assert_eq!(outcome.label(), "executed");
    assert_eq!(executor.calls(), 1);
    // Started and completed events each wait at most the notify timeout
    assert!(started.elapsed() < Duration::from_secs(5));
}
