//! HTTP executor tests against a mock content service

mod common;

use std::sync::Arc;

use chrono::NaiveDate;
use common::local;
use dawnbell::executor::{
    BroadcastExecutor, BroadcastRequest, ExecutorConfig, ExecutorError, HttpBroadcastExecutor,
};
use dawnbell::lock::MemoryLockManager;
use dawnbell::models::{BroadcastSlot, BroadcastType, ReservationStatus};
use dawnbell::scheduler::{BroadcastGate, TriggerSource, WindowSchedule};
use dawnbell::storage::{InMemoryReservationLedger, ReservationLedger};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn request() -> BroadcastRequest {
    let slot = BroadcastSlot::daily(
        BroadcastType::Quiz,
        NaiveDate::from_ymd_opt(2025, 9, 26).unwrap(),
    );
    BroadcastRequest::for_slot(&slot, Some("history".to_string()))
}

#[tokio::test]
async fn test_posts_request_and_parses_report() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/broadcast"))
        .and(header("authorization", "Bearer token-1"))
        .and(body_partial_json(json!({
            "broadcastType": "quiz",
            "date": "2025-09-26",
            "topic": "history"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "successCount": 120,
            "failedCount": 3,
            "topic": "Ancient history"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = ExecutorConfig::new(format!("{}/broadcast", server.uri())).with_auth_token("token-1");
    let executor = HttpBroadcastExecutor::new(&config).unwrap();

    let report = executor.execute(&request()).await.unwrap();
    assert_eq!(report.success_count, 120);
    assert_eq!(report.failed_count, 3);
    assert_eq!(report.topic.as_deref(), Some("Ancient history"));
}

#[tokio::test]
async fn test_error_status_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502).set_body_string("upstream down"))
        .mount(&server)
        .await;

    let executor = HttpBroadcastExecutor::new(&ExecutorConfig::new(server.uri())).unwrap();
    let err = executor.execute(&request()).await.unwrap_err();

    match err {
        ExecutorError::Status { status, body } => {
            assert_eq!(status, 502);
            assert_eq!(body, "upstream down");
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn test_malformed_report_is_invalid_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let executor = HttpBroadcastExecutor::new(&ExecutorConfig::new(server.uri())).unwrap();
    assert!(matches!(
        executor.execute(&request()).await,
        Err(ExecutorError::InvalidResponse(_))
    ));
}

#[tokio::test]
async fn test_gate_records_remote_report() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "successCount": 7,
            "failedCount": 0,
            "topic": "patience"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let ledger = InMemoryReservationLedger::new();
    let executor = HttpBroadcastExecutor::new(&ExecutorConfig::new(server.uri())).unwrap();
    let gate = BroadcastGate::new(
        Arc::new(MemoryLockManager::new()),
        Arc::new(ledger.clone()),
        Arc::new(executor),
        WindowSchedule::with_defaults(),
    );

    let first = gate.tick_at(local(8, 0), TriggerSource::Cli, None).await;
    assert_eq!(first.sent_count(), 7);
    let second = gate.tick_at(local(8, 30), TriggerSource::Cli, None).await;
    assert!(second.already_sent());

    let record = ledger
        .get(&BroadcastSlot::daily(
            BroadcastType::Wisdom,
            NaiveDate::from_ymd_opt(2025, 9, 26).unwrap(),
        ))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, ReservationStatus::Completed);
    assert_eq!(record.topic.as_deref(), Some("patience"));
}
