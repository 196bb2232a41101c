//! Broadcast executor binding
//!
//! The coordination core never generates or delivers content itself. Once a
//! caller has won both gates it hands `(type, date, topic)` to a
//! [`BroadcastExecutor`] and records whatever comes back. Executor calls are
//! never retried by the core.

pub mod http;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::models::{BroadcastSlot, BroadcastType};

pub use http::{ExecutorConfig, HttpBroadcastExecutor};

/// What the executor is asked to do
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastRequest {
    pub broadcast_type: BroadcastType,
    pub date: NaiveDate,
    pub slot_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
}

impl BroadcastRequest {
    pub fn for_slot(slot: &BroadcastSlot, topic: Option<String>) -> Self {
        Self {
            broadcast_type: slot.broadcast_type,
            date: slot.date,
            slot_key: slot.slot_key.clone(),
            topic,
        }
    }
}

/// What the executor reports back
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    #[serde(default)]
    pub success_count: u32,
    #[serde(default)]
    pub failed_count: u32,
    #[serde(default)]
    pub topic: Option<String>,
}

impl ExecutionReport {
    pub fn new(success_count: u32, failed_count: u32) -> Self {
        Self {
            success_count,
            failed_count,
            topic: None,
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }
}

/// Executor failures
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("No broadcast executor configured")]
    NotConfigured,

    #[error("Invalid executor configuration: {0}")]
    InvalidConfig(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Executor returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid executor response: {0}")]
    InvalidResponse(String),

    #[error("Executor timed out after {0:?}")]
    Timeout(Duration),

    #[error("Broadcast failed: {0}")]
    Failed(String),
}

/// External collaborator that generates and delivers a broadcast
#[async_trait]
pub trait BroadcastExecutor: Send + Sync {
    async fn execute(&self, request: &BroadcastRequest) -> Result<ExecutionReport, ExecutorError>;

    /// Executor name for logs and status
    fn name(&self) -> &str;
}

/// Executor used when no content service is configured
///
/// Every call fails, so a won slot is recorded as `failed` rather than
/// silently reported as sent.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledExecutor;

#[async_trait]
impl BroadcastExecutor for DisabledExecutor {
    async fn execute(&self, request: &BroadcastRequest) -> Result<ExecutionReport, ExecutorError> {
        tracing::error!(
            broadcast_type = %request.broadcast_type,
            date = %request.date,
            "Broadcast gate won but no executor is configured"
        );
        Err(ExecutorError::NotConfigured)
    }

    fn name(&self) -> &str {
        "disabled"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serializes_camel_case() {
        let slot = BroadcastSlot::daily(
            BroadcastType::Wisdom,
            NaiveDate::from_ymd_opt(2025, 9, 26).unwrap(),
        );
        let request = BroadcastRequest::for_slot(&slot, Some("gratitude".into()));
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["broadcastType"], "wisdom");
        assert_eq!(json["date"], "2025-09-26");
        assert_eq!(json["slotKey"], "daily");
        assert_eq!(json["topic"], "gratitude");
    }

    #[test]
    fn test_report_defaults_missing_fields() {
        let report: ExecutionReport = serde_json::from_str(r#"{"successCount": 7}"#).unwrap();
        assert_eq!(report, ExecutionReport::new(7, 0));
    }

    #[tokio::test]
    async fn test_disabled_executor_fails() {
        let slot = BroadcastSlot::daily(
            BroadcastType::Quiz,
            NaiveDate::from_ymd_opt(2025, 9, 26).unwrap(),
        );
        let err = DisabledExecutor
            .execute(&BroadcastRequest::for_slot(&slot, None))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::NotConfigured));
    }
}
