//! Coordination event notifications
//!
//! The gate reports critical events (a broadcast started, finished, failed,
//! or the store was unreachable) through an injectable [`Notifier`]. Callers
//! await the notifier but swallow its errors: a failed notification never
//! changes a gating decision.
//!
//! # Channels
//!
//! - [`LogNotifier`] - structured tracing events
//! - [`WebhookNotifier`] - JSON POST with retry and outbound pacing
//! - [`NotifierSet`] - fan-out to several channels

pub mod webhook;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{DawnbellErrorTrait, ErrorCategory};
use crate::executor::ExecutionReport;
use crate::models::{BroadcastSlot, ReservationId};

pub use webhook::{WebhookConfig, WebhookNotifier};

/// Result type for notifier operations
pub type NotifyResult<T> = Result<T, NotifyError>;

/// Errors that can occur while delivering a notification
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid channel configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Remote rejected the notification
    #[error("Rejected with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    /// Generic error
    #[error("Notification error: {0}")]
    Other(String),
}

impl DawnbellErrorTrait for NotifyError {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::Rejected { status, .. } => *status >= 500,
            Self::InvalidConfig(_) | Self::Other(_) => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidConfig(_) => ErrorCategory::Config,
            _ => ErrorCategory::Network,
        }
    }
}

// ============================================================================
// Events
// ============================================================================

/// Critical coordination events
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CoordinationEvent {
    /// Gate won; executor about to run
    BroadcastStarted {
        slot: BroadcastSlot,
        reservation_id: ReservationId,
        at: DateTime<Utc>,
    },

    /// Executor finished
    BroadcastCompleted {
        slot: BroadcastSlot,
        reservation_id: ReservationId,
        report: ExecutionReport,
        at: DateTime<Utc>,
    },

    /// Executor failed; slot stays claimed
    BroadcastFailed {
        slot: BroadcastSlot,
        reservation_id: ReservationId,
        error: String,
        at: DateTime<Utc>,
    },

    /// Shared store unreachable during a gate check
    BackendUnavailable {
        resource_key: String,
        reason: String,
        at: DateTime<Utc>,
    },
}

impl CoordinationEvent {
    /// Event name
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BroadcastStarted { .. } => "broadcast_started",
            Self::BroadcastCompleted { .. } => "broadcast_completed",
            Self::BroadcastFailed { .. } => "broadcast_failed",
            Self::BackendUnavailable { .. } => "backend_unavailable",
        }
    }

    /// Human-readable summary
    pub fn summary(&self) -> String {
        match self {
            Self::BroadcastStarted { slot, .. } => format!("Broadcast {slot} started"),
            Self::BroadcastCompleted { slot, report, .. } => format!(
                "Broadcast {slot} completed: {} sent, {} failed",
                report.success_count, report.failed_count
            ),
            Self::BroadcastFailed { slot, error, .. } => {
                format!("Broadcast {slot} failed: {error}")
            }
            Self::BackendUnavailable {
                resource_key,
                reason,
                ..
            } => format!("Coordination store unavailable for {resource_key}: {reason}"),
        }
    }
}

// ============================================================================
// Notifier Trait
// ============================================================================

/// Injectable event sink
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &CoordinationEvent) -> NotifyResult<()>;

    /// Channel name
    fn name(&self) -> &str;
}

/// Notifier that writes events to the tracing subscriber
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &CoordinationEvent) -> NotifyResult<()> {
        match event {
            CoordinationEvent::BroadcastFailed { .. } => {
                tracing::error!(event = event.kind(), "{}", event.summary());
            }
            CoordinationEvent::BackendUnavailable { .. } => {
                tracing::warn!(event = event.kind(), "{}", event.summary());
            }
            _ => {
                tracing::info!(event = event.kind(), "{}", event.summary());
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Fan-out to several notifiers; first error is returned after all ran
#[derive(Clone, Default)]
pub struct NotifierSet {
    channels: Vec<Arc<dyn Notifier>>,
}

impl NotifierSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, channel: Arc<dyn Notifier>) -> Self {
        self.channels.push(channel);
        self
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

#[async_trait]
impl Notifier for NotifierSet {
    async fn notify(&self, event: &CoordinationEvent) -> NotifyResult<()> {
        let mut first_error = None;
        for channel in &self.channels {
            if let Err(e) = channel.notify(event).await {
                tracing::warn!(channel = channel.name(), error = %e, "Notification channel failed");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn name(&self) -> &str {
        "set"
    }
}
