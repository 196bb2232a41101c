//! Internal scheduler loop
//!
//! Periodically runs a gate tick in-process. It is one trigger among
//! several (external pinger, manual API), so it carries no coordination of
//! its own: the gate decides whether anything is sent.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use super::error::{SchedulerError, SchedulerResult};
use super::gate::{BroadcastGate, TickOutcome, TriggerSource};
use crate::metrics;

/// Default interval between ticks
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(300);

/// Last tick seen by the loop
#[derive(Debug, Clone)]
struct LastCheck {
    at: DateTime<Utc>,
    outcome: &'static str,
}

/// Periodic driver for [`BroadcastGate::tick`]
pub struct BroadcastScheduler {
    gate: Arc<BroadcastGate>,
    check_interval: Duration,
    is_running: Arc<RwLock<bool>>,
    last_check: Arc<RwLock<Option<LastCheck>>>,
}

impl BroadcastScheduler {
    pub fn new(gate: Arc<BroadcastGate>) -> Self {
        Self {
            gate,
            check_interval: DEFAULT_CHECK_INTERVAL,
            is_running: Arc::new(RwLock::new(false)),
            last_check: Arc::new(RwLock::new(None)),
        }
    }

    pub fn with_check_interval(mut self, interval: Duration) -> SchedulerResult<Self> {
        if interval.is_zero() {
            return Err(SchedulerError::invalid_config(
                "check_interval_secs",
                "must be greater than 0",
            ));
        }
        self.check_interval = interval;
        Ok(self)
    }

    pub fn gate(&self) -> &Arc<BroadcastGate> {
        &self.gate
    }

    /// Run until [`stop`](Self::stop) is called; ticks once immediately
    pub async fn start(&self) -> SchedulerResult<()> {
        {
            let mut running = self.is_running.write().await;
            if *running {
                return Err(SchedulerError::LoopFailed {
                    reason: "scheduler already running".to_string(),
                });
            }
            *running = true;
        }
        metrics::set_scheduler_running(true);
        tracing::info!(
            interval_secs = self.check_interval.as_secs(),
            "Internal broadcast scheduler started"
        );

        while *self.is_running.read().await {
            self.run_once().await;

            tokio::select! {
                _ = tokio::time::sleep(self.check_interval) => {}
                _ = self.wait_for_stop() => {
                    break;
                }
            }
        }

        metrics::set_scheduler_running(false);
        tracing::info!("Internal broadcast scheduler stopped");
        Ok(())
    }

    /// Stop the loop
    pub async fn stop(&self) {
        *self.is_running.write().await = false;
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    /// One scheduled tick, recorded for status
    pub async fn run_once(&self) -> TickOutcome {
        let outcome = self.gate.tick(TriggerSource::InternalScheduler, None).await;

        match &outcome {
            TickOutcome::ExecutorFailed { .. } | TickOutcome::BackendUnavailable { .. } => {
                tracing::warn!(outcome = outcome.label(), "Scheduler tick: {}", outcome.message());
            }
            _ => {
                tracing::debug!(outcome = outcome.label(), "Scheduler tick: {}", outcome.message());
            }
        }

        *self.last_check.write().await = Some(LastCheck {
            at: Utc::now(),
            outcome: outcome.label(),
        });
        outcome
    }

    pub async fn status(&self) -> SchedulerStatus {
        let last = self.last_check.read().await.clone();
        SchedulerStatus {
            running: *self.is_running.read().await,
            check_interval_secs: self.check_interval.as_secs(),
            last_check: last.as_ref().map(|l| l.at),
            last_outcome: last.map(|l| l.outcome.to_string()),
        }
    }

    async fn wait_for_stop(&self) {
        loop {
            if !*self.is_running.read().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

/// Scheduler loop status
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub running: bool,
    pub check_interval_secs: u64,
    pub last_check: Option<DateTime<Utc>>,
    pub last_outcome: Option<String>,
}

impl SchedulerStatus {
    /// Format status for display
    pub fn display(&self) -> String {
        let mut output = String::new();
        output.push_str("=== Broadcast Scheduler ===\n");
        output.push_str(&format!("Running: {}\n", self.running));
        output.push_str(&format!("Check interval: {}s\n", self.check_interval_secs));
        match (&self.last_check, &self.last_outcome) {
            (Some(at), Some(outcome)) => {
                output.push_str(&format!("Last check: {} ({})\n", at.to_rfc3339(), outcome));
            }
            _ => output.push_str("Last check: never\n"),
        }
        output
    }
}
