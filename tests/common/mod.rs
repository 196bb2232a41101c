//! Common test utilities

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use dawnbell::executor::{BroadcastExecutor, BroadcastRequest, ExecutionReport, ExecutorError};
use dawnbell::lock::MemoryLockManager;
use dawnbell::notifications::{CoordinationEvent, Notifier, NotifyResult};
use dawnbell::scheduler::{BroadcastGate, WindowSchedule};
use dawnbell::storage::InMemoryReservationLedger;

/// Executor that counts calls and returns a fixed report
pub struct RecordingExecutor {
    calls: AtomicUsize,
    report: ExecutionReport,
    fail_with: Option<String>,
    delay: Duration,
    requests: Mutex<Vec<BroadcastRequest>>,
}

impl RecordingExecutor {
    pub fn new(success_count: u32, failed_count: u32) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            report: ExecutionReport::new(success_count, failed_count),
            fail_with: None,
            delay: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: impl Into<String>) -> Self {
        let mut executor = Self::new(0, 0);
        executor.fail_with = Some(error.into());
        executor
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<BroadcastRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl BroadcastExecutor for RecordingExecutor {
    async fn execute(&self, request: &BroadcastRequest) -> Result<ExecutionReport, ExecutorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.fail_with {
            Some(error) => Err(ExecutorError::Failed(error.clone())),
            None => Ok(self.report.clone()),
        }
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// Notifier that keeps every event kind it saw
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<&'static str>>,
}

impl RecordingNotifier {
    pub fn kinds(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, event: &CoordinationEvent) -> NotifyResult<()> {
        self.events.lock().unwrap().push(event.kind());
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// Gate over in-memory backends with the default windows (UTC+03:00)
pub struct Harness {
    pub gate: Arc<BroadcastGate>,
    pub locks: MemoryLockManager,
    pub ledger: InMemoryReservationLedger,
    pub executor: Arc<RecordingExecutor>,
    pub notifier: Arc<RecordingNotifier>,
}

impl Harness {
    pub fn new(executor: RecordingExecutor) -> Self {
        Self::with_ledger(executor, InMemoryReservationLedger::new())
    }

    /// Build a fresh gate over an existing ledger, as after a restart
    pub fn with_ledger(executor: RecordingExecutor, ledger: InMemoryReservationLedger) -> Self {
        let locks = MemoryLockManager::new();
        let executor = Arc::new(executor);
        let notifier = Arc::new(RecordingNotifier::default());
        let gate = BroadcastGate::new(
            Arc::new(locks.clone()),
            Arc::new(ledger.clone()),
            executor.clone(),
            WindowSchedule::with_defaults(),
        )
        .with_notifier(notifier.clone());

        Self {
            gate: Arc::new(gate),
            locks,
            ledger,
            executor,
            notifier,
        }
    }
}

/// UTC instant for a local (UTC+03:00) wall-clock time on 2025-09-26
pub fn local(hour: u32, minute: u32) -> DateTime<Utc> {
    let utc_hour = (hour + 24 - 3) % 24;
    let day = if hour < 3 { 25 } else { 26 };
    Utc.with_ymd_and_hms(2025, 9, day, utc_hour, minute, 0).unwrap()
}
