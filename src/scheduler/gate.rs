//! Double-gated broadcast execution
//!
//! A tick is classified against the window schedule, then must pass two
//! gates before anything is sent:
//!
//! 1. a non-blocking advisory lock on the slot's resource key, which turns
//!    away callers racing in the same instant, and
//! 2. an insert-once reservation row, which turns away every later caller,
//!    including ones that arrive after a restart.
//!
//! The lock is held only across the reservation (and the `sending` mark) and
//! released before the executor runs. Executor failures are recorded on the
//! reservation and never unwind it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};

use crate::error::Error;
use crate::executor::{BroadcastExecutor, BroadcastRequest, ExecutionReport, ExecutorError};
use crate::lock::{AcquireOutcome, LockManager};
use crate::metrics;
use crate::models::{BroadcastSlot, BroadcastType, Completion, ReservationId};
use crate::notifications::{CoordinationEvent, LogNotifier, Notifier};
use crate::storage::ReservationLedger;

use super::window::{NextWindow, WindowSchedule, WindowState};

/// Default bound on a lock round-trip
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Default bound on one executor run
pub const DEFAULT_EXECUTOR_TIMEOUT: Duration = Duration::from_secs(600);

/// Default bound on one notifier call; the send never waits longer than this
pub const DEFAULT_NOTIFY_TIMEOUT: Duration = Duration::from_secs(5);

/// Who asked for the tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    /// In-process scheduler loop
    InternalScheduler,
    /// External pinger via the trigger endpoint with `autoSchedule`
    ExternalTrigger,
    /// Manual override via the trigger endpoint
    ManualApi,
    /// Command line
    Cli,
}

impl TriggerSource {
    /// Value stored in the reservation's `created_by` column
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InternalScheduler => "auto_scheduler",
            Self::ExternalTrigger => "external_trigger",
            Self::ManualApi => "manual_api",
            Self::Cli => "cli",
        }
    }
}

/// Result of a gate evaluation
///
/// Every variant except `ExecutorFailed` and `BackendUnavailable` is a
/// normal outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Dormant period; nothing is due
    OutsideWindow { next_window: Option<NextWindow> },

    /// The slot already has a reservation row
    AlreadySent { slot: BroadcastSlot },

    /// Another session holds the slot's lock right now
    InProgress { slot: BroadcastSlot },

    /// This caller won both gates and the executor returned
    Executed {
        slot: BroadcastSlot,
        reservation_id: ReservationId,
        report: ExecutionReport,
    },

    /// This caller won both gates but the executor failed; the slot stays claimed
    ExecutorFailed {
        slot: BroadcastSlot,
        reservation_id: ReservationId,
        error: String,
    },

    /// The shared store could not be reached; nothing was attempted
    BackendUnavailable {
        slot: BroadcastSlot,
        reason: String,
    },

    /// Dry run: classification only, no lock, no reservation, no executor
    TestMode {
        slot: Option<BroadcastSlot>,
        window: String,
    },
}

impl TickOutcome {
    /// Short label for logs, metrics and API responses
    pub fn label(&self) -> &'static str {
        match self {
            Self::OutsideWindow { .. } => "outside_window",
            Self::AlreadySent { .. } => "already_sent",
            Self::InProgress { .. } => "in_progress",
            Self::Executed { .. } => "executed",
            Self::ExecutorFailed { .. } => "executor_failed",
            Self::BackendUnavailable { .. } => "backend_unavailable",
            Self::TestMode { .. } => "test_mode",
        }
    }

    pub fn slot(&self) -> Option<&BroadcastSlot> {
        match self {
            Self::OutsideWindow { .. } => None,
            Self::TestMode { slot, .. } => slot.as_ref(),
            Self::AlreadySent { slot }
            | Self::InProgress { slot }
            | Self::Executed { slot, .. }
            | Self::ExecutorFailed { slot, .. }
            | Self::BackendUnavailable { slot, .. } => Some(slot),
        }
    }

    pub fn reservation_id(&self) -> Option<ReservationId> {
        match self {
            Self::Executed { reservation_id, .. } | Self::ExecutorFailed { reservation_id, .. } => {
                Some(*reservation_id)
            }
            _ => None,
        }
    }

    /// True only when the slot's reservation row already exists.
    /// Lock contention is reported as `InProgress`, not as sent.
    pub fn already_sent(&self) -> bool {
        matches!(self, Self::AlreadySent { .. })
    }

    /// False only for failures
    pub fn success(&self) -> bool {
        !matches!(
            self,
            Self::ExecutorFailed { .. } | Self::BackendUnavailable { .. }
        )
    }

    pub fn sent_count(&self) -> u32 {
        match self {
            Self::Executed { report, .. } => report.success_count,
            _ => 0,
        }
    }

    pub fn failed_count(&self) -> u32 {
        match self {
            Self::Executed { report, .. } => report.failed_count,
            _ => 0,
        }
    }

    /// Human-readable description
    pub fn message(&self) -> String {
        match self {
            Self::OutsideWindow { .. } => "Outside broadcast window - no action taken".to_string(),
            Self::AlreadySent { slot } => {
                format!("{} broadcast already sent today", slot.broadcast_type)
            }
            Self::InProgress { slot } => {
                format!("{} broadcast is being handled by another caller", slot.broadcast_type)
            }
            Self::Executed { report, .. } => format!(
                "Broadcast executed: {} sent, {} failed",
                report.success_count, report.failed_count
            ),
            Self::ExecutorFailed { error, .. } => format!("Broadcast execution failed: {error}"),
            Self::BackendUnavailable { reason, .. } => {
                format!("Coordination store unavailable: {reason}")
            }
            Self::TestMode { .. } => "Test mode - no real broadcast sent".to_string(),
        }
    }
}

/// Point-in-time view of the gate for status reporting
#[derive(Debug, Clone)]
pub struct GateStatus {
    pub window: WindowState,
    pub local_time: DateTime<FixedOffset>,
    pub next_window: Option<NextWindow>,
    /// Per scheduled type: `Some(true)` if today's row exists, `None` if unknown
    pub reservations: Vec<(BroadcastType, Option<bool>)>,
}

/// Coordinates locks, reservations and the executor for one schedule
pub struct BroadcastGate {
    locks: Arc<dyn LockManager>,
    ledger: Arc<dyn ReservationLedger>,
    executor: Arc<dyn BroadcastExecutor>,
    notifier: Arc<dyn Notifier>,
    schedule: WindowSchedule,
    lock_timeout: Duration,
    executor_timeout: Duration,
    notify_timeout: Duration,
}

impl BroadcastGate {
    pub fn new(
        locks: Arc<dyn LockManager>,
        ledger: Arc<dyn ReservationLedger>,
        executor: Arc<dyn BroadcastExecutor>,
        schedule: WindowSchedule,
    ) -> Self {
        Self {
            locks,
            ledger,
            executor,
            notifier: Arc::new(LogNotifier),
            schedule,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            executor_timeout: DEFAULT_EXECUTOR_TIMEOUT,
            notify_timeout: DEFAULT_NOTIFY_TIMEOUT,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_executor_timeout(mut self, timeout: Duration) -> Self {
        self.executor_timeout = timeout;
        self
    }

    pub fn with_notify_timeout(mut self, timeout: Duration) -> Self {
        self.notify_timeout = timeout;
        self
    }

    pub fn schedule(&self) -> &WindowSchedule {
        &self.schedule
    }

    pub fn ledger(&self) -> &Arc<dyn ReservationLedger> {
        &self.ledger
    }

    pub fn locks(&self) -> &Arc<dyn LockManager> {
        &self.locks
    }

    pub fn executor_name(&self) -> &str {
        self.executor.name()
    }

    /// Run a scheduled tick now
    pub async fn tick(&self, source: TriggerSource, topic: Option<String>) -> TickOutcome {
        self.tick_at(Utc::now(), source, topic).await
    }

    /// Run a scheduled tick as if the clock read `now`
    pub async fn tick_at(
        &self,
        now: DateTime<Utc>,
        source: TriggerSource,
        topic: Option<String>,
    ) -> TickOutcome {
        let outcome = match self.schedule.classify(now) {
            WindowState::Dormant => {
                tracing::debug!(
                    local_time = %self.schedule.local(now).format("%H:%M"),
                    "Outside broadcast windows"
                );
                TickOutcome::OutsideWindow {
                    next_window: self.schedule.next_window(now),
                }
            }
            WindowState::Active {
                window,
                broadcast_type,
            } => {
                let slot = BroadcastSlot::daily(broadcast_type, self.schedule.local_date(now));
                tracing::info!(window = %window, slot = %slot, source = source.as_str(), "Broadcast window active");
                self.run_slot(slot, source, topic).await
            }
        };

        metrics::record_tick(source.as_str(), outcome.label());
        outcome
    }

    /// Manual override, keyed by `identity` or the current local hour
    ///
    /// Ignores the window schedule but still passes both gates, so two
    /// manual triggers with the same identity send at most once.
    pub async fn manual_at(
        &self,
        now: DateTime<Utc>,
        identity: Option<String>,
        topic: Option<String>,
        source: TriggerSource,
    ) -> TickOutcome {
        let identity = identity
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| self.schedule.local(now).format("%Y-%m-%dT%H").to_string());
        let slot = BroadcastSlot::manual(self.schedule.local_date(now), identity);

        let outcome = self.run_slot(slot, source, topic).await;
        metrics::record_tick(source.as_str(), outcome.label());
        outcome
    }

    /// Classification only; never locks, reserves or executes
    pub fn preview_at(&self, now: DateTime<Utc>, auto_schedule: bool) -> TickOutcome {
        let state = self.schedule.classify(now);
        let slot = if auto_schedule {
            state
                .broadcast_type()
                .map(|t| BroadcastSlot::daily(t, self.schedule.local_date(now)))
        } else {
            Some(BroadcastSlot::manual(
                self.schedule.local_date(now),
                self.schedule.local(now).format("%Y-%m-%dT%H").to_string(),
            ))
        };

        tracing::info!(window = state.label(), "Test mode - no real broadcast sent");
        TickOutcome::TestMode {
            slot,
            window: state.label().to_string(),
        }
    }

    /// Read-only status: classification plus today's reservation per type
    pub async fn status_at(&self, now: DateTime<Utc>) -> GateStatus {
        let date = self.schedule.local_date(now);

        let reservations = match self.ledger.list_for_date(date).await {
            Ok(records) => BroadcastType::scheduled()
                .into_iter()
                .map(|t| {
                    let slot = BroadcastSlot::daily(t, date);
                    (t, Some(records.iter().any(|r| r.slot == slot)))
                })
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, "Could not read reservations for status");
                BroadcastType::scheduled()
                    .into_iter()
                    .map(|t| (t, None))
                    .collect()
            }
        };

        GateStatus {
            window: self.schedule.classify(now),
            local_time: self.schedule.local(now),
            next_window: self.schedule.next_window(now),
            reservations,
        }
    }

    async fn run_slot(
        &self,
        slot: BroadcastSlot,
        source: TriggerSource,
        topic: Option<String>,
    ) -> TickOutcome {
        let resource_key = slot.lock_key();
        let mut handle = self.locks.acquire(&resource_key, self.lock_timeout).await;
        metrics::record_lock_acquisition(handle.outcome().as_str());

        match handle.outcome().clone() {
            AcquireOutcome::Acquired => {}
            AcquireOutcome::AlreadyHeld => {
                tracing::info!(slot = %slot, "Lock held elsewhere, skipping");
                return TickOutcome::InProgress { slot };
            }
            AcquireOutcome::BackendError(reason) => {
                Error::LockBackend(reason.clone()).report("lock_acquire");
                tracing::warn!(slot = %slot, "Lock not acquired, skipping");
                self.emit(CoordinationEvent::BackendUnavailable {
                    resource_key,
                    reason: reason.clone(),
                    at: Utc::now(),
                })
                .await;
                return TickOutcome::BackendUnavailable { slot, reason };
            }
        }

        let type_label = slot.broadcast_type.as_str();
        let reservation_id = match self.ledger.reserve(&slot, source.as_str()).await {
            Ok(Some(id)) => {
                metrics::record_reservation(type_label, "won");
                id
            }
            Ok(None) => {
                metrics::record_reservation(type_label, "lost");
                handle.release().await;
                tracing::info!(slot = %slot, "Slot already reserved");
                return TickOutcome::AlreadySent { slot };
            }
            Err(e) => {
                metrics::record_reservation(type_label, "error");
                handle.release().await;
                let reason = e.to_string();
                Error::from(e).report("reserve");
                tracing::warn!(slot = %slot, "Reservation failed, nothing sent");
                self.emit(CoordinationEvent::BackendUnavailable {
                    resource_key,
                    reason: reason.clone(),
                    at: Utc::now(),
                })
                .await;
                return TickOutcome::BackendUnavailable { slot, reason };
            }
        };

        if let Err(e) = self.ledger.mark_sending(reservation_id).await {
            Error::from(e).report("mark_sending");
        }
        handle.release().await;

        tracing::info!(slot = %slot, reservation_id = %reservation_id, executor = self.executor.name(), "Slot reserved, executing broadcast");
        self.emit(CoordinationEvent::BroadcastStarted {
            slot: slot.clone(),
            reservation_id,
            at: Utc::now(),
        })
        .await;

        let request = BroadcastRequest::for_slot(&slot, topic);
        let result = {
            let _timer = metrics::start_executor_timer(type_label);
            tokio::time::timeout(self.executor_timeout, self.executor.execute(&request)).await
        };

        let result = match result {
            Ok(inner) => inner,
            Err(_) => Err(ExecutorError::Timeout(self.executor_timeout)),
        }
        .map_err(|e| {
            let error = e.to_string();
            Error::from(e).report("execute");
            error
        });

        match result {
            Ok(report) => {
                metrics::record_deliveries(type_label, report.success_count, report.failed_count);
                let completion = Completion::delivered(report.success_count, report.failed_count)
                    .with_topic(report.topic.clone().or_else(|| request.topic.clone()));
                self.record_completion(reservation_id, &completion).await;

                tracing::info!(
                    slot = %slot,
                    sent = report.success_count,
                    failed = report.failed_count,
                    "Broadcast completed"
                );
                self.emit(CoordinationEvent::BroadcastCompleted {
                    slot: slot.clone(),
                    reservation_id,
                    report: report.clone(),
                    at: Utc::now(),
                })
                .await;

                TickOutcome::Executed {
                    slot,
                    reservation_id,
                    report,
                }
            }
            Err(error) => {
                let completion = Completion::failed(error.clone()).with_topic(request.topic.clone());
                self.record_completion(reservation_id, &completion).await;

                tracing::error!(slot = %slot, error = %error, "Broadcast executor failed; slot stays claimed");
                self.emit(CoordinationEvent::BroadcastFailed {
                    slot: slot.clone(),
                    reservation_id,
                    error: error.clone(),
                    at: Utc::now(),
                })
                .await;

                TickOutcome::ExecutorFailed {
                    slot,
                    reservation_id,
                    error,
                }
            }
        }
    }

    async fn record_completion(&self, id: ReservationId, completion: &Completion) {
        if let Err(e) = self.ledger.mark_completed(id, completion).await {
            tracing::warn!(reservation_id = %id, "Could not record completion");
            Error::from(e).report("mark_completed");
        }
    }

    /// Notify, bounded by `notify_timeout`; failures never reach the caller
    async fn emit(&self, event: CoordinationEvent) {
        match tokio::time::timeout(self.notify_timeout, self.notifier.notify(&event)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(notifier = self.notifier.name(), event = event.kind(), "Notifier failed");
                Error::from(e).report("notify");
            }
            Err(_) => {
                tracing::warn!(
                    notifier = self.notifier.name(),
                    event = event.kind(),
                    timeout = ?self.notify_timeout,
                    "Notifier timed out, continuing"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::DisabledExecutor;
    use crate::lock::MemoryLockManager;
    use crate::storage::InMemoryReservationLedger;
    use chrono::TimeZone;

    fn gate() -> (BroadcastGate, MemoryLockManager, InMemoryReservationLedger) {
        let locks = MemoryLockManager::new();
        let ledger = InMemoryReservationLedger::new();
        let gate = BroadcastGate::new(
            Arc::new(locks.clone()),
            Arc::new(ledger.clone()),
            Arc::new(DisabledExecutor),
            WindowSchedule::with_defaults(),
        );
        (gate, locks, ledger)
    }

    // 05:00 UTC is 08:00 at UTC+03:00
    fn morning() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 26, 5, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_outside_window_touches_nothing() {
        let (gate, locks, ledger) = gate();
        let night = Utc.with_ymd_and_hms(2025, 9, 26, 0, 0, 0).unwrap();

        let outcome = gate.tick_at(night, TriggerSource::Cli, None).await;
        match outcome {
            TickOutcome::OutsideWindow { next_window } => {
                assert_eq!(next_window.unwrap().broadcast_type, BroadcastType::Wisdom);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(ledger.is_empty());
        assert_eq!(locks.held_count(), 0);
    }

    #[tokio::test]
    async fn test_executor_failure_keeps_claim() {
        let (gate, locks, ledger) = gate();

        let first = gate.tick_at(morning(), TriggerSource::Cli, None).await;
        assert_eq!(first.label(), "executor_failed");
        assert!(!first.success());
        assert!(first.reservation_id().is_some());
        assert_eq!(locks.held_count(), 0);

        let second = gate.tick_at(morning(), TriggerSource::Cli, None).await;
        assert!(second.already_sent());
        assert_eq!(ledger.len(), 1);
    }

    #[tokio::test]
    async fn test_failures_are_counted_by_category() {
        let _ = metrics::init_metrics();
        let (gate, _locks, ledger) = gate();
        let reserve_before = metrics::error_count("reserve", "backend");
        let execute_before = metrics::error_count("execute", "executor");

        ledger.set_unavailable(true);
        let outcome = gate.tick_at(morning(), TriggerSource::Cli, None).await;
        assert_eq!(outcome.label(), "backend_unavailable");
        assert!(metrics::error_count("reserve", "backend") >= reserve_before + 1.0);

        ledger.set_unavailable(false);
        let outcome = gate.tick_at(morning(), TriggerSource::Cli, None).await;
        assert_eq!(outcome.label(), "executor_failed");
        assert!(metrics::error_count("execute", "executor") >= execute_before + 1.0);
    }

    #[tokio::test]
    async fn test_held_lock_is_in_progress() {
        let (gate, locks, ledger) = gate();
        let slot = BroadcastSlot::daily(BroadcastType::Wisdom, gate.schedule().local_date(morning()));
        let _held = locks.acquire(&slot.lock_key(), DEFAULT_LOCK_TIMEOUT).await;

        let outcome = gate.tick_at(morning(), TriggerSource::Cli, None).await;
        assert_eq!(outcome, TickOutcome::InProgress { slot });
        assert!(outcome.success());
        assert!(!outcome.already_sent());
        assert!(ledger.is_empty());
    }

    #[tokio::test]
    async fn test_preview_reserves_nothing() {
        let (gate, _locks, ledger) = gate();

        let outcome = gate.preview_at(morning(), true);
        assert_eq!(outcome.label(), "test_mode");
        assert_eq!(
            outcome.slot().map(|s| s.broadcast_type),
            Some(BroadcastType::Wisdom)
        );
        assert!(ledger.is_empty());
    }

    #[tokio::test]
    async fn test_manual_identity_defaults_to_local_hour() {
        let (gate, _locks, _ledger) = gate();

        let outcome = gate
            .manual_at(morning(), None, Some("test".into()), TriggerSource::ManualApi)
            .await;
        assert_eq!(outcome.slot().unwrap().slot_key, "2025-09-26T08");
    }

    #[tokio::test]
    async fn test_status_reports_reservations() {
        let (gate, _locks, _ledger) = gate();
        gate.tick_at(morning(), TriggerSource::Cli, None).await;

        let status = gate.status_at(morning()).await;
        assert_eq!(status.window.broadcast_type(), Some(BroadcastType::Wisdom));
        assert_eq!(
            status.reservations,
            vec![
                (BroadcastType::Wisdom, Some(true)),
                (BroadcastType::Quiz, Some(false))
            ]
        );
    }
}
