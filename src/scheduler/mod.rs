//! Time-window broadcast scheduling
//!
//! Decides what is due when, and drives the lock and reservation gates so
//! that each scheduled broadcast type fires at most once per reference-
//! timezone day, no matter how many triggers arrive.
//!
//! # Architecture
//!
//! ```text
//!  external pinger     internal loop      manual API / CLI
//!        │                   │                   │
//!        └──────────┬────────┴─────────┬─────────┘
//!                   ▼                  ▼
//!            ┌────────────┐     ┌────────────┐
//!            │  classify  │     │ manual slot│
//!            │  (window)  │     │ (hour id)  │
//!            └─────┬──────┘     └─────┬──────┘
//!                  └────────┬─────────┘
//!                           ▼
//!                ┌─────────────────────┐
//!                │ advisory lock (try) │──► AlreadyHeld → InProgress
//!                └──────────┬──────────┘
//!                           ▼
//!                ┌─────────────────────┐
//!                │ reserve insert-once │──► conflict → AlreadySent
//!                └──────────┬──────────┘
//!                           ▼
//!                  release lock, execute,
//!                  record completion
//! ```
//!
//! # Modules
//!
//! - [`window`] - Broadcast windows, classification, reference timezone
//! - [`gate`] - Double-gated execution and tick outcomes
//! - [`trigger`] - In-process periodic scheduler loop
//! - [`error`] - Scheduler error types
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use dawnbell::scheduler::{BroadcastGate, TriggerSource, WindowSchedule};
//! use dawnbell::lock::MemoryLockManager;
//! use dawnbell::storage::InMemoryReservationLedger;
//! use dawnbell::executor::DisabledExecutor;
//!
//! let gate = BroadcastGate::new(
//!     Arc::new(MemoryLockManager::new()),
//!     Arc::new(InMemoryReservationLedger::new()),
//!     Arc::new(DisabledExecutor),
//!     WindowSchedule::with_defaults(),
//! );
//!
//! let outcome = gate.tick(TriggerSource::Cli, None).await;
//! println!("{}: {}", outcome.label(), outcome.message());
//! ```

pub mod error;
pub mod gate;
pub mod trigger;
pub mod window;

pub use error::{SchedulerError, SchedulerResult};
pub use gate::{
    BroadcastGate, GateStatus, TickOutcome, TriggerSource, DEFAULT_EXECUTOR_TIMEOUT,
    DEFAULT_LOCK_TIMEOUT,
};
pub use trigger::{BroadcastScheduler, SchedulerStatus, DEFAULT_CHECK_INTERVAL};
pub use window::{
    default_windows, parse_hhmm, BroadcastWindow, NextWindow, WindowSchedule, WindowState,
    DEFAULT_UTC_OFFSET_MINUTES, MAX_UTC_OFFSET_MINUTES,
};
