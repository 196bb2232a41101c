//! dawnbell - Once-a-day broadcast coordination
//!
//! Fires time-windowed broadcasts (a morning "wisdom" message, an evening
//! "quiz") at most once per reference-timezone day, no matter how many
//! external pings, internal ticks or restarts happen concurrently.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`scheduler`] - Window classification and the double-gated tick
//! - [`lock`] - Non-blocking advisory locks (PostgreSQL, in-memory)
//! - [`storage`] - Connection pool and the insert-once reservation ledger
//! - [`executor`] - Binding to the content/delivery service
//! - [`notifications`] - Coordination event notifiers
//! - [`ratelimit`] - Sliding-window admission control for the HTTP surface
//! - [`coordinator`] - Trigger/status HTTP server
//! - [`metrics`] - Prometheus metrics
//! - [`models`] - Core data structures and types
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use dawnbell::executor::DisabledExecutor;
//! use dawnbell::lock::MemoryLockManager;
//! use dawnbell::scheduler::{BroadcastGate, TriggerSource, WindowSchedule};
//! use dawnbell::storage::InMemoryReservationLedger;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let gate = BroadcastGate::new(
//!         Arc::new(MemoryLockManager::new()),
//!         Arc::new(InMemoryReservationLedger::new()),
//!         Arc::new(DisabledExecutor),
//!         WindowSchedule::with_defaults(),
//!     );
//!     let outcome = gate.tick(TriggerSource::Cli, None).await;
//!     println!("{}", outcome.message());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod lock;
pub mod metrics;
pub mod models;
pub mod notifications;
pub mod ratelimit;
pub mod scheduler;
pub mod storage;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{DawnbellErrorTrait, Error, ErrorCategory, Result};
    pub use crate::lock::{AcquireOutcome, LockManager};
    pub use crate::models::{BroadcastSlot, BroadcastType, ReservationId, ReservationStatus};
    pub use crate::ratelimit::{Admission, RateLimiter};
    pub use crate::scheduler::{BroadcastGate, TickOutcome, TriggerSource, WindowSchedule};
    pub use crate::storage::{Database, ReservationLedger};
}

// Direct re-exports for convenience
pub use models::{BroadcastSlot, BroadcastType, ReservationId};
