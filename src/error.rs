//! Unified error handling for the dawnbell crate
//!
//! This module provides a unified error type that consolidates all domain-specific
//! errors into a single `Error` enum, while maintaining the ability to use
//! domain-specific errors when needed.
//!
//! Contention and rate-limit outcomes are not errors in this crate: they are
//! returned as typed variants (`AcquireOutcome`, `Admission`, `TickOutcome`).
//! Only genuine failures land here.
//!
//! # Architecture
//!
//! - [`DawnbellErrorTrait`] - Common interface implemented by all error types
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Unified error enum wrapping all domain-specific errors
//!
//! # Usage
//!
//! ```rust,ignore
//! use dawnbell::error::{Error, ErrorCategory, DawnbellErrorTrait};
//!
//! fn handle_error(err: Error) {
//!     if err.is_recoverable() {
//!         tracing::warn!(category = ?err.category(), "Retrying: {err}");
//!     }
//!     err.report("reserve");
//! }
//! ```

use thiserror::Error;

// Re-export domain-specific errors for convenience
pub use crate::executor::ExecutorError;
pub use crate::lock::LockError;
pub use crate::notifications::NotifyError;
pub use crate::ratelimit::RateLimitError;
pub use crate::scheduler::error::SchedulerError;
pub use crate::storage::LedgerError;

/// Common trait for all dawnbell error types
///
/// This trait provides a unified interface for error handling across
/// all modules, enabling consistent error processing strategies.
pub trait DawnbellErrorTrait: std::error::Error {
    /// Check if this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Shared store unreachable or pool exhausted
    Backend,
    /// Broadcast content/delivery failed after the gate was won
    Executor,
    /// Client exceeded a rate window, or limiter state unavailable
    RateLimit,
    /// Configuration and validation errors
    Config,
    /// Outbound HTTP errors (notifier, executor transport)
    Network,
    /// Scheduler and timing errors
    Scheduler,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Short lowercase label for logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Backend => "backend",
            Self::Executor => "executor",
            Self::RateLimit => "rate_limit",
            Self::Config => "config",
            Self::Network => "network",
            Self::Scheduler => "scheduler",
            Self::Other => "other",
        }
    }
}

/// Unified error type for the dawnbell crate
#[derive(Error, Debug)]
pub enum Error {
    /// Scheduler and timing errors
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// Reservation ledger errors
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Advisory lock errors
    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    /// Lock backend failure reported by an acquisition attempt
    #[error("Lock backend unavailable: {0}")]
    LockBackend(String),

    /// Broadcast executor errors
    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),

    /// Notification delivery errors
    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),

    /// Rate limiter errors
    #[error("Rate limiter error: {0}")]
    RateLimit(#[from] RateLimitError),
}

impl DawnbellErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Scheduler(e) => e.is_recoverable(),
            Self::Ledger(e) => e.is_recoverable(),
            Self::Lock(e) => e.is_recoverable(),
            Self::LockBackend(_) => true,
            Self::Executor(_) => false, // never retried within the same day
            Self::Notify(e) => e.is_recoverable(),
            Self::RateLimit(_) => true,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Scheduler(e) => e.category(),
            Self::Ledger(e) => e.category(),
            Self::Lock(e) => e.category(),
            Self::LockBackend(_) => ErrorCategory::Backend,
            Self::Executor(_) => ErrorCategory::Executor,
            Self::Notify(e) => e.category(),
            Self::RateLimit(_) => ErrorCategory::RateLimit,
        }
    }
}

impl Error {
    /// Log a handled failure with its category and count it in
    /// `dawnbell_errors_total{operation, category}`
    pub fn report(&self, operation: &str) {
        let category = self.category();
        let recoverable = self.is_recoverable();
        crate::metrics::record_error(operation, category.as_str());

        if recoverable {
            tracing::warn!(operation, category = category.as_str(), recoverable, error = %self, "Operation failed");
        } else {
            tracing::error!(operation, category = category.as_str(), recoverable, error = %self, "Operation failed");
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
