//! Error types for the scheduler module

use std::fmt;

use crate::error::ErrorCategory;

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Scheduler-specific errors
#[derive(Debug)]
pub enum SchedulerError {
    /// A broadcast window is malformed
    InvalidWindow {
        name: String,
        reason: String,
    },

    /// Two windows cover the same time of day
    OverlappingWindows {
        first: String,
        second: String,
    },

    /// No broadcast windows configured
    NoWindows,

    /// Time-of-day string is not `HH:MM`
    InvalidTime {
        value: String,
    },

    /// UTC offset outside the representable range
    InvalidOffset {
        minutes: i32,
    },

    /// Scheduler configuration error
    InvalidConfig {
        field: String,
        reason: String,
    },

    /// Background loop failed
    LoopFailed {
        reason: String,
    },
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidWindow { name, reason } => {
                write!(f, "Invalid broadcast window '{}': {}", name, reason)
            }
            Self::OverlappingWindows { first, second } => {
                write!(f, "Broadcast windows '{}' and '{}' overlap", first, second)
            }
            Self::NoWindows => write!(f, "At least one broadcast window is required"),
            Self::InvalidTime { value } => {
                write!(f, "Invalid time '{}'. Expected HH:MM", value)
            }
            Self::InvalidOffset { minutes } => {
                write!(f, "Invalid UTC offset: {} minutes", minutes)
            }
            Self::InvalidConfig { field, reason } => {
                write!(f, "Scheduler config error in '{}': {}", field, reason)
            }
            Self::LoopFailed { reason } => {
                write!(f, "Scheduler loop failed: {}", reason)
            }
        }
    }
}

impl std::error::Error for SchedulerError {}

impl SchedulerError {
    /// Create an invalid window error
    pub fn invalid_window(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidWindow {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid config error
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::LoopFailed { .. })
    }

    /// Error category for handling strategies
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::LoopFailed { .. } => ErrorCategory::Scheduler,
            _ => ErrorCategory::Config,
        }
    }
}
