// Core data structures for broadcast coordination

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Slot key used by the once-a-day broadcast types
pub const DAILY_SLOT_KEY: &str = "daily";

/// Broadcast type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BroadcastType {
    Wisdom,
    Quiz,
    Manual,
}

impl BroadcastType {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wisdom => "wisdom",
            Self::Quiz => "quiz",
            Self::Manual => "manual",
        }
    }

    /// Create from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "wisdom" => Some(Self::Wisdom),
            "quiz" => Some(Self::Quiz),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }

    /// Types driven by the window scheduler
    pub fn scheduled() -> Vec<Self> {
        vec![Self::Wisdom, Self::Quiz]
    }
}

impl std::fmt::Display for BroadcastType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The unit of work that may be claimed at most once
///
/// Scheduled types use [`DAILY_SLOT_KEY`], so `(date, type)` is unique per day.
/// Manual overrides carry an hour-granularity identity such as `2025-09-26T14`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BroadcastSlot {
    pub date: NaiveDate,
    pub broadcast_type: BroadcastType,
    pub slot_key: String,
}

impl BroadcastSlot {
    /// Slot for a scheduled once-a-day broadcast
    pub fn daily(broadcast_type: BroadcastType, date: NaiveDate) -> Self {
        Self {
            date,
            broadcast_type,
            slot_key: DAILY_SLOT_KEY.to_string(),
        }
    }

    /// Slot for a manual override keyed by a caller-supplied identity
    pub fn manual(date: NaiveDate, identity: impl Into<String>) -> Self {
        Self {
            date,
            broadcast_type: BroadcastType::Manual,
            slot_key: identity.into(),
        }
    }

    /// Resource key for the advisory lock guarding this slot
    pub fn lock_key(&self) -> String {
        match self.broadcast_type {
            BroadcastType::Manual => format!("broadcast:manual:{}", self.slot_key),
            other => format!("broadcast:{}:{}", other.as_str(), self.date.format("%Y-%m-%d")),
        }
    }
}

impl std::fmt::Display for BroadcastSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}@{}/{}",
            self.broadcast_type,
            self.date.format("%Y-%m-%d"),
            self.slot_key
        )
    }
}

/// Identity of a ledger row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReservationId(pub i64);

impl std::fmt::Display for ReservationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reservation lifecycle: `reserved -> sending -> completed | failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Reserved,
    Sending,
    Completed,
    Failed,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reserved => "reserved",
            Self::Sending => "sending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "reserved" => Some(Self::Reserved),
            "sending" => Some(Self::Sending),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Whether the row has reached a final state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Durable record of a claimed slot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationRecord {
    pub id: ReservationId,
    pub slot: BroadcastSlot,
    pub status: ReservationStatus,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub successful_deliveries: u32,
    pub failed_deliveries: u32,
    pub topic: Option<String>,
    pub error_message: Option<String>,
}

/// Final outcome written back to a reservation after execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub status: ReservationStatus,
    pub successful_deliveries: u32,
    pub failed_deliveries: u32,
    pub topic: Option<String>,
    pub error_message: Option<String>,
}

impl Completion {
    /// Delivery finished with the given counts
    pub fn delivered(successful: u32, failed: u32) -> Self {
        Self {
            status: ReservationStatus::Completed,
            successful_deliveries: successful,
            failed_deliveries: failed,
            topic: None,
            error_message: None,
        }
    }

    /// Executor failed; the slot stays claimed
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: ReservationStatus::Failed,
            successful_deliveries: 0,
            failed_deliveries: 0,
            topic: None,
            error_message: Some(error.into()),
        }
    }

    pub fn with_topic(mut self, topic: Option<String>) -> Self {
        self.topic = topic;
        self
    }
}
