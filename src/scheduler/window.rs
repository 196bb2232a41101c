//! Broadcast windows and time-of-day classification
//!
//! A tick is classified purely from wall-clock time in a fixed reference
//! timezone. Windows are half-open `[start, end)`. A time that matches no
//! window, or more than one, is `Dormant`.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Offset, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::error::{SchedulerError, SchedulerResult};
use crate::models::BroadcastType;

/// Largest accepted distance from UTC, in minutes
pub const MAX_UTC_OFFSET_MINUTES: i32 = 18 * 60;

/// Default reference timezone (UTC+03:00)
pub const DEFAULT_UTC_OFFSET_MINUTES: i32 = 180;

// ============================================================================
// Broadcast Window
// ============================================================================

/// A time-of-day range during which one broadcast type may fire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastWindow {
    /// Window name (e.g. "morning")
    pub name: String,

    /// Inclusive start, reference timezone
    #[serde(with = "hhmm")]
    pub start: NaiveTime,

    /// Exclusive end, reference timezone
    #[serde(with = "hhmm")]
    pub end: NaiveTime,

    /// Broadcast fired in this window
    pub broadcast_type: BroadcastType,
}

impl BroadcastWindow {
    /// Create a new window
    pub fn new(
        name: impl Into<String>,
        start: NaiveTime,
        end: NaiveTime,
        broadcast_type: BroadcastType,
    ) -> Self {
        Self {
            name: name.into(),
            start,
            end,
            broadcast_type,
        }
    }

    /// Create a window from `HH:MM` strings
    pub fn parse(
        name: impl Into<String>,
        start: &str,
        end: &str,
        broadcast_type: BroadcastType,
    ) -> SchedulerResult<Self> {
        let window = Self::new(name, parse_hhmm(start)?, parse_hhmm(end)?, broadcast_type);
        window.validate()?;
        Ok(window)
    }

    /// Morning wisdom window, 06:00-12:00
    pub fn morning() -> Self {
        Self::new("morning", hm(6, 0), hm(12, 0), BroadcastType::Wisdom)
    }

    /// Evening quiz window, 18:00-23:00
    pub fn evening() -> Self {
        Self::new("evening", hm(18, 0), hm(23, 0), BroadcastType::Quiz)
    }

    /// Whether `time` falls inside `[start, end)`
    pub fn contains(&self, time: NaiveTime) -> bool {
        self.start <= time && time < self.end
    }

    /// Whether two windows share any instant
    pub fn overlaps(&self, other: &BroadcastWindow) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Validate a single window
    pub fn validate(&self) -> SchedulerResult<()> {
        if self.name.trim().is_empty() {
            return Err(SchedulerError::invalid_window("", "name cannot be empty"));
        }

        if self.start >= self.end {
            return Err(SchedulerError::invalid_window(
                &self.name,
                format!(
                    "start {} must precede end {}",
                    self.start.format("%H:%M"),
                    self.end.format("%H:%M")
                ),
            ));
        }

        if self.broadcast_type == BroadcastType::Manual {
            return Err(SchedulerError::invalid_window(
                &self.name,
                "manual broadcasts are not window-driven",
            ));
        }

        Ok(())
    }
}

/// Default window set: morning wisdom and evening quiz
pub fn default_windows() -> Vec<BroadcastWindow> {
    vec![BroadcastWindow::morning(), BroadcastWindow::evening()]
}

/// Validate a set of windows: each well-formed and pairwise disjoint
pub fn validate_windows(windows: &[BroadcastWindow]) -> SchedulerResult<()> {
    if windows.is_empty() {
        return Err(SchedulerError::NoWindows);
    }

    for window in windows {
        window.validate()?;
    }

    for (i, a) in windows.iter().enumerate() {
        for b in &windows[i + 1..] {
            if a.overlaps(b) {
                return Err(SchedulerError::OverlappingWindows {
                    first: a.name.clone(),
                    second: b.name.clone(),
                });
            }
        }
    }

    Ok(())
}

/// Parse an `HH:MM` time of day
pub fn parse_hhmm(value: &str) -> SchedulerResult<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M").map_err(|_| SchedulerError::InvalidTime {
        value: value.to_string(),
    })
}

fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}

mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_hhmm(&raw).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Classification
// ============================================================================

/// Classification of a single tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowState {
    /// No broadcast is due
    Dormant,

    /// Inside a configured window
    Active {
        window: String,
        broadcast_type: BroadcastType,
    },
}

impl WindowState {
    /// Window name, or "dormant"
    pub fn label(&self) -> &str {
        match self {
            Self::Dormant => "dormant",
            Self::Active { window, .. } => window,
        }
    }

    pub fn broadcast_type(&self) -> Option<BroadcastType> {
        match self {
            Self::Dormant => None,
            Self::Active { broadcast_type, .. } => Some(*broadcast_type),
        }
    }

    pub fn is_dormant(&self) -> bool {
        matches!(self, Self::Dormant)
    }
}

/// Upcoming window start
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NextWindow {
    pub name: String,
    pub broadcast_type: BroadcastType,
    pub starts_at: DateTime<FixedOffset>,
}

/// Validated window set bound to a reference timezone
#[derive(Debug, Clone)]
pub struct WindowSchedule {
    windows: Vec<BroadcastWindow>,
    offset: FixedOffset,
}

impl WindowSchedule {
    /// Create a schedule; rejects malformed or overlapping windows
    pub fn new(windows: Vec<BroadcastWindow>, utc_offset_minutes: i32) -> SchedulerResult<Self> {
        validate_windows(&windows)?;
        let offset = offset_from_minutes(utc_offset_minutes)?;
        Ok(Self { windows, offset })
    }

    /// Default windows at UTC+03:00
    pub fn with_defaults() -> Self {
        Self {
            windows: default_windows(),
            offset: offset_from_minutes(DEFAULT_UTC_OFFSET_MINUTES).unwrap_or_else(|_| Utc.fix()),
        }
    }

    pub fn windows(&self) -> &[BroadcastWindow] {
        &self.windows
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Wall-clock time in the reference timezone
    pub fn local(&self, now: DateTime<Utc>) -> DateTime<FixedOffset> {
        now.with_timezone(&self.offset)
    }

    /// Calendar date in the reference timezone
    pub fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        self.local(now).date_naive()
    }

    /// Classify a time of day
    pub fn classify_time(&self, time: NaiveTime) -> WindowState {
        let mut matching = self.windows.iter().filter(|w| w.contains(time));
        match (matching.next(), matching.next()) {
            (Some(window), None) => WindowState::Active {
                window: window.name.clone(),
                broadcast_type: window.broadcast_type,
            },
            // No match, or ambiguous overlap
            _ => WindowState::Dormant,
        }
    }

    /// Classify an instant
    pub fn classify(&self, now: DateTime<Utc>) -> WindowState {
        self.classify_time(self.local(now).time())
    }

    /// The next window start strictly after `now`
    pub fn next_window(&self, now: DateTime<Utc>) -> Option<NextWindow> {
        let local = self.local(now);
        let today = local.date_naive();
        let time = local.time();

        self.windows
            .iter()
            .filter_map(|window| {
                let day = if window.start > time {
                    today
                } else {
                    today.succ_opt()?
                };
                let starts_at = self
                    .offset
                    .from_local_datetime(&day.and_time(window.start))
                    .single()?;
                Some(NextWindow {
                    name: window.name.clone(),
                    broadcast_type: window.broadcast_type,
                    starts_at,
                })
            })
            .min_by_key(|next| next.starts_at)
    }
}

/// Convert minutes east of UTC into a fixed offset
pub fn offset_from_minutes(minutes: i32) -> SchedulerResult<FixedOffset> {
    if minutes.abs() > MAX_UTC_OFFSET_MINUTES {
        return Err(SchedulerError::InvalidOffset { minutes });
    }
    FixedOffset::east_opt(minutes * 60).ok_or(SchedulerError::InvalidOffset { minutes })
}
