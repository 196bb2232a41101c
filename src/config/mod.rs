//! Configuration management for dawnbell
//!
//! This module handles loading and validating configuration from environment variables
//! and TOML files. Every section has serde defaults, so a file only needs the keys it
//! changes.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::coordinator::ServerConfig;
use crate::executor::ExecutorConfig;
use crate::ratelimit::RateLimitConfig;
use crate::scheduler::window::{default_windows, offset_from_minutes, validate_windows};
use crate::scheduler::{BroadcastWindow, WindowSchedule, DEFAULT_UTC_OFFSET_MINUTES};
use crate::storage::DatabaseConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,

    /// Coordination store configuration
    pub database: DatabaseConfig,

    /// Window schedule and gate timing
    pub schedule: ScheduleConfig,

    /// Trigger endpoint rate limits
    pub rate_limit: RateLimitConfig,

    /// Broadcast executor binding
    pub executor: ExecutorConfig,

    /// Event notifications
    pub notifier: NotifierConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Window schedule configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Reference timezone as minutes east of UTC
    pub utc_offset_minutes: i32,

    /// Broadcast windows
    pub windows: Vec<BroadcastWindow>,

    /// Seconds between internal scheduler ticks
    pub check_interval_secs: u64,

    /// Run the in-process scheduler loop alongside the server
    pub enable_internal_scheduler: bool,

    /// Bound on one lock round-trip in seconds
    pub lock_timeout_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: DEFAULT_UTC_OFFSET_MINUTES,
            windows: default_windows(),
            check_interval_secs: 300,
            enable_internal_scheduler: false,
            lock_timeout_secs: 5,
        }
    }
}

impl ScheduleConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    /// Build the validated window schedule
    pub fn window_schedule(&self) -> Result<WindowSchedule> {
        WindowSchedule::new(self.windows.clone(), self.utc_offset_minutes)
            .context("Invalid broadcast schedule")
    }
}

/// Notification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// Webhook receiving coordination events; log-only when unset
    pub webhook_url: Option<String>,

    /// Optional bearer token for the webhook
    pub auth_token: Option<String>,

    /// Maximum retry attempts per event
    pub max_retries: u32,

    /// Maximum webhook posts per minute
    pub per_minute: u32,

    /// Upper bound on one notification, retries included, before the gate moves on
    pub timeout_secs: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            auth_token: None,
            max_retries: 3,
            per_minute: 30,
            timeout_secs: 5,
        }
    }
}

impl NotifierConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(bind) = env_string("DAWNBELL_BIND") {
            config.server.bind_address = bind
                .parse()
                .with_context(|| format!("Invalid DAWNBELL_BIND address: {bind}"))?;
        }
        config.server.admin_secret = env_string("DAWNBELL_ADMIN_SECRET");

        config.database.postgres_url =
            env_string("DATABASE_URL").or_else(|| env_string("POSTGRES_URL"));
        if let Some(size) = env_parse::<usize>("DAWNBELL_POOL_SIZE") {
            config.database.pool_size = size;
        }

        if let Some(offset) = env_parse::<i32>("DAWNBELL_UTC_OFFSET_MINUTES") {
            config.schedule.utc_offset_minutes = offset;
        }
        if let Some(enabled) = env_parse::<bool>("DAWNBELL_INTERNAL_SCHEDULER") {
            config.schedule.enable_internal_scheduler = enabled;
        }

        config.executor.url = env_string("DAWNBELL_EXECUTOR_URL");
        config.executor.auth_token = env_string("DAWNBELL_EXECUTOR_TOKEN");
        config.notifier.webhook_url = env_string("DAWNBELL_NOTIFY_WEBHOOK");

        if let Some(level) = env_string("DAWNBELL_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Some(format) = env_string("DAWNBELL_LOG_FORMAT") {
            config.logging.format = format;
        }

        Ok(config)
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        self.server
            .validate()
            .map_err(|e| anyhow::anyhow!("server: {e}"))?;

        if self.database.pool_size == 0 {
            anyhow::bail!("pool_size must be greater than 0");
        }

        validate_windows(&self.schedule.windows).context("Invalid broadcast windows")?;
        offset_from_minutes(self.schedule.utc_offset_minutes)
            .context("Invalid reference timezone")?;

        if self.schedule.lock_timeout_secs == 0 {
            anyhow::bail!("lock_timeout_secs must be greater than 0");
        }

        if self.schedule.check_interval_secs == 0 {
            anyhow::bail!("check_interval_secs must be greater than 0");
        }

        self.rate_limit
            .validate()
            .map_err(|e| anyhow::anyhow!("rate_limit: {e}"))?;

        self.executor
            .validate()
            .map_err(|e| anyhow::anyhow!("executor: {e}"))?;

        if self.notifier.timeout_secs == 0 {
            anyhow::bail!("notifier timeout_secs must be greater than 0");
        }
        if let Some(url) = &self.notifier.webhook_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                anyhow::bail!("notifier webhook_url must start with http:// or https://");
            }
            if self.notifier.per_minute == 0 {
                anyhow::bail!("notifier per_minute must be greater than 0");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BroadcastType;
    use chrono::NaiveTime;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.schedule.utc_offset_minutes, 180);
        assert_eq!(config.schedule.windows.len(), 2);
    }

    #[test]
    fn test_invalid_pool_size() {
        let mut config = Config::default();
        config.database.pool_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overlapping_windows_rejected() {
        let mut config = Config::default();
        config.schedule.windows.push(BroadcastWindow::new(
            "brunch",
            NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(13, 0, 0).unwrap(),
            BroadcastType::Quiz,
        ));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_offset_out_of_range() {
        let mut config = Config::default();
        config.schedule.utc_offset_minutes = 19 * 60;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_timeout_conversion() {
        let config = Config::default();
        assert_eq!(config.schedule.lock_timeout(), Duration::from_secs(5));
        assert_eq!(config.schedule.check_interval(), Duration::from_secs(300));
    }
}
