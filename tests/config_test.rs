//! Tests for configuration loading

use std::io::Write;

use dawnbell::config::Config;
use dawnbell::models::BroadcastType;
use serial_test::serial;
use tempfile::NamedTempFile;

const ENV_KEYS: &[&str] = &[
    "DAWNBELL_BIND",
    "DAWNBELL_ADMIN_SECRET",
    "DATABASE_URL",
    "POSTGRES_URL",
    "DAWNBELL_POOL_SIZE",
    "DAWNBELL_UTC_OFFSET_MINUTES",
    "DAWNBELL_INTERNAL_SCHEDULER",
    "DAWNBELL_EXECUTOR_URL",
    "DAWNBELL_EXECUTOR_TOKEN",
    "DAWNBELL_NOTIFY_WEBHOOK",
    "DAWNBELL_LOG_LEVEL",
    "DAWNBELL_LOG_FORMAT",
];

fn clear_env() {
    for key in ENV_KEYS {
        std::env::remove_var(key);
    }
}

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_toml_overrides_only_given_keys() {
    let file = write_config(
        r#"
[server]
bind_address = "127.0.0.1:9090"
admin_secret = "s3cret"

[database]
postgres_url = "postgres://dawnbell@localhost/dawnbell"
pool_size = 4

[schedule]
utc_offset_minutes = 120

[[schedule.windows]]
name = "sunrise"
start = "05:30"
end = "09:00"
broadcast_type = "wisdom"

[[schedule.windows]]
name = "night"
start = "20:00"
end = "22:30"
broadcast_type = "quiz"

[rate_limit.default_rule]
burst_limit = 5
per_minute = 30
per_hour = 300
"#,
    );

    let config = Config::from_file(file.path()).unwrap();
    config.validate().unwrap();

    assert_eq!(config.server.bind_address.port(), 9090);
    assert_eq!(config.server.admin_secret.as_deref(), Some("s3cret"));
    assert_eq!(config.database.pool_size, 4);
    assert_eq!(config.schedule.utc_offset_minutes, 120);
    assert_eq!(config.schedule.windows.len(), 2);
    assert_eq!(config.schedule.windows[0].name, "sunrise");
    assert_eq!(config.schedule.windows[1].broadcast_type, BroadcastType::Quiz);
    assert_eq!(config.rate_limit.default_rule.burst_limit, 5);

    // Untouched sections keep their defaults
    assert_eq!(config.schedule.lock_timeout_secs, 5);
    assert_eq!(config.rate_limit.endpoint_rules.len(), 3);
    assert_eq!(config.logging.level, "info");

    let schedule = config.schedule.window_schedule().unwrap();
    assert_eq!(schedule.windows().len(), 2);
}

#[test]
fn test_invalid_window_time_fails_to_load() {
    let file = write_config(
        r#"
[[schedule.windows]]
name = "broken"
start = "25:00"
end = "26:00"
broadcast_type = "wisdom"
"#,
    );

    assert!(Config::from_file(file.path()).is_err());
}

#[test]
fn test_reversed_window_fails_validation() {
    let file = write_config(
        r#"
[[schedule.windows]]
name = "backwards"
start = "12:00"
end = "06:00"
broadcast_type = "wisdom"
"#,
    );

    let config = Config::from_file(file.path()).unwrap();
    assert!(config.validate().is_err());
}

#[test]
fn test_zero_rate_limit_fails_validation() {
    let file = write_config(
        r#"
[rate_limit.default_rule]
burst_limit = 0
per_minute = 10
per_hour = 100
"#,
    );

    let config = Config::from_file(file.path()).unwrap();
    assert!(config.validate().is_err());
}

#[test]
fn test_missing_file_is_an_error() {
    assert!(Config::from_file(std::path::Path::new("/nonexistent/dawnbell.toml")).is_err());
}

#[test]
#[serial]
fn test_from_env_defaults() {
    clear_env();

    let config = Config::from_env().unwrap();
    assert!(config.validate().is_ok());
    assert!(config.database.postgres_url.is_none());
    assert!(config.server.admin_secret.is_none());
    assert_eq!(config.schedule.utc_offset_minutes, 180);
    assert!(!config.schedule.enable_internal_scheduler);
}

#[test]
#[serial]
fn test_from_env_overrides() {
    clear_env();
    std::env::set_var("DAWNBELL_BIND", "127.0.0.1:7000");
    std::env::set_var("DAWNBELL_ADMIN_SECRET", "from-env");
    std::env::set_var("POSTGRES_URL", "postgres://localhost/fallback");
    std::env::set_var("DAWNBELL_UTC_OFFSET_MINUTES", "-300");
    std::env::set_var("DAWNBELL_INTERNAL_SCHEDULER", "true");
    std::env::set_var("DAWNBELL_EXECUTOR_URL", "https://content.example.com/broadcast");
    std::env::set_var("DAWNBELL_LOG_FORMAT", "json");

    let config = Config::from_env().unwrap();
    clear_env();

    assert!(config.validate().is_ok());
    assert_eq!(config.server.bind_address.port(), 7000);
    assert_eq!(config.server.admin_secret.as_deref(), Some("from-env"));
    assert_eq!(
        config.database.postgres_url.as_deref(),
        Some("postgres://localhost/fallback")
    );
    assert_eq!(config.schedule.utc_offset_minutes, -300);
    assert!(config.schedule.enable_internal_scheduler);
    assert_eq!(
        config.executor.url.as_deref(),
        Some("https://content.example.com/broadcast")
    );
    assert_eq!(config.logging.format, "json");
}

#[test]
#[serial]
fn test_from_env_rejects_bad_bind() {
    clear_env();
    std::env::set_var("DAWNBELL_BIND", "not-an-address");

    let result = Config::from_env();
    clear_env();

    assert!(result.is_err());
}
