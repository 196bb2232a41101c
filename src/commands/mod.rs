pub mod broadcast;
pub mod serve;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use dawnbell::config::Config;
use dawnbell::executor::{BroadcastExecutor, DisabledExecutor, HttpBroadcastExecutor};
use dawnbell::lock::{LockManager, MemoryLockManager, PostgresLockManager};
use dawnbell::notifications::{LogNotifier, NotifierSet, WebhookConfig, WebhookNotifier};
use dawnbell::scheduler::BroadcastGate;
use dawnbell::storage::{
    Database, InMemoryReservationLedger, PostgresReservationLedger, ReservationLedger,
};

// Re-export command functions for convenience
pub use broadcast::{init_db, manual, status, tick};
pub use serve::{serve, ServeParams};

/// Load configuration from a TOML file, or from the environment when no path is given
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Everything a command needs to run the gate
pub struct Components {
    pub gate: Arc<BroadcastGate>,
    pub database: Option<Database>,
    pub pg_locks: Option<PostgresLockManager>,
}

/// Wire backends, executor and notifiers from configuration
pub fn build_components(config: &Config) -> Result<Components> {
    let schedule = config.schedule.window_schedule()?;

    let database = match &config.database.postgres_url {
        Some(_) => Some(Database::connect(&config.database)?),
        None => {
            tracing::warn!(
                "No DATABASE_URL configured; using process-local locks and reservations (single instance only)"
            );
            None
        }
    };
    let pg_locks = database
        .as_ref()
        .map(|db| PostgresLockManager::new(db.pool().clone()));

    let locks: Arc<dyn LockManager> = match &pg_locks {
        Some(pg_locks) => Arc::new(pg_locks.clone()),
        None => Arc::new(MemoryLockManager::new()),
    };
    let ledger: Arc<dyn ReservationLedger> = match &database {
        Some(db) => Arc::new(PostgresReservationLedger::new(
            db.pool().clone(),
            config.database.statement_timeout(),
        )),
        None => Arc::new(InMemoryReservationLedger::new()),
    };

    let executor: Arc<dyn BroadcastExecutor> = if config.executor.url.is_some() {
        Arc::new(
            HttpBroadcastExecutor::new(&config.executor)
                .context("Failed to create broadcast executor")?,
        )
    } else {
        tracing::warn!("No executor URL configured; winning ticks will be recorded as failed");
        Arc::new(DisabledExecutor)
    };

    let mut notifier = NotifierSet::new().with(Arc::new(LogNotifier));
    if let Some(url) = &config.notifier.webhook_url {
        let mut webhook = WebhookConfig::new(url.clone())
            .with_max_retries(config.notifier.max_retries);
        webhook.per_minute = config.notifier.per_minute;
        if let Some(token) = &config.notifier.auth_token {
            webhook = webhook.with_auth_token(token.clone());
        }
        notifier = notifier.with(Arc::new(
            WebhookNotifier::new(webhook).context("Failed to create webhook notifier")?,
        ));
    }

    let gate = BroadcastGate::new(locks, ledger, executor, schedule)
        .with_notifier(Arc::new(notifier))
        .with_lock_timeout(config.schedule.lock_timeout())
        .with_executor_timeout(config.executor.timeout())
        .with_notify_timeout(config.notifier.timeout());

    Ok(Components {
        gate: Arc::new(gate),
        database,
        pg_locks,
    })
}
