use anyhow::{Context, Result};
use chrono::Utc;

use dawnbell::config::Config;
use dawnbell::scheduler::{TickOutcome, TriggerSource};
use dawnbell::storage::Database;

use super::build_components;

/// Run one scheduler tick now
pub async fn tick(config: Config, test_mode: bool) -> Result<()> {
    let components = build_components(&config)?;
    let now = Utc::now();

    let outcome = if test_mode {
        components.gate.preview_at(now, true)
    } else {
        components.gate.tick_at(now, TriggerSource::Cli, None).await
    };

    report(&outcome)
}

/// Manual override through both gates
pub async fn manual(
    config: Config,
    topic: Option<String>,
    identity: Option<String>,
    test_mode: bool,
) -> Result<()> {
    let components = build_components(&config)?;
    let now = Utc::now();

    let outcome = if test_mode {
        components.gate.preview_at(now, false)
    } else {
        components
            .gate
            .manual_at(now, identity, topic, TriggerSource::Cli)
            .await
    };

    report(&outcome)
}

/// Print classification, today's reservations and held locks
pub async fn status(config: Config) -> Result<()> {
    let components = build_components(&config)?;
    let gate = &components.gate;
    let status = gate.status_at(Utc::now()).await;

    println!("Broadcast Status");
    println!("================");
    println!("  Local time: {}", status.local_time.format("%Y-%m-%d %H:%M:%S %:z"));
    println!("  Window: {}", status.window.label());
    match &status.next_window {
        Some(next) => println!(
            "  Next window: {} ({}) at {}",
            next.name,
            next.broadcast_type,
            next.starts_at.format("%Y-%m-%d %H:%M")
        ),
        None => println!("  Next window: none configured"),
    }
    println!("  Lock backend: {}", gate.locks().backend_name());
    println!("  Ledger backend: {}", gate.ledger().backend_name());
    println!("  Executor: {}", gate.executor_name());
    println!();

    println!("Today's reservations:");
    for (broadcast_type, sent) in &status.reservations {
        let state = match sent {
            Some(true) => "sent",
            Some(false) => "pending",
            None => "unknown (store unavailable)",
        };
        println!("  {:<8} {}", broadcast_type.as_str(), state);
    }

    if let Some(pg_locks) = &components.pg_locks {
        println!();
        match pg_locks.list_active_locks(config.schedule.lock_timeout()).await {
            Ok(locks) if locks.is_empty() => println!("No advisory locks held."),
            Ok(locks) => {
                println!("Advisory locks:");
                for lock in locks {
                    println!(
                        "  id={} pid={} granted={}",
                        lock.lock_id, lock.pid, lock.granted
                    );
                }
            }
            Err(e) => println!("Could not list advisory locks: {e}"),
        }
    }

    if let Some(database) = &components.database {
        let pool = database.status();
        println!();
        println!(
            "Pool: {} connections, {} idle, {} waiting (max {})",
            pool.size, pool.available, pool.waiting, pool.max_size
        );
    }

    Ok(())
}

/// Create the reservation schema
pub async fn init_db(config: Config) -> Result<()> {
    if config.database.postgres_url.is_none() {
        anyhow::bail!("DATABASE_URL is not set; nothing to initialize");
    }

    let database = Database::connect(&config.database)?;
    database
        .health_check()
        .await
        .context("Database is not reachable")?;
    database.init_schema().await?;

    println!("Reservation schema ready.");
    Ok(())
}

fn report(outcome: &TickOutcome) -> Result<()> {
    println!("Outcome: {}", outcome.label());
    println!("  {}", outcome.message());
    if let Some(slot) = outcome.slot() {
        println!("  Slot: {slot}");
    }
    if let Some(id) = outcome.reservation_id() {
        println!("  Reservation: {id}");
    }

    if !outcome.success() {
        anyhow::bail!("broadcast tick failed: {}", outcome.message());
    }
    Ok(())
}
