//! PostgreSQL-backed coordination tests
//!
//! Each test returns early when `DATABASE_URL` is unset. Run against a
//! disposable database with:
//!
//! ```text
//! DATABASE_URL=postgres://localhost/dawnbell_test cargo test --test postgres_test
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate, Utc};
use dawnbell::lock::{AcquireOutcome, LockManager, PostgresLockManager};
use dawnbell::models::{BroadcastSlot, BroadcastType, Completion, ReservationStatus};
use dawnbell::storage::{Database, DatabaseConfig, PostgresReservationLedger, ReservationLedger};
use futures::future::join_all;

async fn database() -> Option<Database> {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping postgres test");
        return None;
    };
    let config = DatabaseConfig::default()
        .with_postgres_url(&url)
        .with_pool_size(16);
    let database = Database::connect(&config).unwrap();
    database.init_schema().await.unwrap();
    Some(database)
}

/// A date far from real traffic, unique per run
fn test_date() -> NaiveDate {
    let offset = (Utc::now().timestamp_micros() % 100_000) as u64;
    NaiveDate::from_ymd_opt(2100, 1, 1)
        .unwrap()
        .checked_add_days(Days::new(offset))
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_postgres_exactly_one_reservation() {
    let Some(database) = database().await else {
        return;
    };
    let ledger = Arc::new(PostgresReservationLedger::new(
        database.pool().clone(),
        Duration::from_secs(10),
    ));
    let slot = BroadcastSlot::daily(BroadcastType::Wisdom, test_date());

    let attempts = (0..50).map(|_| {
        let ledger = Arc::clone(&ledger);
        let slot = slot.clone();
        tokio::spawn(async move { ledger.reserve(&slot, "postgres_test").await })
    });

    let winners = join_all(attempts)
        .await
        .into_iter()
        .filter(|joined| matches!(joined, Ok(Ok(Some(_)))))
        .count();
    assert_eq!(winners, 1);

    let record = ledger.get(&slot).await.unwrap().unwrap();
    ledger
        .mark_completed(record.id, &Completion::delivered(120, 3))
        .await
        .unwrap();

    let record = ledger.get(&slot).await.unwrap().unwrap();
    assert_eq!(record.status, ReservationStatus::Completed);
    assert_eq!(record.successful_deliveries, 120);
    assert_eq!(record.failed_deliveries, 3);
}

#[tokio::test]
async fn test_postgres_advisory_lock_is_exclusive() {
    let Some(database) = database().await else {
        return;
    };
    let locks = PostgresLockManager::new(database.pool().clone());
    let key = format!("broadcast:test:{}", test_date());
    let timeout = Duration::from_secs(5);

    let mut first = locks.acquire(&key, timeout).await;
    assert!(first.acquired());

    let second = locks.acquire(&key, timeout).await;
    assert_eq!(second.outcome(), &AcquireOutcome::AlreadyHeld);

    let active = locks.list_active_locks(timeout).await.unwrap();
    assert!(active.iter().any(|l| l.lock_id == first.lock_id() && l.granted));

    first.release().await;
    let mut third = locks.acquire(&key, timeout).await;
    assert!(third.acquired());
    third.release().await;
}

#[tokio::test]
async fn test_postgres_held_lock_returns_within_timeout() {
    let Some(database) = database().await else {
        return;
    };
    let locks = PostgresLockManager::new(database.pool().clone());
    let key = format!("broadcast:wisdom:{}", test_date());
    let timeout = Duration::from_secs(2);

    let mut first = locks.acquire(&key, timeout).await;
    assert!(first.acquired());

    // A second session sees the hold immediately instead of queueing on it
    let started = Instant::now();
    let second = locks.acquire(&key, timeout).await;
    assert_eq!(second.outcome(), &AcquireOutcome::AlreadyHeld);
    assert!(started.elapsed() < timeout);
    assert!(locks.is_locked(&key, timeout).await);

    first.release().await;
    assert!(!locks.is_locked(&key, timeout).await);
}
