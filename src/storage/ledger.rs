//! Slot reservation ledger
//!
//! `reserve` is a single `INSERT ... ON CONFLICT DO NOTHING` against the
//! unique `(broadcast_date, broadcast_type, slot_key)` constraint. The store
//! decides who claimed a slot first; a conflict is reported as `Ok(None)`,
//! never as an error. Rows are never deleted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use deadpool_postgres::{Object, Pool};
use tokio_postgres::Row;

use crate::error::{DawnbellErrorTrait, ErrorCategory};
use crate::models::{
    BroadcastSlot, BroadcastType, Completion, ReservationId, ReservationRecord, ReservationStatus,
};

// ============================================================================
// Errors
// ============================================================================

/// Ledger backend errors
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Connection pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("Ledger operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Reservation {0} not found")]
    NotFound(ReservationId),

    #[error("Ledger unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt reservation row: {0}")]
    CorruptRow(String),
}

impl DawnbellErrorTrait for LedgerError {
    fn is_recoverable(&self) -> bool {
        !matches!(self, Self::NotFound(_) | Self::CorruptRow(_))
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Backend
    }
}

// ============================================================================
// Ledger Trait
// ============================================================================

/// Durable "claim this slot exactly once" record
#[async_trait]
pub trait ReservationLedger: Send + Sync {
    /// Claim a slot. `Ok(None)` means another caller already claimed it.
    async fn reserve(
        &self,
        slot: &BroadcastSlot,
        created_by: &str,
    ) -> Result<Option<ReservationId>, LedgerError>;

    /// Move a reservation to `sending`
    async fn mark_sending(&self, id: ReservationId) -> Result<(), LedgerError>;

    /// Record the final outcome of a reservation
    async fn mark_completed(
        &self,
        id: ReservationId,
        completion: &Completion,
    ) -> Result<(), LedgerError>;

    /// Look up the reservation for a slot
    async fn get(&self, slot: &BroadcastSlot) -> Result<Option<ReservationRecord>, LedgerError>;

    /// All reservations for a reference-timezone date
    async fn list_for_date(&self, date: NaiveDate) -> Result<Vec<ReservationRecord>, LedgerError>;

    /// Backend name for logs and status
    fn backend_name(&self) -> &'static str;
}

// ============================================================================
// PostgreSQL Ledger
// ============================================================================

const RESERVATION_COLUMNS: &str = "id, broadcast_date, broadcast_type, slot_key, status, created_by, \
     created_at, completed_at, successful_deliveries, failed_deliveries, topic, error_message";

/// Ledger backed by the `broadcast_reservations` table
#[derive(Clone)]
pub struct PostgresReservationLedger {
    pool: Pool,
    timeout: Duration,
}

impl PostgresReservationLedger {
    pub fn new(pool: Pool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    async fn client(&self) -> Result<Object, LedgerError> {
        tokio::time::timeout(self.timeout, self.pool.get())
            .await
            .map_err(|_| LedgerError::Timeout(self.timeout))?
            .map_err(LedgerError::from)
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, LedgerError>
    where
        F: std::future::Future<Output = Result<T, tokio_postgres::Error>>,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| LedgerError::Timeout(self.timeout))?
            .map_err(LedgerError::from)
    }
}

#[async_trait]
impl ReservationLedger for PostgresReservationLedger {
    async fn reserve(
        &self,
        slot: &BroadcastSlot,
        created_by: &str,
    ) -> Result<Option<ReservationId>, LedgerError> {
        let client = self.client().await?;
        let row = self
            .bounded(client.query_opt(
                "INSERT INTO broadcast_reservations
                    (broadcast_date, broadcast_type, slot_key, status, created_by)
                 VALUES ($1, $2, $3, 'reserved', $4)
                 ON CONFLICT (broadcast_date, broadcast_type, slot_key) DO NOTHING
                 RETURNING id",
                &[
                    &slot.date,
                    &slot.broadcast_type.as_str(),
                    &slot.slot_key,
                    &created_by,
                ],
            ))
            .await?;

        match row {
            Some(row) => Ok(Some(ReservationId(row.try_get("id")?))),
            None => Ok(None),
        }
    }

    async fn mark_sending(&self, id: ReservationId) -> Result<(), LedgerError> {
        let client = self.client().await?;
        let updated = self
            .bounded(client.execute(
                "UPDATE broadcast_reservations SET status = 'sending'
                 WHERE id = $1 AND status = 'reserved'",
                &[&id.0],
            ))
            .await?;

        if updated == 0 {
            return Err(LedgerError::NotFound(id));
        }
        Ok(())
    }

    async fn mark_completed(
        &self,
        id: ReservationId,
        completion: &Completion,
    ) -> Result<(), LedgerError> {
        let successful = i32::try_from(completion.successful_deliveries).unwrap_or(i32::MAX);
        let failed = i32::try_from(completion.failed_deliveries).unwrap_or(i32::MAX);

        let client = self.client().await?;
        let updated = self
            .bounded(client.execute(
                "UPDATE broadcast_reservations
                 SET status = $2,
                     completed_at = NOW(),
                     successful_deliveries = $3,
                     failed_deliveries = $4,
                     topic = COALESCE($5, topic),
                     error_message = $6
                 WHERE id = $1",
                &[
                    &id.0,
                    &completion.status.as_str(),
                    &successful,
                    &failed,
                    &completion.topic,
                    &completion.error_message,
                ],
            ))
            .await?;

        if updated == 0 {
            return Err(LedgerError::NotFound(id));
        }
        Ok(())
    }

    async fn get(&self, slot: &BroadcastSlot) -> Result<Option<ReservationRecord>, LedgerError> {
        let client = self.client().await?;
        let query = format!(
            "SELECT {RESERVATION_COLUMNS} FROM broadcast_reservations
             WHERE broadcast_date = $1 AND broadcast_type = $2 AND slot_key = $3"
        );
        let row = self
            .bounded(client.query_opt(
                &query,
                &[&slot.date, &slot.broadcast_type.as_str(), &slot.slot_key],
            ))
            .await?;

        row.map(|r| record_from_row(&r)).transpose()
    }

    async fn list_for_date(&self, date: NaiveDate) -> Result<Vec<ReservationRecord>, LedgerError> {
        let client = self.client().await?;
        let query = format!(
            "SELECT {RESERVATION_COLUMNS} FROM broadcast_reservations
             WHERE broadcast_date = $1
             ORDER BY created_at, id"
        );
        let rows = self.bounded(client.query(&query, &[&date])).await?;
        rows.iter().map(record_from_row).collect()
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

fn record_from_row(row: &Row) -> Result<ReservationRecord, LedgerError> {
    let type_str: String = row.try_get("broadcast_type")?;
    let broadcast_type = BroadcastType::parse(&type_str)
        .ok_or_else(|| LedgerError::CorruptRow(format!("unknown broadcast_type '{type_str}'")))?;

    let status_str: String = row.try_get("status")?;
    let status = ReservationStatus::parse(&status_str)
        .ok_or_else(|| LedgerError::CorruptRow(format!("unknown status '{status_str}'")))?;

    let successful: i32 = row.try_get("successful_deliveries")?;
    let failed: i32 = row.try_get("failed_deliveries")?;

    Ok(ReservationRecord {
        id: ReservationId(row.try_get("id")?),
        slot: BroadcastSlot {
            date: row.try_get("broadcast_date")?,
            broadcast_type,
            slot_key: row.try_get("slot_key")?,
        },
        status,
        created_by: row.try_get("created_by")?,
        created_at: row.try_get::<_, DateTime<Utc>>("created_at")?,
        completed_at: row.try_get::<_, Option<DateTime<Utc>>>("completed_at")?,
        successful_deliveries: u32::try_from(successful).unwrap_or(0),
        failed_deliveries: u32::try_from(failed).unwrap_or(0),
        topic: row.try_get("topic")?,
        error_message: row.try_get("error_message")?,
    })
}

// ============================================================================
// In-Memory Ledger
// ============================================================================

#[derive(Debug, Default)]
struct LedgerState {
    next_id: i64,
    rows: HashMap<BroadcastSlot, ReservationRecord>,
    by_id: HashMap<ReservationId, BroadcastSlot>,
}

/// Process-local ledger with the same uniqueness semantics
///
/// Clones share state, so a clone outlives a dropped coordinator the way
/// the table outlives a process restart.
#[derive(Debug, Clone, Default)]
pub struct InMemoryReservationLedger {
    state: Arc<Mutex<LedgerState>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryReservationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an unreachable store
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Total rows ever reserved
    pub fn len(&self) -> usize {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> Result<(), LedgerError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("in-memory ledger offline".to_string()));
        }
        Ok(())
    }

    fn with_record<F>(&self, id: ReservationId, update: F) -> Result<(), LedgerError>
    where
        F: FnOnce(&mut ReservationRecord) -> bool,
    {
        self.check_available()?;
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = state.by_id.get(&id).cloned().ok_or(LedgerError::NotFound(id))?;
        let record = state.rows.get_mut(&slot).ok_or(LedgerError::NotFound(id))?;
        if update(record) {
            Ok(())
        } else {
            Err(LedgerError::NotFound(id))
        }
    }
}

#[async_trait]
impl ReservationLedger for InMemoryReservationLedger {
    async fn reserve(
        &self,
        slot: &BroadcastSlot,
        created_by: &str,
    ) -> Result<Option<ReservationId>, LedgerError> {
        self.check_available()?;
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.rows.contains_key(slot) {
            return Ok(None);
        }

        state.next_id += 1;
        let id = ReservationId(state.next_id);
        state.rows.insert(
            slot.clone(),
            ReservationRecord {
                id,
                slot: slot.clone(),
                status: ReservationStatus::Reserved,
                created_by: created_by.to_string(),
                created_at: Utc::now(),
                completed_at: None,
                successful_deliveries: 0,
                failed_deliveries: 0,
                topic: None,
                error_message: None,
            },
        );
        state.by_id.insert(id, slot.clone());
        Ok(Some(id))
    }

    async fn mark_sending(&self, id: ReservationId) -> Result<(), LedgerError> {
        self.with_record(id, |record| {
            if record.status != ReservationStatus::Reserved {
                return false;
            }
            record.status = ReservationStatus::Sending;
            true
        })
    }

    async fn mark_completed(
        &self,
        id: ReservationId,
        completion: &Completion,
    ) -> Result<(), LedgerError> {
        self.with_record(id, |record| {
            record.status = completion.status;
            record.completed_at = Some(Utc::now());
            record.successful_deliveries = completion.successful_deliveries;
            record.failed_deliveries = completion.failed_deliveries;
            if completion.topic.is_some() {
                record.topic = completion.topic.clone();
            }
            record.error_message = completion.error_message.clone();
            true
        })
    }

    async fn get(&self, slot: &BroadcastSlot) -> Result<Option<ReservationRecord>, LedgerError> {
        self.check_available()?;
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(state.rows.get(slot).cloned())
    }

    async fn list_for_date(&self, date: NaiveDate) -> Result<Vec<ReservationRecord>, LedgerError> {
        self.check_available()?;
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let mut records: Vec<_> = state
            .rows
            .values()
            .filter(|r| r.slot.date == date)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.id.0);
        Ok(records)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

// ============================================================================
// Tests
// ============================================================================
