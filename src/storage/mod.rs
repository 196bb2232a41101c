//! Shared relational store
//!
//! PostgreSQL holds the only durable coordination state: the
//! `broadcast_reservations` table. Advisory locks live in the same
//! database but are session-scoped and never persisted.

pub mod ledger;

use std::time::Duration;

use anyhow::{Context, Result};
use deadpool_postgres::{Config as PoolConfig, ManagerConfig, Pool, RecyclingMethod, Runtime};
use serde::{Deserialize, Serialize};
use tokio_postgres::NoTls;

pub use ledger::{
    InMemoryReservationLedger, LedgerError, PostgresReservationLedger, ReservationLedger,
};

/// Reservation table DDL
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS broadcast_reservations (
    id BIGSERIAL PRIMARY KEY,
    broadcast_date DATE NOT NULL,
    broadcast_type VARCHAR(16) NOT NULL,
    slot_key VARCHAR(64) NOT NULL DEFAULT 'daily',
    status VARCHAR(16) NOT NULL DEFAULT 'reserved',
    created_by VARCHAR(64) NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    completed_at TIMESTAMPTZ,
    successful_deliveries INTEGER NOT NULL DEFAULT 0,
    failed_deliveries INTEGER NOT NULL DEFAULT 0,
    topic TEXT,
    error_message TEXT,
    CONSTRAINT broadcast_reservations_slot_unique
        UNIQUE (broadcast_date, broadcast_type, slot_key),
    CONSTRAINT broadcast_reservations_status_check
        CHECK (status IN ('reserved', 'sending', 'completed', 'failed'))
);

CREATE INDEX IF NOT EXISTS idx_broadcast_reservations_date
    ON broadcast_reservations (broadcast_date);
"#;

// ============================================================================
// Configuration
// ============================================================================

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL; `None` selects process-local backends
    pub postgres_url: Option<String>,

    /// Maximum pool size
    pub pool_size: usize,

    /// Connection wait/create timeout in seconds
    pub connect_timeout_secs: u64,

    /// Per-statement timeout for ledger queries in seconds
    pub statement_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            postgres_url: None,
            pool_size: 10,
            connect_timeout_secs: 5,
            statement_timeout_secs: 10,
        }
    }
}

impl DatabaseConfig {
    /// Set database URL
    pub fn with_postgres_url(mut self, url: &str) -> Self {
        self.postgres_url = Some(url.to_string());
        self
    }

    /// Set pool size
    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn statement_timeout(&self) -> Duration {
        Duration::from_secs(self.statement_timeout_secs)
    }
}

/// Create a PostgreSQL connection pool
pub fn create_pool(config: &DatabaseConfig) -> Result<Pool> {
    let url = config
        .postgres_url
        .as_deref()
        .context("PostgreSQL URL is not configured")?;

    let mut cfg = PoolConfig::new();
    cfg.url = Some(url.to_string());
    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });

    let mut pool_settings = deadpool_postgres::PoolConfig::new(config.pool_size);
    pool_settings.timeouts.wait = Some(config.connect_timeout());
    pool_settings.timeouts.create = Some(config.connect_timeout());
    cfg.pool = Some(pool_settings);

    cfg.create_pool(Some(Runtime::Tokio1), NoTls)
        .context("Failed to create PostgreSQL connection pool")
}

// ============================================================================
// Database
// ============================================================================

/// PostgreSQL pool wrapper
#[derive(Clone)]
pub struct Database {
    pool: Pool,
    config: DatabaseConfig,
}

impl Database {
    /// Create the pool (connections are opened lazily)
    pub fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = create_pool(config)?;
        Ok(Self {
            pool,
            config: config.clone(),
        })
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Create the reservation schema
    pub async fn init_schema(&self) -> Result<()> {
        let client = self
            .pool
            .get()
            .await
            .context("Failed to get PostgreSQL connection")?;

        client
            .batch_execute(SCHEMA_SQL)
            .await
            .context("Failed to create broadcast_reservations schema")?;

        tracing::info!("Reservation schema initialized");
        Ok(())
    }

    /// Round-trip a trivial query
    pub async fn health_check(&self) -> Result<()> {
        let client = tokio::time::timeout(self.config.connect_timeout(), self.pool.get())
            .await
            .context("Timed out waiting for PostgreSQL connection")?
            .context("Failed to get PostgreSQL connection")?;

        client
            .query_one("SELECT 1", &[])
            .await
            .context("PostgreSQL health check failed")?;
        Ok(())
    }

    /// Current pool statistics
    pub fn status(&self) -> PoolStatus {
        let status = self.pool.status();
        PoolStatus {
            size: status.size,
            available: status.available,
            waiting: status.waiting,
            max_size: status.max_size,
        }
    }
}

/// Connection pool statistics
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    /// Current pool size
    pub size: usize,

    /// Idle connections (excludes those pinned by held locks)
    pub available: usize,

    /// Tasks waiting for a connection
    pub waiting: usize,

    /// Configured maximum
    pub max_size: usize,
}

impl PoolStatus {
    /// Calculate utilization (0.0 - 1.0)
    pub fn utilization(&self) -> f64 {
        if self.max_size == 0 {
            return 0.0;
        }
        (self.size.saturating_sub(self.available)) as f64 / self.max_size as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DatabaseConfig::default();
        assert!(config.postgres_url.is_none());
        assert_eq!(config.pool_size, 10);
        assert_eq!(config.connect_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_config_builder() {
        let config = DatabaseConfig::default()
            .with_postgres_url("postgresql://test/db")
            .with_pool_size(20);
        assert_eq!(config.postgres_url.as_deref(), Some("postgresql://test/db"));
        assert_eq!(config.pool_size, 20);
    }

    #[test]
    fn test_create_pool_requires_url() {
        assert!(create_pool(&DatabaseConfig::default()).is_err());
    }

    #[tokio::test]
    async fn test_create_pool_is_lazy() {
        // No connection attempt happens until the first `get`
        let config = DatabaseConfig::default().with_postgres_url("postgresql://localhost:1/none");
        let db = Database::connect(&config).unwrap();
        let status = db.status();
        assert_eq!(status.size, 0);
        assert_eq!(status.max_size, 10);
    }

    #[test]
    fn test_pool_utilization() {
        let status = PoolStatus {
            size: 10,
            available: 3,
            waiting: 0,
            max_size: 10,
        };
        assert!((status.utilization() - 0.7).abs() < f64::EPSILON);

        let empty = PoolStatus {
            size: 0,
            available: 0,
            waiting: 0,
            max_size: 0,
        };
        assert_eq!(empty.utilization(), 0.0);
    }

    #[test]
    fn test_schema_has_unique_slot_constraint() {
        assert!(SCHEMA_SQL.contains("UNIQUE (broadcast_date, broadcast_type, slot_key)"));
    }
}
