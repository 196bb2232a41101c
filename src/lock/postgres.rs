//! PostgreSQL advisory lock backend
//!
//! Uses session-level `pg_try_advisory_lock`. A held lock pins its pooled
//! connection inside the handle; the connection only goes back to the pool
//! after a confirmed `pg_advisory_unlock`. On any doubt the connection is
//! detached from the pool and closed, which ends the session and with it
//! every advisory lock it held.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{Object, Pool};
use serde::Serialize;

use super::{lock_id, LockError, LockGuard, LockHandle, LockManager};

/// Advisory lock row from `pg_locks`
#[derive(Debug, Clone, Serialize)]
pub struct ActiveLock {
    pub lock_id: i64,
    pub pid: i32,
    pub granted: bool,
}

/// Advisory lock manager backed by a deadpool-postgres pool
#[derive(Clone)]
pub struct PostgresLockManager {
    pool: Pool,
}

impl PostgresLockManager {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// List advisory locks currently present in `pg_locks`
    pub async fn list_active_locks(&self, timeout: Duration) -> Result<Vec<ActiveLock>, LockError> {
        let client = tokio::time::timeout(timeout, self.pool.get())
            .await
            .map_err(|_| LockError::Timeout(timeout))??;

        let rows = tokio::time::timeout(
            timeout,
            client.query(
                "SELECT ((classid::bigint << 32) | objid::bigint) AS lock_id, pid, granted
                 FROM pg_locks
                 WHERE locktype = 'advisory'
                 ORDER BY pid",
                &[],
            ),
        )
        .await
        .map_err(|_| LockError::Timeout(timeout))??;

        let mut locks = Vec::with_capacity(rows.len());
        for row in rows {
            locks.push(ActiveLock {
                lock_id: row.try_get("lock_id")?,
                pid: row.try_get("pid")?,
                granted: row.try_get("granted")?,
            });
        }
        Ok(locks)
    }
}

#[async_trait]
impl LockManager for PostgresLockManager {
    async fn acquire(&self, resource_key: &str, timeout: Duration) -> LockHandle {
        let id = lock_id(resource_key);

        let client = match tokio::time::timeout(timeout, self.pool.get()).await {
            Ok(Ok(client)) => client,
            Ok(Err(e)) => {
                tracing::warn!(resource_key, lock_id = id, error = %e, "Lock pool unavailable");
                return LockHandle::backend_error(resource_key, id, e.to_string());
            }
            Err(_) => {
                tracing::warn!(resource_key, lock_id = id, ?timeout, "Timed out waiting for lock connection");
                return LockHandle::backend_error(resource_key, id, "timed out waiting for connection");
            }
        };

        let attempt = tokio::time::timeout(
            timeout,
            client.query_one("SELECT pg_try_advisory_lock($1)", &[&id]),
        )
        .await;

        match attempt {
            Ok(Ok(row)) => match row.try_get::<_, bool>(0) {
                Ok(true) => {
                    tracing::debug!(resource_key, lock_id = id, "Advisory lock acquired");
                    let guard = PgAdvisoryGuard {
                        client: Some(client),
                        lock_id: id,
                        timeout,
                    };
                    LockHandle::held(resource_key, id, Box::new(guard))
                }
                Ok(false) => {
                    tracing::info!(resource_key, lock_id = id, "Advisory lock held by another session");
                    LockHandle::already_held(resource_key, id)
                }
                Err(e) => {
                    // Outcome unknown; do not hand this session back to the pool
                    drop(Object::take(client));
                    LockHandle::backend_error(resource_key, id, e.to_string())
                }
            },
            Ok(Err(e)) => {
                tracing::warn!(resource_key, lock_id = id, error = %e, "Advisory lock query failed");
                drop(Object::take(client));
                LockHandle::backend_error(resource_key, id, e.to_string())
            }
            Err(_) => {
                tracing::warn!(resource_key, lock_id = id, ?timeout, "Advisory lock attempt timed out");
                drop(Object::take(client));
                LockHandle::backend_error(resource_key, id, "lock attempt timed out")
            }
        }
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

/// Pinned connection holding a session advisory lock
struct PgAdvisoryGuard {
    client: Option<Object>,
    lock_id: i64,
    timeout: Duration,
}

#[async_trait]
impl LockGuard for PgAdvisoryGuard {
    async fn unlock(&mut self) -> Result<(), LockError> {
        let Some(client) = self.client.take() else {
            return Ok(());
        };

        let result = tokio::time::timeout(
            self.timeout,
            client.query_one("SELECT pg_advisory_unlock($1)", &[&self.lock_id]),
        )
        .await;

        match result {
            Ok(Ok(row)) => {
                if row.try_get::<_, bool>(0).unwrap_or(false) {
                    // Clean session, safe to reuse
                    drop(client);
                    Ok(())
                } else {
                    drop(Object::take(client));
                    Err(LockError::NotHeld(self.lock_id))
                }
            }
            Ok(Err(e)) => {
                drop(Object::take(client));
                Err(LockError::Database(e))
            }
            Err(_) => {
                drop(Object::take(client));
                Err(LockError::Timeout(self.timeout))
            }
        }
    }
}

impl Drop for PgAdvisoryGuard {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            tracing::warn!(
                lock_id = self.lock_id,
                "Advisory lock dropped without release; closing its session"
            );
            drop(Object::take(client));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::AcquireOutcome;
    use crate::storage::{create_pool, DatabaseConfig};

    fn test_config() -> Option<DatabaseConfig> {
        std::env::var("DATABASE_URL")
            .ok()
            .map(|url| DatabaseConfig::default().with_postgres_url(&url).with_pool_size(4))
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL pointing at a PostgreSQL instance"]
    async fn test_advisory_lock_exclusion() {
        let Some(config) = test_config() else {
            return;
        };
        let pool = create_pool(&config).unwrap();
        let locks = PostgresLockManager::new(pool);
        let timeout = Duration::from_secs(5);
        let key = format!("test:lock:{}", uuid::Uuid::new_v4());

        let mut first = locks.acquire(&key, timeout).await;
        assert!(first.acquired());

        let second = locks.acquire(&key, timeout).await;
        assert_eq!(second.outcome(), &AcquireOutcome::AlreadyHeld);
        assert!(locks.is_locked(&key, timeout).await);

        let active = locks.list_active_locks(timeout).await.unwrap();
        assert!(active.iter().any(|l| l.lock_id == first.lock_id()));

        first.release().await;
        assert!(!locks.is_locked(&key, timeout).await);
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL pointing at a PostgreSQL instance"]
    async fn test_dropped_handle_does_not_leak_lock() {
        let Some(config) = test_config() else {
            return;
        };
        let pool = create_pool(&config).unwrap();
        let locks = PostgresLockManager::new(pool);
        let timeout = Duration::from_secs(5);
        let key = format!("test:lock:{}", uuid::Uuid::new_v4());

        {
            let handle = locks.acquire(&key, timeout).await;
            assert!(handle.acquired());
        }
        // Session teardown is asynchronous on the server side
        tokio::time::sleep(Duration::from_millis(200)).await;
        let mut again = locks.acquire(&key, timeout).await;
        assert!(again.acquired());
        again.release().await;
    }
}
