//! Distributed lock manager
//!
//! Named, non-blocking mutual exclusion keyed by a resource string such as
//! `broadcast:wisdom:2025-09-26`. The key is hashed into a stable 64-bit
//! lock id so every process maps the same key to the same lock.
//!
//! Acquisition never waits for a holder: a contended key yields
//! [`AcquireOutcome::AlreadyHeld`] immediately. The `timeout` passed to
//! [`LockManager::acquire`] bounds only the backend round-trip.
//!
//! # Backends
//!
//! - [`PostgresLockManager`] - session advisory locks over a connection pool
//! - [`MemoryLockManager`] - process-local set, shared between clones
//!
//! # Usage
//!
//! ```ignore
//! let mut handle = locks.acquire("broadcast:quiz:2025-09-26", Duration::from_secs(5)).await;
//! if handle.acquired() {
//!     // ... gated work ...
//! }
//! handle.release().await;
//! ```

pub mod memory;
pub mod postgres;

use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::{DawnbellErrorTrait, ErrorCategory};

pub use memory::MemoryLockManager;
pub use postgres::{ActiveLock, PostgresLockManager};

/// Derive the 64-bit lock id for a resource key
///
/// First 8 bytes of SHA-256, read big-endian as a signed integer.
pub fn lock_id(resource_key: &str) -> i64 {
    let digest = Sha256::digest(resource_key.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(bytes)
}

// ============================================================================
// Outcome & Errors
// ============================================================================

/// Result of a single acquisition attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// This handle holds the lock
    Acquired,

    /// Another session holds the lock
    AlreadyHeld,

    /// The backend could not be consulted; treat as not acquired
    BackendError(String),
}

impl AcquireOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Acquired => "acquired",
            Self::AlreadyHeld => "already_held",
            Self::BackendError(_) => "backend_error",
        }
    }
}

/// Lock backend errors, surfaced only from release
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("Connection pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("Lock operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Lock {0} was not held by this session")]
    NotHeld(i64),
}

impl DawnbellErrorTrait for LockError {
    fn is_recoverable(&self) -> bool {
        !matches!(self, Self::NotHeld(_))
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Backend
    }
}

// ============================================================================
// Handle
// ============================================================================

/// Backend-specific hold on a lock
///
/// Implementations must release the lock in `Drop` if `unlock` was never
/// called, so a handle dropped on any path does not leak the hold.
#[async_trait]
pub trait LockGuard: Send + Sync {
    /// Release the lock explicitly
    async fn unlock(&mut self) -> Result<(), LockError>;
}

/// Process-local handle for one acquisition attempt
pub struct LockHandle {
    resource_key: String,
    lock_id: i64,
    outcome: AcquireOutcome,
    guard: Option<Box<dyn LockGuard>>,
}

impl LockHandle {
    /// Handle that holds the lock through `guard`
    pub fn held(resource_key: &str, lock_id: i64, guard: Box<dyn LockGuard>) -> Self {
        Self {
            resource_key: resource_key.to_string(),
            lock_id,
            outcome: AcquireOutcome::Acquired,
            guard: Some(guard),
        }
    }

    /// Handle for a contended key
    pub fn already_held(resource_key: &str, lock_id: i64) -> Self {
        Self {
            resource_key: resource_key.to_string(),
            lock_id,
            outcome: AcquireOutcome::AlreadyHeld,
            guard: None,
        }
    }

    /// Handle for a failed backend round-trip
    pub fn backend_error(resource_key: &str, lock_id: i64, reason: impl Into<String>) -> Self {
        Self {
            resource_key: resource_key.to_string(),
            lock_id,
            outcome: AcquireOutcome::BackendError(reason.into()),
            guard: None,
        }
    }

    pub fn resource_key(&self) -> &str {
        &self.resource_key
    }

    pub fn lock_id(&self) -> i64 {
        self.lock_id
    }

    pub fn outcome(&self) -> &AcquireOutcome {
        &self.outcome
    }

    /// Whether this handle currently holds the lock
    pub fn acquired(&self) -> bool {
        self.guard.is_some()
    }

    /// Release the lock. Idempotent; failures are logged, never raised.
    pub async fn release(&mut self) {
        let Some(mut guard) = self.guard.take() else {
            return;
        };

        match guard.unlock().await {
            Ok(()) => {
                tracing::debug!(resource_key = %self.resource_key, lock_id = self.lock_id, "Lock released");
            }
            Err(e) => {
                tracing::warn!(
                    resource_key = %self.resource_key,
                    lock_id = self.lock_id,
                    error = %e,
                    "Failed to release lock explicitly; session teardown will release it"
                );
            }
        }
    }
}

impl std::fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockHandle")
            .field("resource_key", &self.resource_key)
            .field("lock_id", &self.lock_id)
            .field("outcome", &self.outcome)
            .field("held", &self.guard.is_some())
            .finish()
    }
}

// ============================================================================
// Manager Trait
// ============================================================================

/// Distributed lock manager
#[async_trait]
pub trait LockManager: Send + Sync {
    /// Try once to acquire the lock for `resource_key`
    async fn acquire(&self, resource_key: &str, timeout: Duration) -> LockHandle;

    /// Release a handle (same as [`LockHandle::release`])
    async fn release(&self, mut handle: LockHandle) {
        handle.release().await;
    }

    /// Probe whether another session holds the lock; never leaves it held
    async fn is_locked(&self, resource_key: &str, timeout: Duration) -> bool {
        let mut handle = self.acquire(resource_key, timeout).await;
        let held_elsewhere = matches!(handle.outcome(), AcquireOutcome::AlreadyHeld);
        handle.release().await;
        held_elsewhere
    }

    /// Backend name for logs and status
    fn backend_name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_id_is_stable() {
        let a = lock_id("broadcast:wisdom:2025-09-26");
        let b = lock_id("broadcast:wisdom:2025-09-26");
        let c = lock_id("broadcast:quiz:2025-09-26");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_lock_id_matches_digest_prefix() {
        let digest = Sha256::digest(b"broadcast:quiz:2025-09-26");
        let expected = i64::from_be_bytes([
            digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
        ]);
        assert_eq!(lock_id("broadcast:quiz:2025-09-26"), expected);
    }

    #[tokio::test]
    async fn test_unacquired_handle_release_is_noop() {
        let mut handle = LockHandle::already_held("k", 1);
        assert!(!handle.acquired());
        handle.release().await;
        handle.release().await;
        assert_eq!(handle.outcome().as_str(), "already_held");
    }

    struct CountingGuard(std::sync::Arc<std::sync::atomic::AtomicUsize>);

    #[async_trait]
    impl LockGuard for CountingGuard {
        async fn unlock(&mut self) -> Result<(), LockError> {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_held_handle_unlocks_once() {
        let unlocks = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut handle = LockHandle::held("k", 7, Box::new(CountingGuard(unlocks.clone())));
        assert!(handle.acquired());
        assert_eq!(handle.outcome(), &AcquireOutcome::Acquired);

        handle.release().await;
        handle.release().await;
        assert!(!handle.acquired());
        assert_eq!(unlocks.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
