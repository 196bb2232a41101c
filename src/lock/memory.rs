//! Process-local lock backend
//!
//! Clones share one lock table, so several managers built from the same
//! instance behave like several processes pointed at one store.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::{lock_id, LockError, LockGuard, LockHandle, LockManager};

/// In-memory lock manager
#[derive(Debug, Clone, Default)]
pub struct MemoryLockManager {
    held: Arc<Mutex<HashSet<i64>>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an unreachable backend
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of locks currently held
    pub fn held_count(&self) -> usize {
        self.held.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[async_trait]
impl LockManager for MemoryLockManager {
    async fn acquire(&self, resource_key: &str, _timeout: Duration) -> LockHandle {
        let id = lock_id(resource_key);

        if self.unavailable.load(Ordering::SeqCst) {
            return LockHandle::backend_error(resource_key, id, "lock backend unavailable");
        }

        let inserted = self
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id);

        if inserted {
            let guard = MemoryGuard {
                held: Arc::clone(&self.held),
                lock_id: id,
                released: false,
            };
            LockHandle::held(resource_key, id, Box::new(guard))
        } else {
            LockHandle::already_held(resource_key, id)
        }
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

struct MemoryGuard {
    held: Arc<Mutex<HashSet<i64>>>,
    lock_id: i64,
    released: bool,
}

impl MemoryGuard {
    fn remove(&mut self) -> bool {
        self.released = true;
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.lock_id)
    }
}

#[async_trait]
impl LockGuard for MemoryGuard {
    async fn unlock(&mut self) -> Result<(), LockError> {
        if self.released {
            return Ok(());
        }
        if self.remove() {
            Ok(())
        } else {
            Err(LockError::NotHeld(self.lock_id))
        }
    }
}

impl Drop for MemoryGuard {
    fn drop(&mut self) {
        if !self.released {
            self.remove();
        }
    }
}
