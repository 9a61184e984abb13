//! Per-owner mutual exclusion for queue mutations

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockMap = HashMap<String, Arc<AsyncMutex<()>>>;

/// Registry of async locks keyed by owner id
///
/// Entries exist only while a guard is held or awaited for that owner. The
/// locks are per process: a CLI and an API server sharing one database file
/// do not see each other's guards. Replays stay exclusive across processes
/// through `ActionRepository::claim_for_replay`.
#[derive(Clone, Default)]
pub struct OwnerLocks {
    locks: Arc<Mutex<LockMap>>,
}

impl OwnerLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other task holds `owner`'s lock, then take it
    pub async fn acquire(&self, owner: &str) -> OwnerGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(owner.to_string()).or_default().clone()
        };
        let guard = lock.lock_owned().await;
        OwnerGuard {
            owner: owner.to_string(),
            guard: Some(guard),
            locks: self.locks.clone(),
        }
    }

    /// Number of owners with a held or awaited lock
    pub fn active_owners(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Exclusive hold on one owner's queue; released on drop
pub struct OwnerGuard {
    owner: String,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<Mutex<LockMap>>,
}

impl OwnerGuard {
    pub fn owner(&self) -> &str {
        &self.owner
    }
}

impl Drop for OwnerGuard {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Only the map's own reference left: nobody holds or waits on it
        if locks
            .get(&self.owner)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.owner);
        }
    }
}
