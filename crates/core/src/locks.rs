//! Per-key async mutual exclusion. Used to keep exactly one writer per
//! campaign (ticks, start, stop) and per segment (count refresh) while
//! different keys proceed in parallel.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

type LockMap = DashMap<Uuid, Arc<Mutex<()>>>;

#[derive(Debug, Default)]
pub struct KeyedLocks {
    locks: Arc<LockMap>,
}

/// Held lock for one key. Dropping the last guard or waiter for a key
/// removes its entry.
#[derive(Debug)]
pub struct KeyGuard {
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<LockMap>,
    key: Uuid,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        self.guard.take();
        // Waiters hold a clone of the entry, so a count of one means nobody
        // else is queued. The shard lock keeps this atomic with `acquire`.
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until no other holder owns `key`. The guard releases on drop.
    pub async fn acquire(&self, key: Uuid) -> KeyGuard {
        let lock = self
            .locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock_owned().await;
        KeyGuard {
            guard: Some(guard),
            locks: Arc::clone(&self.locks),
            key,
        }
    }

    pub fn is_held(&self, key: Uuid) -> bool {
        self.locks
            .get(&key)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }

    /// Keys currently locked or waited on.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
