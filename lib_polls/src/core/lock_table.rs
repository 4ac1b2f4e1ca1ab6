//! # Per-Poll Lock Table
//!
//! Hands out one async mutex per poll id. The table itself only keeps weak
//! references: a poll's mutex lives exactly as long as someone holds or waits
//! on it, and dead entries are swept out once the table grows past its
//! high-water mark. The std mutex guarding the map is never held across an
//! `.await`, so unrelated polls only ever share a few nanoseconds of map
//! access.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::{Mutex as PollMutex, OwnedMutexGuard};

const MIN_PRUNE_AT: usize = 64;

/// Exclusive access to one poll id. Dropping it releases the poll.
pub type PollGuard = OwnedMutexGuard<()>;

#[derive(Debug)]
struct Slots {
    locks: HashMap<String, Weak<PollMutex<()>>>,
    prune_at: usize,
}

#[derive(Debug)]
pub struct LockTable {
    slots: Mutex<Slots>,
}

impl Default for LockTable {
    fn default() -> Self {
        Self::new()
    }
}

impl LockTable {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Slots {
                locks: HashMap::new(),
                prune_at: MIN_PRUNE_AT,
            }),
        }
    }

    /// Waits until the caller is the only holder for `poll_id`.
    pub async fn acquire(&self, poll_id: &str) -> PollGuard {
        let lock = self.slot(poll_id);
        lock.lock_owned().await
    }

    fn slot(&self, poll_id: &str) -> Arc<PollMutex<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);

        if slots.locks.len() >= slots.prune_at {
            slots.locks.retain(|_, weak| weak.strong_count() > 0);
            slots.prune_at = (slots.locks.len() * 2).max(MIN_PRUNE_AT);
        }

        if let Some(lock) = slots.locks.get(poll_id).and_then(Weak::upgrade) {
            return lock;
        }

        let lock = Arc::new(PollMutex::new(()));
        slots.locks.insert(poll_id.to_string(), Arc::downgrade(&lock));
        lock
    }

    /// Number of ids currently holding or awaiting their lock.
    pub fn active(&self) -> usize {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.locks.values().filter(|w| w.strong_count() > 0).count()
    }
}
