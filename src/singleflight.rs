//! Per-key mutual exclusion
//!
//! [`KeyedLocks`] hands out one async mutex per distinct key. Callers that
//! lock the same key serialize; callers on different keys never contend
//! beyond the brief registry lookup.
//!
//! The registry only grows: a key's lock lives for the lifetime of the
//! registry once created. [`KeyedLocks::len`] exposes the size so growth is
//! observable.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Registry of lazily created per-key locks.
#[derive(Debug)]
pub struct KeyedLocks<K> {
    locks: RwLock<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            locks: RwLock::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the lock for `key`, creating it on first use.
    ///
    /// Fast path under the shared lock; on a miss the map is re-checked
    /// under the exclusive lock so racing callers end up with the same
    /// lock object.
    pub fn lock_for(&self, key: &K) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.read().get(key) {
            return Arc::clone(lock);
        }

        let mut locks = self.locks.write();
        Arc::clone(
            locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Wait for exclusive ownership of `key`.
    ///
    /// The guard may be held across `.await` points; dropping it releases
    /// the key.
    pub async fn acquire(&self, key: &K) -> OwnedMutexGuard<()> {
        self.lock_for(key).lock_owned().await
    }

    /// Number of keys that have ever been locked
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.read().len()
    }

    /// Return `true` when no key has been locked yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.read().is_empty()
    }
}
