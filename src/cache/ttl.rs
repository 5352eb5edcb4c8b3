//! In-process key/value cache with per-entry TTL
//!
//! Expired entries are never returned: every read re-checks the entry's
//! expiry instant. A background sweeper (see [`TtlCache::spawn_sweeper`])
//! physically removes dead entries on a coarse period to reclaim memory.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Default period of the background sweep.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Upper bound used when `now + ttl` overflows `Instant`.
const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// A cached value with its expiry instant
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

fn expiry_after(now: Instant, ttl: Duration) -> Instant {
    now.checked_add(ttl).unwrap_or_else(|| now + MAX_TTL)
}

/// Cache statistics tracked atomically
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl CacheStats {
    /// Get current cache hit count
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Get current cache miss count
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Get current eviction count
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Calculate hit rate as a fraction (0.0-1.0)
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

/// Thread-safe map from key to value where every entry carries an expiry.
///
/// Reads take a shared lock; `set`, `delete`, `update` and the sweep take the
/// exclusive lock. Critical sections never await.
pub struct TtlCache<K, V> {
    entries: RwLock<HashMap<K, CacheEntry<V>>>,
    stats: CacheStats,
}

impl<K, V> Default for TtlCache<K, V> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            stats: CacheStats::default(),
        }
    }
}

impl<K, V> TtlCache<K, V> {
    /// Create a new empty cache
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of physically stored entries, including expired ones the
    /// sweeper has not reclaimed yet
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Return `true` when nothing is stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.stats.hits(),
            misses: self.stats.misses(),
            evictions: self.stats.evictions(),
            size: self.len(),
            hit_rate: self.stats.hit_rate(),
        }
    }

    /// Remove every expired entry. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        let removed = before - entries.len();
        drop(entries);

        if removed > 0 {
            self.stats
                .evictions
                .fetch_add(removed as u64, Ordering::Relaxed);
        }
        removed
    }
}

impl<K: Eq + Hash, V> TtlCache<K, V> {
    /// Store `value` under `key` for `ttl`, replacing any existing entry.
    ///
    /// A zero `ttl` stores an entry that is already expired. Callers that
    /// treat a zero TTL as "caching disabled" must skip the call instead.
    pub fn set(&self, key: K, value: V, ttl: Duration) {
        let entry = CacheEntry {
            value,
            expires_at: expiry_after(Instant::now(), ttl),
        };
        self.entries.write().insert(key, entry);
    }

    /// Remove `key`. Removing an absent key is a no-op.
    pub fn delete<Q>(&self, key: &Q)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.write().remove(key);
    }

    /// Read-modify-write the live value for `key` under the exclusive lock.
    ///
    /// `f` receives `Some(value)` when a live entry exists and `None`
    /// otherwise (absent or expired). Whatever `f` leaves in the slot is
    /// stored back: `None` removes the entry. The returned TTL re-arms the
    /// entry from now; `None` keeps the previous expiry, and a value that
    /// had no previous expiry is stored already expired.
    pub fn update<R>(&self, key: K, f: impl FnOnce(&mut Option<V>) -> (R, Option<Duration>)) -> R {
        let now = Instant::now();
        let mut entries = self.entries.write();

        let (mut slot, previous_expiry) = match entries.remove(&key) {
            Some(entry) if entry.is_live(now) => (Some(entry.value), Some(entry.expires_at)),
            _ => (None, None),
        };

        let (out, ttl) = f(&mut slot);

        if let Some(value) = slot {
            let expires_at = match (ttl, previous_expiry) {
                (Some(ttl), _) => expiry_after(now, ttl),
                (None, Some(at)) => at,
                (None, None) => now,
            };
            entries.insert(key, CacheEntry { value, expires_at });
        }
        out
    }
}

impl<K: Eq + Hash, V: Clone> TtlCache<K, V> {
    /// Get a clone of the value for `key` if it exists and hasn't expired.
    ///
    /// Expired entries read as absent whether or not the sweeper has removed
    /// them yet.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = Instant::now();
        let entries = self.entries.read();
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            _ => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Start the background sweep on the current Tokio runtime.
    ///
    /// The task holds only a weak reference and exits once the cache is
    /// dropped. Must be called from within a runtime.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let cache = Arc::downgrade(self);
        let period = period.max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately
            interval.tick().await;

            loop {
                interval.tick().await;
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                let evicted = cache.sweep();
                if evicted > 0 {
                    debug!(evicted, "Swept expired cache entries");
                }
            }
        })
    }
}

/// Snapshot of cache statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStatsSnapshot {
    /// Total cache hits
    pub hits: u64,
    /// Total cache misses (absent or expired)
    pub misses: u64,
    /// Total entries reclaimed by sweeps
    pub evictions: u64,
    /// Current number of stored entries
    pub size: usize,
    /// Hit rate (0.0-1.0)
    pub hit_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_hit() {
        let cache = TtlCache::new();
        cache.set("test_key".to_string(), 42_u64, Duration::from_secs(60));

        assert_eq!(cache.get("test_key"), Some(42));
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 0);
    }

    #[test]
    fn test_cache_miss() {
        let cache: TtlCache<String, u64> = TtlCache::new();

        assert_eq!(cache.get("nonexistent"), None);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_expired_entry_reads_as_absent_before_sweep() {
        let cache = TtlCache::new();
        cache.set("key", "value", Duration::from_millis(10));
        assert_eq!(cache.get("key"), Some("value"));

        std::thread::sleep(Duration::from_millis(20));

        assert_eq!(cache.get("key"), None);
        // Still physically present until a sweep runs
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn test_zero_ttl_is_immediately_expired() {
        let cache = TtlCache::new();
        cache.set("key", 1, Duration::ZERO);
        assert_eq!(cache.get("key"), None);
    }

    #[test]
    fn test_set_overwrites() {
        let cache = TtlCache::new();
        cache.set("key", 1, Duration::from_secs(60));
        cache.set("key", 2, Duration::from_secs(60));
        assert_eq!(cache.get("key"), Some(2));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_overflowing_ttl_does_not_panic() {
        let cache = TtlCache::new();
        cache.set("key", 1, Duration::MAX);
        assert_eq!(cache.get("key"), Some(1));
    }

    #[test]
    fn test_delete_is_idempotent() {
        let cache = TtlCache::new();
        cache.set("key".to_string(), 1, Duration::from_secs(60));

        cache.delete("key");
        cache.delete("key");
        cache.delete("never-there");

        assert_eq!(cache.get("key"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let cache = TtlCache::new();
        cache.set("short", 1, Duration::from_millis(1));
        cache.set("long", 2, Duration::from_secs(60));

        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("long"), Some(2));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_update_creates_and_rearms() {
        let cache: TtlCache<&str, u32> = TtlCache::new();

        let created = cache.update("counter", |slot| {
            let created = slot.is_none();
            *slot = Some(slot.map_or(1, |n| n + 1));
            (created, Some(Duration::from_secs(60)))
        });
        assert!(created);

        let created = cache.update("counter", |slot| {
            let created = slot.is_none();
            *slot = Some(slot.map_or(1, |n| n + 1));
            (created, Some(Duration::from_secs(60)))
        });
        assert!(!created);
        assert_eq!(cache.get("counter"), Some(2));
    }

    #[test]
    fn test_update_keeps_expiry_when_no_ttl_given() {
        let cache = TtlCache::new();
        cache.set("key", 1, Duration::from_millis(10));

        cache.update("key", |slot| {
            *slot = slot.map(|n| n + 1);
            ((), None)
        });
        assert_eq!(cache.get("key"), Some(2));

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.get("key"), None);
    }

    #[test]
    fn test_update_treats_expired_as_absent() {
        let cache = TtlCache::new();
        cache.set("key", 10, Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(5));

        let seen = cache.update("key", |slot| {
            let seen = *slot;
            *slot = Some(1);
            (seen, Some(Duration::from_secs(60)))
        });

        assert_eq!(seen, None);
        assert_eq!(cache.get("key"), Some(1));
    }

    #[test]
    fn test_update_clearing_slot_removes_entry() {
        let cache = TtlCache::new();
        cache.set("key", 1, Duration::from_secs(60));
        cache.update("key", |slot| {
            *slot = None;
            ((), None)
        });
        assert!(cache.is_empty());
    }

    #[test]
    fn test_hit_rate() {
        let cache = TtlCache::new();
        cache.set("key1", 1, Duration::from_secs(60));
        cache.set("key2", 2, Duration::from_secs(60));

        cache.get("key1");
        cache.get("key2");
        cache.get("key3");

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 0.666).abs() < 0.01);
    }

    #[test]
    fn test_concurrent_readers_and_writers() {
        let cache = Arc::new(TtlCache::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..200 {
                        cache.set(format!("{t}:{i}"), i, Duration::from_secs(60));
                        assert_eq!(cache.get(&format!("{t}:{i}")), Some(i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(), 8 * 200);
    }

    #[tokio::test]
    async fn test_sweeper_reclaims_in_background() {
        let cache = Arc::new(TtlCache::new());
        cache.set("short", 1, Duration::from_millis(5));
        cache.set("long", 2, Duration::from_secs(60));

        let handle = cache.spawn_sweeper(Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("long"), Some(2));

        drop(cache);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper should stop once the cache is dropped")
            .unwrap();
    }
}
