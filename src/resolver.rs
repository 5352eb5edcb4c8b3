//! Coalescing cache-aside resolution
//!
//! [`TieredResolver`] resolves a key through, in order:
//!
//! 1. an optional in-process near-cache (disabled when its TTL is zero),
//! 2. the per-key lock, so concurrent resolutions of one key queue up,
//! 3. the shared cache tier,
//! 4. the external [`Fetcher`], whose result is written back to the shared
//!    tier before the lock is released.
//!
//! Because the lock spans the shared-cache check *and* the fetch, a caller
//! that waited behind an in-flight fetch finds the freshly written value in
//! step 3 and never reaches the source. Shared-tier failures are logged and
//! treated as misses; fetch failures are returned and never cached.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, warn};

use crate::cache::{CacheStatsSnapshot, SharedCache, TtlCache};
use crate::singleflight::KeyedLocks;
use crate::{Error, Result};

/// The expensive source of truth behind the caches.
#[async_trait]
pub trait Fetcher<V>: Send + Sync + 'static {
    /// Fetch the current value for `key`
    async fn fetch(&self, key: &str) -> Result<V>;
}

/// Tunables for a [`TieredResolver`]
#[derive(Debug, Clone)]
pub struct ResolverSettings {
    /// Prefix prepended to keys in the shared tier
    pub key_prefix: String,
    /// TTL of values written to the shared tier (zero skips the write)
    pub shared_ttl: Duration,
    /// TTL of the in-process near-cache (zero disables it)
    pub local_ttl: Duration,
    /// Bound on each shared-tier call
    pub cache_timeout: Duration,
    /// Bound on each fetch
    pub fetch_timeout: Duration,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            key_prefix: "balance:".to_string(),
            shared_ttl: Duration::from_secs(300),
            local_ttl: Duration::ZERO,
            cache_timeout: Duration::from_secs(5),
            fetch_timeout: Duration::from_secs(10),
        }
    }
}

/// Outcome for one key of a batch
#[derive(Debug)]
pub struct Resolution<V> {
    /// Key as requested
    pub key: String,
    /// Value or the per-key failure
    pub outcome: Result<V>,
}

/// Cache-aside resolver with at most one in-flight fetch per key.
pub struct TieredResolver<V> {
    fetcher: Arc<dyn Fetcher<V>>,
    shared: Arc<dyn SharedCache>,
    local: Option<Arc<TtlCache<String, V>>>,
    locks: KeyedLocks<String>,
    settings: ResolverSettings,
}

impl<V> TieredResolver<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Create a resolver over `fetcher` and `shared`
    pub fn new(
        fetcher: Arc<dyn Fetcher<V>>,
        shared: Arc<dyn SharedCache>,
        settings: ResolverSettings,
    ) -> Self {
        let local = (!settings.local_ttl.is_zero()).then(|| Arc::new(TtlCache::new()));
        Self {
            fetcher,
            shared,
            local,
            locks: KeyedLocks::new(),
            settings,
        }
    }

    /// Resolve `key`, fetching from the source only on a full cache miss.
    pub async fn resolve(&self, key: &str) -> Result<V> {
        if let Some(value) = self.local.as_ref().and_then(|local| local.get(key)) {
            debug!(key, "Near-cache hit");
            return Ok(value);
        }

        let _guard = self.locks.acquire(&key.to_string()).await;
        let cache_key = format!("{}{key}", self.settings.key_prefix);

        match self.shared_get(&cache_key).await {
            Ok(Some(value)) => {
                debug!(key, backend = self.shared.backend(), "Shared cache hit");
                self.remember_locally(key, &value);
                return Ok(value);
            }
            Ok(None) => debug!(key, "Shared cache miss"),
            Err(e) => report_tier_error(key, &e, "Cache error, fetching from source"),
        }

        let value = match timeout(self.settings.fetch_timeout, self.fetcher.fetch(key)).await {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                debug!(key, error = %e, "Fetch failed");
                return Err(e);
            }
            Err(_) => {
                warn!(key, after = ?self.settings.fetch_timeout, "Fetch timed out");
                return Err(Error::Timeout {
                    operation: "fetch",
                    after: self.settings.fetch_timeout,
                });
            }
        };

        if let Err(e) = self.shared_set(&cache_key, &value).await {
            report_tier_error(key, &e, "Failed to cache fetched value");
        }
        self.remember_locally(key, &value);

        Ok(value)
    }

    /// Resolve every key independently. One failing key never aborts the
    /// others; results keep the order of `keys`.
    pub async fn resolve_batch(&self, keys: &[String]) -> Vec<Resolution<V>> {
        join_all(keys.iter().map(|key| async move {
            Resolution {
                key: key.clone(),
                outcome: self.resolve(key).await,
            }
        }))
        .await
    }

    /// Number of distinct keys that have been resolved (size of the lock
    /// registry)
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.locks.len()
    }

    /// Shared tier backend name
    #[must_use]
    pub fn shared_backend(&self) -> &'static str {
        self.shared.backend()
    }

    /// Statistics of the shared tier, when it keeps any
    #[must_use]
    pub fn shared_stats(&self) -> Option<CacheStatsSnapshot> {
        self.shared.stats()
    }

    /// Statistics of the near-cache, when enabled
    #[must_use]
    pub fn local_stats(&self) -> Option<CacheStatsSnapshot> {
        self.local.as_deref().map(TtlCache::stats)
    }

    /// Reclaim expired near-cache entries
    pub fn sweep_local(&self) -> usize {
        self.local.as_deref().map_or(0, TtlCache::sweep)
    }

    /// Start background reclamation of the near-cache, when enabled
    pub fn spawn_local_sweeper(&self, period: Duration) -> Option<JoinHandle<()>> {
        self.local.as_ref().map(|local| local.spawn_sweeper(period))
    }

    async fn shared_get(&self, cache_key: &str) -> Result<Option<V>> {
        let raw = timeout(self.settings.cache_timeout, self.shared.get(cache_key))
            .await
            .map_err(|_| Error::Timeout {
                operation: "shared cache get",
                after: self.settings.cache_timeout,
            })??;

        raw.map(|raw| {
            serde_json::from_str(&raw).map_err(|e| {
                Error::SharedCache(format!("failed to unmarshal cached value: {e}"))
            })
        })
        .transpose()
    }

    async fn shared_set(&self, cache_key: &str, value: &V) -> Result<()> {
        if self.settings.shared_ttl.is_zero() {
            return Ok(());
        }
        let encoded = serde_json::to_string(value)?;
        timeout(
            self.settings.cache_timeout,
            self.shared.set(cache_key, encoded, self.settings.shared_ttl),
        )
        .await
        .map_err(|_| Error::Timeout {
            operation: "shared cache set",
            after: self.settings.cache_timeout,
        })?
    }

    fn remember_locally(&self, key: &str, value: &V) {
        if let Some(local) = &self.local {
            local.set(key.to_string(), value.clone(), self.settings.local_ttl);
        }
    }
}

/// Log a swallowed shared-tier error. Outages and timeouts are expected
/// noise; anything else points at a bug or misconfiguration.
fn report_tier_error(key: &str, e: &Error, message: &str) {
    if e.is_transient() {
        warn!(key, error = %e, "{message}");
    } else {
        error!(key, error = %e, "{message}");
    }
}
