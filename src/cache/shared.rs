//! Shared cache tier
//!
//! The resolver talks to the shared tier through [`SharedCache`]. Values are
//! opaque strings (the resolver JSON-encodes them). Errors from this tier are
//! never fatal to a resolution: the resolver logs them and treats them as a
//! miss.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tracing::info;

use super::ttl::{CacheStatsSnapshot, TtlCache};
use crate::{Error, Result};

/// A cache shared between resolutions (and, for network backends, between
/// processes).
#[async_trait]
pub trait SharedCache: Send + Sync + 'static {
    /// Look up `key`. `Ok(None)` is a miss.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key` for `ttl`.
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()>;

    /// Short backend name for logs and health output
    fn backend(&self) -> &'static str;

    /// Local statistics, when the backend keeps any
    fn stats(&self) -> Option<CacheStatsSnapshot> {
        None
    }
}

/// Shared tier kept in this process, backed by a [`TtlCache`].
///
/// Used when no Redis URL is configured, and as the default test double.
#[derive(Clone, Default)]
pub struct MemorySharedCache {
    inner: Arc<TtlCache<String, String>>,
}

impl MemorySharedCache {
    /// Create an empty in-process shared tier
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start background reclamation of expired entries
    pub fn spawn_sweeper(&self, period: Duration) -> JoinHandle<()> {
        self.inner.spawn_sweeper(period)
    }

    /// Drop a cached key
    pub fn delete(&self, key: &str) {
        self.inner.delete(key);
    }
}

#[async_trait]
impl SharedCache for MemorySharedCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.inner.get(key))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        self.inner.set(key.to_string(), value, ttl);
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }

    fn stats(&self) -> Option<CacheStatsSnapshot> {
        Some(self.inner.stats())
    }
}

/// Shared tier backed by Redis (or any RESP-compatible server such as
/// Dragonfly).
///
/// The connection is established lazily on first use and every attempt is
/// bounded by `timeout`. A failed attempt leaves the tier unconnected so the
/// next call retries; until then the tier reports errors and resolutions
/// fall through to the source.
#[derive(Clone)]
pub struct RedisSharedCache {
    client: redis::Client,
    conn: Arc<OnceCell<ConnectionManager>>,
    timeout: Duration,
}

impl RedisSharedCache {
    /// Open a client for `url` (`redis://[:password@]host:port/db`) without
    /// connecting. Fails only when the URL itself is unusable.
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            client,
            conn: Arc::new(OnceCell::new()),
            timeout,
        })
    }

    /// Try to establish the connection now
    pub async fn warm_up(&self) -> Result<()> {
        self.connection().await.map(|_| ())
    }

    /// Whether a connection has been established
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.conn.initialized()
    }

    async fn connection(&self) -> Result<ConnectionManager> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                let conn = tokio::time::timeout(
                    self.timeout,
                    ConnectionManager::new(self.client.clone()),
                )
                .await
                .map_err(|_| Error::Timeout {
                    operation: "shared cache connect",
                    after: self.timeout,
                })??;
                info!("Connected to shared cache");
                Ok::<_, Error>(conn)
            })
            .await?;
        Ok(conn.clone())
    }
}

#[async_trait]
impl SharedCache for RedisSharedCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection().await?;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let mut conn = self.connection().await?;
        // EX takes whole seconds; round sub-second TTLs up rather than to 0
        let seconds = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(key, value, seconds).await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
