//! API key validation
//!
//! [`ValidationCache`] sits in front of an [`IdentityStore`] and remembers
//! successful lookups for a configured TTL. Rejections are never cached, and
//! concurrent lookups of a token that is not cached yet are not coalesced:
//! each one reaches the store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::cache::{CacheStatsSnapshot, TtlCache};
use crate::config::{ApiKeyConfig, AuthConfig};
use crate::error::Rejection;
use crate::{Error, Result};

/// Length in bytes of an API key id (a 24-hex-digit object id)
pub const API_KEY_ID_LEN: usize = 12;

/// Descriptor of a valid API key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKey {
    /// Key id, as presented by clients
    pub id: String,
    /// What the key is for (informational only)
    #[serde(default)]
    pub note: String,
}

/// Read side of the store that knows which API keys exist.
#[async_trait]
pub trait IdentityStore: Send + Sync + 'static {
    /// Look up `token`.
    ///
    /// Unknown and malformed tokens are reported as
    /// [`Error::Rejected`]. A store that cannot answer (connection lost,
    /// query failed) returns [`Error::IdentityStore`].
    async fn lookup(&self, token: &str) -> Result<ApiKey>;
}

/// Normalize a presented token to its canonical id form.
///
/// Tokens are object ids: 24 hex digits, case-insensitive.
pub fn parse_key_id(token: &str) -> Result<String> {
    match hex::decode(token) {
        Ok(bytes) if bytes.len() == API_KEY_ID_LEN => Ok(token.to_ascii_lowercase()),
        _ => Err(Error::Rejected(Rejection::Malformed)),
    }
}

/// Identity store holding a fixed set of keys from configuration.
#[derive(Debug, Default)]
pub struct StaticKeyStore {
    keys: HashMap<String, ApiKey>,
}

impl StaticKeyStore {
    /// Build a store from configured keys. Keys that are not valid ids are
    /// skipped with a warning.
    pub fn new<'a>(keys: impl IntoIterator<Item = &'a ApiKeyConfig>) -> Self {
        let keys = keys
            .into_iter()
            .filter_map(|k| match parse_key_id(&k.key) {
                Ok(id) => Some((
                    id.clone(),
                    ApiKey {
                        id,
                        note: k.note.clone(),
                    },
                )),
                Err(_) => {
                    warn!(note = %k.note, "Ignoring configured API key that is not a 24-hex-digit id");
                    None
                }
            })
            .collect();
        Self { keys }
    }

    /// Build a store from the auth section of the configuration
    #[must_use]
    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(&config.api_keys)
    }

    /// Number of known keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Return `true` when no keys are configured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[async_trait]
impl IdentityStore for StaticKeyStore {
    async fn lookup(&self, token: &str) -> Result<ApiKey> {
        let id = parse_key_id(token)?;
        self.keys
            .get(&id)
            .cloned()
            .ok_or(Error::Rejected(Rejection::NotFound))
    }
}

/// Cache-aside wrapper around an [`IdentityStore`].
pub struct ValidationCache {
    store: Arc<dyn IdentityStore>,
    cache: Arc<TtlCache<String, ApiKey>>,
    ttl: Duration,
    lookup_timeout: Duration,
}

impl ValidationCache {
    /// Create a validator. A zero `ttl` disables caching entirely.
    pub fn new(store: Arc<dyn IdentityStore>, ttl: Duration, lookup_timeout: Duration) -> Self {
        Self {
            store,
            cache: Arc::new(TtlCache::new()),
            ttl,
            lookup_timeout,
        }
    }

    /// Whether successful lookups are cached
    #[must_use]
    pub fn caching_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    /// Validate `token`, consulting the store only on a cache miss.
    pub async fn validate(&self, token: &str) -> Result<ApiKey> {
        if self.caching_enabled() {
            if let Some(key) = self.cache.get(token) {
                debug!("API key cache hit");
                return Ok(key);
            }
        }

        let looked_up = timeout(self.lookup_timeout, self.store.lookup(token))
            .await
            .map_err(|_| Error::Timeout {
                operation: "identity lookup",
                after: self.lookup_timeout,
            })?;

        let key = match looked_up {
            Ok(key) => key,
            Err(Error::Rejected(reason)) => {
                debug!(?reason, "API key rejected");
                return Err(Error::Rejected(reason));
            }
            Err(e) => {
                warn!(error = %e, "Failed to validate API key");
                return Err(e);
            }
        };

        if self.caching_enabled() {
            self.cache.set(token.to_string(), key.clone(), self.ttl);
        }
        Ok(key)
    }

    /// Start background reclamation of expired entries
    pub fn spawn_sweeper(&self, period: Duration) -> JoinHandle<()> {
        self.cache.spawn_sweeper(period)
    }

    /// Cache statistics
    #[must_use]
    pub fn stats(&self) -> CacheStatsSnapshot {
        self.cache.stats()
    }
}
