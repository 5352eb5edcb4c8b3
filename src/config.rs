//! Configuration management

use std::{env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Placeholder for secrets in printed configuration
const REDACTED: &str = "<redacted>";

/// Mask the password of `raw`, or all of it when it does not parse as a URL
fn redact_url(raw: &str) -> String {
    match reqwest::Url::parse(raw) {
        Ok(mut url) => {
            if url.password().is_some() && url.set_password(Some("redacted")).is_err() {
                return REDACTED.to_string();
            }
            url.to_string()
        }
        Err(_) => REDACTED.to_string(),
    }
}

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before `${VAR}` expansion.
    /// Paths support ~ expansion. Loaded in order, missing files are skipped.
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Rate limiting configuration
    pub rate_limit: RateLimitConfig,
    /// Solana RPC configuration
    pub solana: SolanaConfig,
    /// Shared cache tier configuration
    pub shared_cache: SharedCacheConfig,
    /// Balance caching configuration
    pub balance: BalanceCacheConfig,
    /// API key authentication configuration
    pub auth: AuthConfig,
    /// In-process cache maintenance
    pub cache: CacheConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            env_files: vec![".env".to_string()],
            server: ServerConfig::default(),
            rate_limit: RateLimitConfig::default(),
            solana: SolanaConfig::default(),
            shared_cache: SharedCacheConfig::default(),
            balance: BalanceCacheConfig::default(),
            auth: AuthConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Maximum wallets accepted in one balance request
    pub max_wallets_per_request: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_wallets_per_request: 50,
        }
    }
}

/// Per-client rate limiting
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Whether requests are limited at all
    pub enabled: bool,
    /// Requests admitted per client per window
    pub requests_per_minute: u32,
    /// Window length
    #[serde(with = "humantime_serde")]
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_minute: 10,
            window: Duration::from_secs(60),
        }
    }
}

/// Solana RPC source
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolanaConfig {
    /// JSON-RPC endpoint (supports `${VAR}`)
    pub rpc_endpoint: String,
    /// Commitment level for `getBalance`
    pub commitment: String,
    /// Bound on each RPC call
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for SolanaConfig {
    fn default() -> Self {
        Self {
            rpc_endpoint: "https://api.mainnet-beta.solana.com".to_string(),
            commitment: "finalized".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Shared cache tier
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SharedCacheConfig {
    /// Redis/Dragonfly URL (supports `${VAR}`). Unset or empty keeps the
    /// shared tier in process.
    pub url: Option<String>,
    /// Prefix for balance keys
    pub key_prefix: String,
    /// Bound on each shared cache call
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for SharedCacheConfig {
    fn default() -> Self {
        Self {
            url: None,
            key_prefix: "balance:".to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Balance caching
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BalanceCacheConfig {
    /// TTL of balances in the shared tier (0 disables writes)
    #[serde(with = "humantime_serde")]
    pub cache_ttl: Duration,
    /// TTL of the in-process near-cache (0 disables it)
    #[serde(with = "humantime_serde")]
    pub local_ttl: Duration,
}

impl Default for BalanceCacheConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(300),
            local_ttl: Duration::ZERO,
        }
    }
}

/// API key authentication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Header carrying the API key
    pub header: String,
    /// TTL of validated keys (0 disables caching)
    #[serde(with = "humantime_serde")]
    pub cache_ttl: Duration,
    /// Bound on each identity store lookup
    #[serde(with = "humantime_serde")]
    pub lookup_timeout: Duration,
    /// Known API keys
    pub api_keys: Vec<ApiKeyConfig>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            header: "X-Token".to_string(),
            cache_ttl: Duration::from_secs(300),
            lookup_timeout: Duration::from_secs(5),
            api_keys: Vec::new(),
        }
    }
}

/// A configured API key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyConfig {
    /// The key (24 hex digits, supports `${VAR}`)
    pub key: String,
    /// What the key is for
    #[serde(default)]
    pub note: String,
}

/// In-process cache maintenance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Period of the background sweep of expired entries
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist, cannot be parsed
    /// or holds invalid values.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        // Load from file if provided
        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (NOVA_API_ prefix)
        figment = figment.merge(Env::prefixed("NOVA_API_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // Load env files into process environment (before env var expansion)
        config.load_env_files();

        config.expand_env_vars();
        config.validate()?;

        Ok(config)
    }

    /// Reject values the service cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.server.max_wallets_per_request == 0 {
            return Err(Error::Config(
                "server.max_wallets_per_request must be at least 1".to_string(),
            ));
        }
        if self.rate_limit.window.is_zero() {
            return Err(Error::Config("rate_limit.window must be non-zero".to_string()));
        }
        if self.cache.sweep_interval.is_zero() {
            return Err(Error::Config(
                "cache.sweep_interval must be non-zero".to_string(),
            ));
        }
        if self.auth.header.is_empty() {
            return Err(Error::Config("auth.header must not be empty".to_string()));
        }
        Ok(())
    }

    /// Copy of the configuration safe to print: API keys and the shared
    /// cache URL password are masked
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        for key in &mut config.auth.api_keys {
            key.key = REDACTED.to_string();
        }
        if let Some(url) = config.shared_cache.url.as_mut() {
            *url = redact_url(url);
        }
        config
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => {
                        tracing::info!("Loaded env file: {expanded}");
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load env file {expanded}: {e}");
                    }
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Expand ${VAR} and ${VAR:-default} patterns in config values
    fn expand_env_vars(&mut self) {
        // Pattern: ${VAR} or ${VAR:-default}
        let Ok(re) = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}") else {
            return;
        };

        self.solana.rpc_endpoint = Self::expand_string(&re, &self.solana.rpc_endpoint);

        self.shared_cache.url = self
            .shared_cache
            .url
            .as_deref()
            .map(|url| Self::expand_string(&re, url))
            .filter(|url| !url.is_empty());

        for key in &mut self.auth.api_keys {
            key.key = Self::expand_string(&re, &key.key);
        }
    }

    /// Expand environment variables in a string
    fn expand_string(re: &Regex, value: &str) -> String {
        re.replace_all(value, |caps: &regex::Captures<'_>| {
            let var_name = &caps[1];
            let default = caps.get(2).map_or("", |m| m.as_str());
            env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s", "250ms")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// Bare numbers are seconds.
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the value cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Seconds(u64),
            Text(String),
        }

        let s = match Raw::deserialize(deserializer)? {
            Raw::Seconds(secs) => return Ok(Duration::from_secs(secs)),
            Raw::Text(s) => s,
        };
        let s = s.trim();

        // "ms" must be checked before "s" and "m"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(serde::de::Error::custom)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        } else if let Some(mins) = s.strip_suffix('m') {
            scaled_secs(mins, 60)
        } else if let Some(hours) = s.strip_suffix('h') {
            scaled_secs(hours, 3600)
        } else {
            // Assume seconds
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        }
    }

    /// Parse `value` as a count of `unit`-second units
    fn scaled_secs<E: serde::de::Error>(value: &str, unit: u64) -> Result<Duration, E> {
        let count = value.trim().parse::<u64>().map_err(E::custom)?;
        count
            .checked_mul(unit)
            .map(Duration::from_secs)
            .ok_or_else(|| E::custom(format!("duration {value:?} is too large")))
    }
}
