//! API server

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::router::{AppState, create_router};
use crate::cache::{MemorySharedCache, RedisSharedCache, SharedCache};
use crate::config::Config;
use crate::identity::{StaticKeyStore, ValidationCache};
use crate::ratelimit::RateLimiter;
use crate::resolver::{ResolverSettings, TieredResolver};
use crate::rpc::SolanaRpc;
use crate::{Error, Result};

/// Nova API server
pub struct Gateway {
    /// Configuration
    config: Config,
    /// Shared application state
    state: Arc<AppState>,
    /// Background cache sweepers, aborted on shutdown
    sweepers: Vec<JoinHandle<()>>,
}

impl Gateway {
    /// Create a new gateway. An unreachable shared cache is logged, not fatal.
    pub async fn new(config: Config) -> Result<Self> {
        let (shared, memory_tier): (Arc<dyn SharedCache>, Option<MemorySharedCache>) =
            match config.shared_cache.url.as_deref() {
                Some(url) => {
                    let redis = RedisSharedCache::new(url, config.shared_cache.timeout)?;
                    if let Err(e) = redis.warm_up().await {
                        warn!(error = %e, "Shared cache unavailable, serving from source until it connects");
                    }
                    (Arc::new(redis) as Arc<dyn SharedCache>, None)
                }
                None => {
                    info!("No shared cache URL configured, using in-process shared tier");
                    let memory = MemorySharedCache::new();
                    (Arc::new(memory.clone()) as Arc<dyn SharedCache>, Some(memory))
                }
            };

        let rpc = SolanaRpc::new(
            config.solana.rpc_endpoint.clone(),
            config.solana.commitment.clone(),
            config.solana.timeout,
        )?;
        let resolver: Arc<TieredResolver<f64>> = Arc::new(TieredResolver::new(
            Arc::new(rpc),
            shared,
            resolver_settings(&config),
        ));

        let store = StaticKeyStore::from_config(&config.auth);
        if store.is_empty() {
            warn!("No API keys configured - every /api request will be rejected");
        }
        let validator = Arc::new(ValidationCache::new(
            Arc::new(store),
            config.auth.cache_ttl,
            config.auth.lookup_timeout,
        ));

        let limiter = Arc::new(RateLimiter::new(config.rate_limit.window));

        let period = config.cache.sweep_interval;
        let mut sweepers = vec![validator.spawn_sweeper(period), limiter.spawn_sweeper(period)];
        if let Some(memory) = memory_tier {
            sweepers.push(memory.spawn_sweeper(period));
        }
        if let Some(handle) = resolver.spawn_local_sweeper(period) {
            sweepers.push(handle);
        }

        let state = Arc::new(AppState::new(&config, resolver, validator, limiter)?);

        Ok(Self {
            config,
            state,
            sweepers,
        })
    }

    /// Run the gateway until a shutdown signal arrives
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let app = create_router(Arc::clone(&self.state));

        // Bind listener
        let listener = TcpListener::bind(addr).await?;

        info!(host = %self.config.server.host, port = %self.config.server.port, "Listening");
        info!(
            shared_cache = self.state.resolver.shared_backend(),
            balance_ttl = ?self.config.balance.cache_ttl,
            api_key_ttl = ?self.config.auth.cache_ttl,
            rate_limit = ?self.state.requests_per_minute,
            max_wallets = self.config.server.max_wallets_per_request,
            "Nova API ready"
        );

        // Run server with graceful shutdown
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| Error::Internal(e.to_string()))?;

        for sweeper in &self.sweepers {
            sweeper.abort();
        }

        Ok(())
    }
}

/// Build resolver tunables from the configuration
#[must_use]
pub fn resolver_settings(config: &Config) -> ResolverSettings {
    ResolverSettings {
        key_prefix: config.shared_cache.key_prefix.clone(),
        shared_ttl: config.balance.cache_ttl,
        local_ttl: config.balance.local_ttl,
        cache_timeout: config.shared_cache.timeout,
        fetch_timeout: config.solana.timeout,
    }
}

/// Shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
