//! Nova API Library
//!
//! Wallet balance service built on a keyed cache-aside resolution engine.
//!
//! # Features
//!
//! - **Tiered resolution**: optional near-cache, shared cache (in-process or
//!   Redis/Dragonfly), then the Solana RPC as source of truth
//! - **Request coalescing**: at most one in-flight fetch per wallet
//! - **API key validation** with a TTL cache in front of the key store
//! - **Fixed-window rate limiting** per client IP
//! - **Production Ready**: structured logging, health endpoint with cache
//!   statistics, graceful shutdown

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod identity;
pub mod models;
pub mod ratelimit;
pub mod resolver;
pub mod rpc;
pub mod singleflight;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber
                .with(fmt::layer().json())
                .try_init()
                .map_err(|e| Error::Internal(e.to_string()))?;
        }
        _ => {
            subscriber
                .with(fmt::layer())
                .try_init()
                .map_err(|e| Error::Internal(e.to_string()))?;
        }
    }

    Ok(())
}
