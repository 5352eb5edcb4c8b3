//! Solana JSON-RPC balance fetcher

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::resolver::Fetcher;
use crate::{Error, Result};

/// Lamports in one SOL
pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// Convert lamports to SOL
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn lamports_to_sol(lamports: u64) -> f64 {
    lamports as f64 / LAMPORTS_PER_SOL as f64
}

/// Check that `address` is a base58-encoded 32-byte public key.
pub fn validate_address(address: &str) -> Result<()> {
    let bytes = bs58::decode(address)
        .into_vec()
        .map_err(|e| Error::invalid_key(address, e.to_string()))?;
    if bytes.len() != 32 {
        return Err(Error::invalid_key(
            address,
            format!("expected 32 bytes, got {}", bytes.len()),
        ));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<BalanceResult>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct BalanceResult {
    value: u64,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// `getBalance` client for a Solana RPC endpoint.
pub struct SolanaRpc {
    client: Client,
    endpoint: String,
    commitment: String,
}

impl SolanaRpc {
    /// Create a fetcher for `endpoint`. Every request is bounded by `timeout`.
    pub fn new(endpoint: impl Into<String>, commitment: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            commitment: commitment.into(),
        })
    }

    /// Fetch the balance of `address` in lamports
    pub async fn get_balance_lamports(&self, address: &str) -> Result<u64> {
        validate_address(address)?;

        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "getBalance",
            "params": [address, { "commitment": self.commitment }],
        });

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::fetch(address, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::fetch(address, format!("RPC returned HTTP {status}")));
        }

        let parsed: RpcResponse = response
            .json()
            .await
            .map_err(|e| Error::fetch(address, format!("malformed RPC response: {e}")))?;

        match parsed {
            RpcResponse {
                error: Some(err), ..
            } => Err(Error::fetch(
                address,
                format!("RPC error {}: {}", err.code, err.message),
            )),
            RpcResponse {
                result: Some(result),
                ..
            } => {
                debug!(address, lamports = result.value, "Fetched balance");
                Ok(result.value)
            }
            RpcResponse { .. } => Err(Error::fetch(address, "RPC response carried no result")),
        }
    }
}

#[async_trait]
impl Fetcher<f64> for SolanaRpc {
    async fn fetch(&self, key: &str) -> Result<f64> {
        self.get_balance_lamports(key).await.map(lamports_to_sol)
    }
}
