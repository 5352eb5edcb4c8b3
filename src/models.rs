//! Request and response bodies of the HTTP API

use serde::{Deserialize, Serialize};

use crate::resolver::Resolution;

/// Body of `POST /api/get-balance`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceRequest {
    /// Wallet addresses to resolve
    pub wallets: Vec<String>,
}

/// Balance of one wallet, or why it could not be resolved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletBalance {
    /// Wallet address as requested
    pub wallet: String,
    /// Balance in SOL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<f64>,
    /// Per-wallet failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<Resolution<f64>> for WalletBalance {
    fn from(resolution: Resolution<f64>) -> Self {
        match resolution.outcome {
            Ok(balance) => Self {
                wallet: resolution.key,
                balance: Some(balance),
                error: None,
            },
            Err(e) => Self {
                wallet: resolution.key,
                balance: None,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Envelope of every JSON response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Payload on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Message on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether the request succeeded
    pub success: bool,
}

impl<T> ApiResponse<T> {
    /// Successful response carrying `data`
    pub fn ok(data: T) -> Self {
        Self {
            data: Some(data),
            error: None,
            success: true,
        }
    }

    /// Failed response carrying `message`
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            data: None,
            error: Some(message.into()),
            success: false,
        }
    }
}
