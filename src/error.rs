//! Error types for Nova API

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for Nova API
pub type Result<T> = std::result::Result<T, Error>;

/// Why an identity token was refused.
///
/// Both variants are terminal for the request; they differ only in how
/// they are logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Token is well formed but unknown to the identity store
    NotFound,
    /// Token is not in the format the identity store expects
    Malformed,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound => f.write_str("invalid API key"),
            Self::Malformed => f.write_str("invalid API key format"),
        }
    }
}

/// Nova API errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The external source refused the key before fetching
    #[error("invalid wallet address: {reason}")]
    InvalidKey {
        /// Key as supplied by the caller
        key: String,
        /// Why it was refused
        reason: String,
    },

    /// The external source failed while fetching
    #[error("failed to get balance: {reason}")]
    Fetch {
        /// Key being fetched
        key: String,
        /// Upstream failure description
        reason: String,
    },

    /// A collaborator call exceeded its bound
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// Name of the bounded operation
        operation: &'static str,
        /// Bound that was exceeded
        after: Duration,
    },

    /// Shared cache tier failure (never fatal to a resolution)
    #[error("Shared cache error: {0}")]
    SharedCache(String),

    /// Identity token rejected
    #[error("{0}")]
    Rejected(Rejection),

    /// Identity store failed to answer. Returned by [`IdentityStore`]
    /// implementations backed by a database or remote service when the
    /// lookup itself failed, as opposed to the token being rejected.
    ///
    /// [`IdentityStore`]: crate::identity::IdentityStore
    #[error("Identity store error: {0}")]
    IdentityStore(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a fetch error for `key`
    pub fn fetch(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Fetch {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid-key error for `key`
    pub fn invalid_key(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Dependency outages that are expected to clear on their own
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::SharedCache(_) | Self::Timeout { .. } | Self::IdentityStore(_)
        )
    }

    /// Whether this error is a validation rejection
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        Self::SharedCache(e.to_string())
    }
}
