//! Request admission middleware
//!
//! - Per-IP fixed-window rate limiting, applied to every route
//! - API key authentication via the token header, applied to `/api/*`

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json,
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode, header::RETRY_AFTER},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, error, warn};

use super::router::AppState;
use crate::Error;
use crate::identity::ApiKey;
use crate::models::ApiResponse;

/// Identity used when the peer address is unknown
const UNKNOWN_CLIENT: &str = "unknown";

/// Client IP of a request, as seen by the listener
fn client_ip(request: &Request<Body>) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or_else(|| UNKNOWN_CLIENT.to_string(), |ci| ci.0.ip().to_string())
}

/// Rate limiting middleware
pub async fn rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(limit) = state.requests_per_minute else {
        return next.run(request).await;
    };
    let ip = client_ip(&request);

    if state.limiter.allow(&ip, limit) {
        return next.run(request).await;
    }

    warn!(client = %ip, path = %request.uri().path(), "Rate limit exceeded");

    // Seconds until the client's window closes, rounded up
    let retry_after = state
        .limiter
        .counter(&ip)
        .map(|c| c.window_expires_at.saturating_duration_since(Instant::now()))
        .unwrap_or_else(|| state.limiter.window());
    let retry_after = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);

    (
        StatusCode::TOO_MANY_REQUESTS,
        [(RETRY_AFTER, retry_after.max(1).to_string())],
        Json(ApiResponse::<()>::error("Rate limit exceeded.")),
    )
        .into_response()
}

/// Authentication middleware
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let token = request
        .headers()
        .get(&state.token_header)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_owned);

    let Some(token) = token else {
        debug!(path = %request.uri().path(), "Missing token header");
        return unauthorized_response(&format!("Missing {} header", state.token_header_name));
    };

    match state.validator.validate(&token).await {
        Ok(key) => {
            debug!(path = %request.uri().path(), "Authenticated request");
            // Inject key info for downstream handlers
            request.extensions_mut().insert::<ApiKey>(key);
            next.run(request).await
        }
        Err(Error::Rejected(reason)) => {
            debug!(?reason, "Invalid API key");
            unauthorized_response("Invalid API key")
        }
        Err(e) if e.is_transient() => {
            warn!(error = %e, "API key validation failed");
            unauthorized_response("Invalid API key")
        }
        Err(e) => {
            error!(error = %e, "API key validation failed");
            unauthorized_response("Invalid API key")
        }
    }
}

/// Create a 401 Unauthorized response
fn unauthorized_response(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ApiResponse::<()>::error(message)),
    )
        .into_response()
}
