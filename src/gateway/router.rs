//! HTTP router and handlers

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderName, Method, StatusCode, header::CONTENT_TYPE},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::debug;

use super::auth::{auth_middleware, rate_limit_middleware};
use crate::config::Config;
use crate::identity::ValidationCache;
use crate::models::{ApiResponse, BalanceRequest, WalletBalance};
use crate::ratelimit::RateLimiter;
use crate::resolver::TieredResolver;
use crate::{Error, Result};

/// Shared application state
pub struct AppState {
    /// Balance resolver
    pub resolver: Arc<TieredResolver<f64>>,
    /// API key validator
    pub validator: Arc<ValidationCache>,
    /// Per-IP request limiter
    pub limiter: Arc<RateLimiter>,
    /// Requests admitted per client per window, `None` when limiting is off
    pub requests_per_minute: Option<u32>,
    /// Maximum wallets per balance request
    pub max_wallets: usize,
    /// Header carrying the API key
    pub token_header: HeaderName,
    /// Header name as configured, for messages
    pub token_header_name: String,
}

impl AppState {
    /// Assemble state from its components and the configuration
    pub fn new(
        config: &Config,
        resolver: Arc<TieredResolver<f64>>,
        validator: Arc<ValidationCache>,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self> {
        let token_header = HeaderName::from_bytes(config.auth.header.as_bytes())
            .map_err(|e| Error::Config(format!("Invalid auth header name: {e}")))?;

        Ok(Self {
            resolver,
            validator,
            limiter,
            requests_per_minute: config
                .rate_limit
                .enabled
                .then_some(config.rate_limit.requests_per_minute),
            max_wallets: config.server.max_wallets_per_request,
            token_header,
            token_header_name: config.auth.header.clone(),
        })
    }
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/get-balance", post(get_balance_handler))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth_middleware,
        ));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::POST, Method::GET, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, state.token_header.clone()]);

    Router::new()
        .route("/health", get(health_handler))
        .nest("/api", api)
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check handler
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "caches": {
            "shared": {
                "backend": state.resolver.shared_backend(),
                "stats": state.resolver.shared_stats(),
            },
            "near": state.resolver.local_stats(),
            "api_keys": state.validator.stats(),
            "rate_limit": state.limiter.stats(),
        },
        "tracked_wallets": state.resolver.tracked_keys(),
    }))
}

/// POST /api/get-balance handler
async fn get_balance_handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let Ok(request) = serde_json::from_slice::<BalanceRequest>(&body) else {
        return bad_request("Invalid JSON payload".to_string());
    };

    if request.wallets.is_empty() {
        return bad_request("Wallets array cannot be empty".to_string());
    }

    if request.wallets.len() > state.max_wallets {
        return bad_request(format!(
            "Too many wallets requested. Maximum {} wallets allowed per request",
            state.max_wallets
        ));
    }

    debug!(wallets = request.wallets.len(), "Resolving balances");

    let balances: Vec<WalletBalance> = state
        .resolver
        .resolve_batch(&request.wallets)
        .await
        .into_iter()
        .map(WalletBalance::from)
        .collect();

    Json(ApiResponse::ok(balances)).into_response()
}

/// Create a 400 Bad Request response
fn bad_request(message: String) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ApiResponse::<()>::error(message)),
    )
        .into_response()
}
