//! HTTP API tests
//!
//! Drives the router in-process with `tower::ServiceExt::oneshot`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    extract::ConnectInfo,
    http::{Method, Request, StatusCode, header},
};
use nova_api::cache::MemorySharedCache;
use nova_api::config::{ApiKeyConfig, Config};
use nova_api::gateway::{AppState, create_router, resolver_settings};
use nova_api::identity::{ApiKey, IdentityStore, StaticKeyStore, ValidationCache};
use nova_api::ratelimit::RateLimiter;
use nova_api::resolver::{Fetcher, TieredResolver};
use nova_api::rpc::SolanaRpc;
use nova_api::{Error, Result};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tower::ServiceExt;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

const API_KEY: &str = "65f1c0ffee0123456789abcd";

/// Fetcher returning 1.5 for every wallet except those starting with "bad"
struct StubFetcher {
    calls: AtomicUsize,
}

#[async_trait]
impl Fetcher<f64> for StubFetcher {
    async fn fetch(&self, key: &str) -> Result<f64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if key.starts_with("bad") {
            return Err(Error::fetch(key, "account not found"));
        }
        Ok(1.5)
    }
}

/// Identity store whose backend is down
struct UnreachableStore;

#[async_trait]
impl IdentityStore for UnreachableStore {
    async fn lookup(&self, _token: &str) -> Result<ApiKey> {
        Err(Error::IdentityStore("server selection timeout".into()))
    }
}

/// Test configuration; `None` switches rate limiting off
fn test_config(requests_per_minute: Option<u32>) -> Config {
    let mut config = Config::default();
    config.rate_limit.enabled = requests_per_minute.is_some();
    config.rate_limit.requests_per_minute = requests_per_minute.unwrap_or_default();
    config.server.max_wallets_per_request = 3;
    config.auth.api_keys = vec![ApiKeyConfig {
        key: API_KEY.to_string(),
        note: "tests".to_string(),
    }];
    config
}

fn app_with(
    config: &Config,
    fetcher: Arc<dyn Fetcher<f64>>,
    store: Arc<dyn IdentityStore>,
) -> Router {
    let resolver = Arc::new(TieredResolver::new(
        fetcher,
        Arc::new(MemorySharedCache::new()),
        resolver_settings(config),
    ));
    let validator = Arc::new(ValidationCache::new(
        store,
        config.auth.cache_ttl,
        config.auth.lookup_timeout,
    ));
    let limiter = Arc::new(RateLimiter::new(config.rate_limit.window));

    let state = AppState::new(config, resolver, validator, limiter).unwrap();
    create_router(Arc::new(state))
}

fn app_with_fetcher(config: &Config, fetcher: Arc<dyn Fetcher<f64>>) -> Router {
    let store = Arc::new(StaticKeyStore::from_config(&config.auth));
    app_with(config, fetcher, store)
}

fn app(config: &Config) -> (Router, Arc<StubFetcher>) {
    let fetcher = Arc::new(StubFetcher {
        calls: AtomicUsize::new(0),
    });
    (app_with_fetcher(config, fetcher.clone()), fetcher)
}

fn balance_request(token: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri("/api/get-balance")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header("X-Token", token);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn from_ip(mut request: Request<Body>, ip: [u8; 4]) -> Request<Body> {
    request
        .extensions_mut()
        .insert(ConnectInfo(SocketAddr::from((ip, 40_000))));
    request
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn test_balances_for_valid_request() {
    let (app, fetcher) = app(&test_config(None));

    let (status, body) = send(
        &app,
        balance_request(Some(API_KEY), r#"{"wallets": ["w1", "w2"]}"#),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "success": true,
            "data": [
                {"wallet": "w1", "balance": 1.5},
                {"wallet": "w2", "balance": 1.5},
            ]
        })
    );
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_partial_failure_keeps_success_envelope() {
    let (app, _) = app(&test_config(None));

    let (status, body) = send(
        &app,
        balance_request(Some(API_KEY), r#"{"wallets": ["w1", "bad-wallet"]}"#),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["data"][0], json!({"wallet": "w1", "balance": 1.5}));
    assert_eq!(
        body["data"][1],
        json!({"wallet": "bad-wallet", "error": "failed to get balance: account not found"})
    );
}

#[tokio::test]
async fn test_repeated_request_is_served_from_cache() {
    let (app, fetcher) = app(&test_config(None));

    for _ in 0..3 {
        let (status, _) = send(&app, balance_request(Some(API_KEY), r#"{"wallets": ["w1"]}"#)).await;
        assert_eq!(status, StatusCode::OK);
    }
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_request_validation_errors() {
    let (app, fetcher) = app(&test_config(None));

    let cases = [
        ("not json", "Invalid JSON payload"),
        (r#"{"wallets": "w1"}"#, "Invalid JSON payload"),
        (r#"{"wallets": []}"#, "Wallets array cannot be empty"),
        (
            r#"{"wallets": ["a", "b", "c", "d"]}"#,
            "Too many wallets requested. Maximum 3 wallets allowed per request",
        ),
    ];

    for (payload, message) in cases {
        let (status, body) = send(&app, balance_request(Some(API_KEY), payload)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "payload: {payload}");
        assert_eq!(body, json!({"success": false, "error": message}));
    }
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_missing_token() {
    let (app, _) = app(&test_config(None));

    let (status, body) = send(&app, balance_request(None, r#"{"wallets": ["w1"]}"#)).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({"success": false, "error": "Missing X-Token header"}));
}

#[tokio::test]
async fn test_invalid_tokens() {
    let (app, fetcher) = app(&test_config(None));

    for token in ["invalid-key", "000000000000000000000000"] {
        let (status, body) =
            send(&app, balance_request(Some(token), r#"{"wallets": ["w1"]}"#)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, json!({"success": false, "error": "Invalid API key"}));
    }
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_rate_limit_per_client_ip() {
    let (app, _) = app(&test_config(Some(2)));
    let body = r#"{"wallets": ["w1"]}"#;

    for _ in 0..2 {
        let (status, _) = send(&app, from_ip(balance_request(Some(API_KEY), body), [10, 0, 0, 1])).await;
        assert_eq!(status, StatusCode::OK);
    }

    let response = app
        .clone()
        .oneshot(from_ip(balance_request(Some(API_KEY), body), [10, 0, 0, 1]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = response.headers()[header::RETRY_AFTER]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=60).contains(&retry_after));
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body_json: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body_json, json!({"success": false, "error": "Rate limit exceeded."}));

    // Another client is unaffected
    let (status, _) = send(&app, from_ip(balance_request(Some(API_KEY), body), [10, 0, 0, 2])).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_rate_limit_applies_before_auth() {
    let (app, _) = app(&test_config(Some(1)));

    let (status, _) = send(&app, from_ip(balance_request(None, "{}"), [10, 0, 0, 3])).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app, from_ip(balance_request(None, "{}"), [10, 0, 0, 3])).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_zero_limit_admits_one_request_per_window() {
    let (app, _) = app(&test_config(Some(0)));
    let body = r#"{"wallets": ["w1"]}"#;

    let (status, _) = send(&app, from_ip(balance_request(Some(API_KEY), body), [10, 0, 0, 4])).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, from_ip(balance_request(Some(API_KEY), body), [10, 0, 0, 4])).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body, json!({"success": false, "error": "Rate limit exceeded."}));
}

#[tokio::test]
async fn test_disabled_rate_limit_never_throttles() {
    let (app, fetcher) = app(&test_config(None));
    let body = r#"{"wallets": ["w1"]}"#;

    for _ in 0..25 {
        let (status, _) = send(&app, from_ip(balance_request(Some(API_KEY), body), [10, 0, 0, 5])).await;
        assert_eq!(status, StatusCode::OK);
    }
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_identity_store_outage_is_unauthorized() {
    let config = test_config(None);
    let fetcher = Arc::new(StubFetcher {
        calls: AtomicUsize::new(0),
    });
    let app = app_with(&config, fetcher.clone(), Arc::new(UnreachableStore));

    let (status, body) = send(&app, balance_request(Some(API_KEY), r#"{"wallets": ["w1"]}"#)).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({"success": false, "error": "Invalid API key"}));
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_health_reports_cache_stats() {
    let (app, _) = app(&test_config(None));
    send(&app, balance_request(Some(API_KEY), r#"{"wallets": ["w1"]}"#)).await;

    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("healthy"));
    assert_eq!(body["caches"]["shared"]["backend"], json!("memory"));
    assert_eq!(body["caches"]["api_keys"]["misses"], json!(1));
    assert_eq!(body["tracked_wallets"], json!(1));
}

#[tokio::test]
async fn test_cors_preflight() {
    let (app, _) = app(&test_config(None));

    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/api/get-balance")
        .header(header::ORIGIN, "https://dashboard.example")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "x-token")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "*"
    );
}

#[tokio::test]
async fn test_end_to_end_with_solana_rpc() {
    let rpc_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "result": { "context": { "slot": 1 }, "value": 3_000_000_000_u64 },
            "id": 1,
        })))
        .expect(1)
        .mount(&rpc_server)
        .await;

    let config = test_config(None);
    let rpc = SolanaRpc::new(rpc_server.uri(), "finalized", Duration::from_secs(2)).unwrap();
    let app = app_with_fetcher(&config, Arc::new(rpc));

    let wallet = "So11111111111111111111111111111111111111112";
    let payload = json!({"wallets": [wallet, wallet, "not-a-wallet"]}).to_string();
    let (status, body) = send(&app, balance_request(Some(API_KEY), &payload)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0], json!({"wallet": wallet, "balance": 3.0}));
    assert_eq!(body["data"][1], json!({"wallet": wallet, "balance": 3.0}));
    assert!(
        body["data"][2]["error"]
            .as_str()
            .unwrap()
            .starts_with("invalid wallet address")
    );
}
