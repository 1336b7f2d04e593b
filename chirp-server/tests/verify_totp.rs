use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chirp_core::BackendError;
use chirp_server::ratelimit::RateLimitConfig;
use chirp_server::secrets::{MemorySecretStore, SecretStore, SecretStoreError};
use chirp_server::server::{router, AppState};
use chirp_server::totp::TotpVerifier;
use serde_json::{json, Value};
use tower::ServiceExt;

const SECRET: &str = "JBSWY3DPEHPK3PXP";

struct FailingStore;

#[async_trait]
impl SecretStore for FailingStore {
    async fn totp_secret(&self, _user_id: &str) -> Result<Option<String>, SecretStoreError> {
        Err(BackendError::with_code("connection refused", "network").into())
    }
}

fn app_with(store: Arc<dyn SecretStore>, rate_limit: RateLimitConfig) -> Router {
    router(AppState {
        store,
        verifier: TotpVerifier::default(),
        rate_limiter: chirp_server::ratelimit::RateLimiter::new(rate_limit),
    })
}

fn app() -> Router {
    let store = MemorySecretStore::new();
    store.insert("u2", SECRET);
    store.insert("broken", "!!!");
    app_with(Arc::new(store), RateLimitConfig::default())
}

fn now() -> u64 {
    chrono::Utc::now().timestamp() as u64
}

async fn post(app: Router, body: Value) -> (StatusCode, Option<String>, Value) {
    post_raw(app, body.to_string()).await
}

async fn post_raw(app: Router, body: String) -> (StatusCode, Option<String>, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/verify-totp")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let retry_after = response
        .headers()
        .get(header::RETRY_AFTER)
        .map(|v| v.to_str().unwrap().to_string());
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, retry_after, json)
}

#[tokio::test]
async fn test_user_without_secret_is_not_enabled() {
    let (status, _, body) = post(app(), json!({"user_id": "u1", "token": "000000"})).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({"ok": false, "message": "2FA not enabled"}));
}

#[tokio::test]
async fn test_missing_fields_are_rejected() {
    for body in [
        json!({"user_id": "u2"}),
        json!({"token": "123456"}),
        json!({"user_id": "", "token": "123456"}),
        json!({"user_id": "u2", "token": null}),
    ] {
        let (status, _, body) = post(app(), body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "user_id and token required"}));
    }
}

#[tokio::test]
async fn test_non_json_body_is_rejected() {
    let (status, _, body) = post_raw(app(), "user_id=u2".to_string()).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "user_id and token required");
}

#[tokio::test]
async fn test_current_code_is_accepted() {
    let token = TotpVerifier::default().generate(SECRET, now()).unwrap();

    let (status, _, body) = post(app(), json!({"user_id": "u2", "token": token})).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"ok": true}));
}

#[tokio::test]
async fn test_wrong_code_is_refused() {
    let verifier = TotpVerifier::default();
    let t = now();
    let valid: Vec<String> = [t - 30, t, t + 30]
        .iter()
        .map(|at| verifier.generate(SECRET, *at).unwrap())
        .collect();
    let wrong = (0..1_000_000u32)
        .map(|n| format!("{n:06}"))
        .find(|code| !valid.contains(code))
        .unwrap();

    let (status, _, body) = post(app(), json!({"user_id": "u2", "token": wrong})).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"ok": false}));
}

#[tokio::test]
async fn test_store_failure_is_500() {
    let app = app_with(Arc::new(FailingStore), RateLimitConfig::default());

    let (status, _, body) = post(app, json!({"user_id": "u2", "token": "123456"})).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({"error": "connection refused"}));
}

#[tokio::test]
async fn test_undecodable_secret_is_500() {
    let (status, _, body) = post(app(), json!({"user_id": "broken", "token": "123456"})).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("base32"));
}

#[tokio::test]
async fn test_attempts_are_rate_limited_per_user() {
    let store = MemorySecretStore::new();
    store.insert("u2", SECRET);
    let app = app_with(
        Arc::new(store),
        RateLimitConfig {
            burst: 2,
            refill_rate: 0.01,
            enabled: true,
        },
    );

    for _ in 0..2 {
        let (status, _, _) = post(app.clone(), json!({"user_id": "u2", "token": "000000"})).await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, retry_after, _) =
        post(app.clone(), json!({"user_id": "u2", "token": "000000"})).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert!(retry_after.unwrap().parse::<u64>().unwrap() >= 1);

    let (status, _, _) = post(app, json!({"user_id": "u9", "token": "000000"})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_healthz() {
    let response = app()
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}
