use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::TotpConfig;
use crate::ratelimit::{retry_after_secs, RateLimiter};
use crate::secrets::{SecretStore, SecretStoreError};
use crate::totp::{TotpVerifier, VerifyError};

const MISSING_FIELDS: &str = "user_id and token required";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn SecretStore>,
    pub verifier: TotpVerifier,
    pub rate_limiter: RateLimiter,
}

impl AppState {
    pub fn new(store: Arc<dyn SecretStore>, config: &TotpConfig) -> Self {
        Self {
            store,
            verifier: config.verifier,
            rate_limiter: RateLimiter::new(config.rate_limit.clone()),
        }
    }
}

/// Failures of the verification endpoint, mapped onto status codes.
#[derive(Debug)]
pub enum ApiError {
    MissingFields,
    NotEnabled,
    RateLimited { retry_after_secs: u64 },
    Store(String),
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::MissingFields => write!(f, "{MISSING_FIELDS}"),
            ApiError::NotEnabled => write!(f, "2FA not enabled"),
            ApiError::RateLimited { retry_after_secs } => {
                write!(f, "too many attempts, retry in {retry_after_secs}s")
            }
            ApiError::Store(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<SecretStoreError> for ApiError {
    fn from(err: SecretStoreError) -> Self {
        ApiError::Store(err.to_string())
    }
}

impl From<VerifyError> for ApiError {
    fn from(err: VerifyError) -> Self {
        ApiError::Store(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        match self {
            ApiError::MissingFields => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
            }
            ApiError::NotEnabled => (
                StatusCode::NOT_FOUND,
                Json(json!({ "ok": false, "message": message })),
            )
                .into_response(),
            ApiError::RateLimited { retry_after_secs } => (
                StatusCode::TOO_MANY_REQUESTS,
                [(header::RETRY_AFTER, retry_after_secs.to_string())],
                Json(json!({ "error": message })),
            )
                .into_response(),
            ApiError::Store(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": message })),
            )
                .into_response(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub ok: bool,
}

/// A field counts as present when it is a non-empty string or a number.
fn field(body: &Value, name: &str) -> Option<String> {
    match body.get(name)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/verify-totp", post(verify_totp))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(config: TotpConfig, store: Arc<dyn SecretStore>) -> Result<()> {
    let state = AppState::new(store, &config);
    let _cleanup = state.rate_limiter.spawn_cleanup(
        std::time::Duration::from_secs(60),
        std::time::Duration::from_secs(15 * 60),
    );
    let app = router(state);

    info!(addr = %config.listen_addr, "chirp-totp listening");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn verify_totp(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let Ok(Json(body)) = body else {
        return Err(ApiError::MissingFields);
    };
    let (Some(user_id), Some(token)) = (field(&body, "user_id"), field(&body, "token")) else {
        return Err(ApiError::MissingFields);
    };

    if let Err(wait) = state.rate_limiter.check(&user_id) {
        warn!(%user_id, "verification rate limited");
        return Err(ApiError::RateLimited {
            retry_after_secs: retry_after_secs(wait),
        });
    }

    let secret = match state.store.totp_secret(&user_id).await {
        Ok(Some(secret)) => secret,
        Ok(None) => return Err(ApiError::NotEnabled),
        Err(err) => {
            warn!(%user_id, error = %err, "secret lookup failed");
            return Err(err.into());
        }
    };

    let now = chrono::Utc::now().timestamp().max(0) as u64;
    let ok = state.verifier.verify(&secret, &token, now).map_err(|err| {
        warn!(%user_id, error = %err, "stored secret is unusable");
        ApiError::from(err)
    })?;

    info!(%user_id, ok, "totp verification");
    Ok(Json(VerifyResponse { ok }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_presence() {
        let body = json!({"user_id": "u1", "token": 123456, "blank": "  ", "nil": null});
        assert_eq!(field(&body, "user_id").as_deref(), Some("u1"));
        assert_eq!(field(&body, "token").as_deref(), Some("123456"));
        assert_eq!(field(&body, "blank"), None);
        assert_eq!(field(&body, "nil"), None);
        assert_eq!(field(&body, "missing"), None);
    }
}
