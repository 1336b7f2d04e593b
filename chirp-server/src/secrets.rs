//! Where per-user TOTP secrets come from.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chirp_core::{
    ActionRequest, BackendConfig, BackendError, DiagnosticLog, Gateway, LogRing, Operation,
    RestBackend, Select,
};
use parking_lot::RwLock;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SecretStoreError {
    #[error("{}", .0.message)]
    Backend(#[from] BackendError),

    #[error("secret store is not configured (set CHIRP_BACKEND_URL and CHIRP_SERVICE_ROLE_KEY)")]
    Unconfigured,

    #[error("failed to read secrets file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse secrets file: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Lookup of the base32 TOTP secret enrolled by a user.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// `Ok(None)` when the user has not enabled two-factor auth.
    async fn totp_secret(&self, user_id: &str) -> Result<Option<String>, SecretStoreError>;
}

#[derive(Debug, Deserialize)]
struct SecretRow {
    #[serde(default)]
    secret: Option<String>,
}

/// Reads `user_2fa.secret` through the backend's REST API.
pub struct RestSecretStore {
    gateway: Option<Gateway>,
}

impl RestSecretStore {
    /// `config.api_key` must be the service-role key: `user_2fa` is not
    /// readable with the public key.
    pub fn new(config: &BackendConfig, log: Arc<dyn DiagnosticLog>) -> Result<Self, BackendError> {
        let backend = RestBackend::new(config)?;
        Ok(Self {
            gateway: Some(Gateway::new(Arc::new(backend), log)),
        })
    }

    /// A store that fails every lookup. The service still starts so the
    /// misconfiguration shows up in responses and logs.
    pub fn unconfigured() -> Self {
        Self { gateway: None }
    }

    pub fn with_gateway(gateway: Gateway) -> Self {
        Self {
            gateway: Some(gateway),
        }
    }
}

#[async_trait]
impl SecretStore for RestSecretStore {
    async fn totp_secret(&self, user_id: &str) -> Result<Option<String>, SecretStoreError> {
        let gateway = self.gateway.as_ref().ok_or(SecretStoreError::Unconfigured)?;
        let request = ActionRequest::new(Operation::select(
            "user_2fa",
            Select {
                columns: Some("secret".into()),
                single: true,
                ..Select::default()
            },
        ))
        .param("user_id", user_id);

        let row: Option<SecretRow> = gateway.fetch(request).await.into_result()?;
        Ok(row
            .and_then(|row| row.secret)
            .filter(|secret| !secret.trim().is_empty()))
    }
}

/// Secrets held in memory, optionally loaded from a YAML map.
#[derive(Default)]
pub struct MemorySecretStore {
    secrets: RwLock<HashMap<String, String>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SecretStoreError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let secrets: HashMap<String, String> = serde_yaml::from_str(&contents)?;
        Ok(Self {
            secrets: RwLock::new(secrets),
        })
    }

    pub fn insert(&self, user_id: impl Into<String>, secret: impl Into<String>) {
        self.secrets.write().insert(user_id.into(), secret.into());
    }

    pub fn len(&self) -> usize {
        self.secrets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.read().is_empty()
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn totp_secret(&self, user_id: &str) -> Result<Option<String>, SecretStoreError> {
        Ok(self.secrets.read().get(user_id).cloned())
    }
}

/// Diagnostic sink for the store's gateway. Records are mirrored to tracing.
pub fn service_log() -> Arc<dyn DiagnosticLog> {
    LogRing::default().shared()
}
