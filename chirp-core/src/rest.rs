//! HTTP backend speaking the store's REST dialect.
//!
//! Procedures are `POST /rest/v1/rpc/<name>`, table reads are
//! `GET /rest/v1/<table>?col=eq.value&order=col.desc`, and writes use
//! `POST`/`PATCH`/`DELETE` on the same table path.

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{header, Method, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::backend::{params_to_json, ActionRequest, Backend, Direction, Operation, Params};
use crate::config::BackendConfig;
use crate::error::BackendError;

const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";

/// Error body returned by the store
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

pub struct RestBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    /// Session token of the signed-in actor; the api key is used when absent
    access_token: RwLock<Option<String>>,
}

impl RestBackend {
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| BackendError::new(format!("failed to build http client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            access_token: RwLock::new(None),
        })
    }

    /// Use the session token issued by the auth provider for later calls.
    pub fn set_access_token(&self, token: Option<String>) {
        *self.access_token.write() = token;
    }

    pub fn endpoint(&self, operation: &Operation) -> String {
        match operation {
            Operation::Rpc { name } => format!("{}/rest/v1/rpc/{}", self.base_url, name),
            Operation::Select { table, .. }
            | Operation::Insert { table }
            | Operation::Update { table, .. }
            | Operation::Delete { table } => format!("{}/rest/v1/{}", self.base_url, table),
        }
    }

    fn bearer(&self) -> String {
        self.access_token
            .read()
            .clone()
            .unwrap_or_else(|| self.api_key.clone())
    }
}

/// Query-string pairs for a request. Params become `eq.` filters on
/// everything but procedure calls, which take them in the body.
pub fn query_pairs(request: &ActionRequest) -> Vec<(String, String)> {
    let filters = |params: &Params| -> Vec<(String, String)> {
        params
            .iter()
            .map(|(k, v)| (k.clone(), format!("eq.{}", v.to_query_value())))
            .collect()
    };

    match &request.operation {
        Operation::Rpc { .. } | Operation::Insert { .. } => Vec::new(),
        Operation::Select { options, .. } => {
            let mut pairs = vec![(
                "select".to_string(),
                options.columns.clone().unwrap_or_else(|| "*".to_string()),
            )];
            pairs.extend(filters(&request.params));
            if let Some(order) = &options.order {
                let dir = match order.direction {
                    Direction::Asc => "asc",
                    Direction::Desc => "desc",
                };
                pairs.push(("order".to_string(), format!("{}.{}", order.column, dir)));
            }
            if let Some(limit) = options.limit {
                pairs.push(("limit".to_string(), limit.to_string()));
            }
            if let Some(offset) = options.offset {
                pairs.push(("offset".to_string(), offset.to_string()));
            }
            pairs
        }
        Operation::Update { .. } | Operation::Delete { .. } => filters(&request.params),
    }
}

fn method_for(operation: &Operation) -> Method {
    match operation {
        Operation::Rpc { .. } | Operation::Insert { .. } => Method::POST,
        Operation::Select { .. } => Method::GET,
        Operation::Update { .. } => Method::PATCH,
        Operation::Delete { .. } => Method::DELETE,
    }
}

fn decode_error(status: StatusCode, body: &str) -> BackendError {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => BackendError {
            message: parsed
                .message
                .or(parsed.error)
                .unwrap_or_else(|| status.to_string()),
            code: parsed.code,
        },
        Err(_) => BackendError::with_code(status.to_string(), status.as_u16().to_string()),
    }
}

#[async_trait]
impl Backend for RestBackend {
    async fn call(&self, request: &ActionRequest) -> Result<Value, BackendError> {
        let url = self.endpoint(&request.operation);
        let method = method_for(&request.operation);
        debug!(operation = %request.operation, %url, "backend call");

        let mut builder = self
            .client
            .request(method, &url)
            .header("apikey", &self.api_key)
            .bearer_auth(self.bearer())
            .query(&query_pairs(request));

        builder = match &request.operation {
            Operation::Rpc { .. } => builder.json(&params_to_json(&request.params)),
            Operation::Insert { .. } => builder
                .header("Prefer", "return=representation")
                .json(&params_to_json(&request.params)),
            Operation::Update { set, .. } => builder
                .header("Prefer", "return=representation")
                .json(&params_to_json(set)),
            Operation::Select { options, .. } if options.single => {
                builder.header(header::ACCEPT, SINGLE_OBJECT)
            }
            Operation::Select { .. } | Operation::Delete { .. } => builder,
        };

        let response = builder
            .send()
            .await
            .map_err(|e| BackendError::with_code(e.to_string(), "network"))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| BackendError::with_code(e.to_string(), "network"))?;

        if !status.is_success() {
            let err = decode_error(status, &body);
            // Single-row reads report zero rows as 406 + PGRST116.
            if status == StatusCode::NOT_ACCEPTABLE && err.code.is_none() {
                return Err(BackendError::not_found(err.message));
            }
            return Err(err);
        }

        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body)
            .map_err(|e| BackendError::with_code(format!("invalid response body: {e}"), "decode"))
    }
}

impl std::fmt::Debug for RestBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestBackend")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}
