//! Remote Action Gateway
//!
//! Every operation builds exactly one [`ActionRequest`], hands it to the
//! [`Backend`], and normalizes the outcome into an [`ActionResponse`].
//! Failures never escape as `Err`: they come back in the `error` field.
//! Mutations are not retried here; retry policy belongs to the caller.

mod inbox;
mod moderation;
mod posts;
mod relations;

use std::sync::Arc;

use chirp_types::Severity;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::backend::{ActionRequest, Backend};
use crate::diagnostics::DiagnosticLog;
use crate::error::{BackendError, ValidationError};

pub use moderation::ReportStatus;
pub use posts::DEFAULT_PAGE;
pub use relations::RelationStatus;

const TAG: &str = "GATEWAY";

/// `{ success, data?, error? }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResponse<T = Value> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<BackendError>,
}

impl<T> ActionResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Success without a payload (e.g. not-found reads, deletes).
    pub fn empty() -> Self {
        Self {
            success: true,
            data: None,
            error: None,
        }
    }

    pub fn failed(error: BackendError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ActionResponse<U> {
        ActionResponse {
            success: self.success,
            data: self.data.map(f),
            error: self.error,
        }
    }

    pub fn into_result(self) -> Result<Option<T>, BackendError> {
        match self.error {
            Some(err) if !self.success => Err(err),
            _ => Ok(self.data),
        }
    }
}

/// Typed front door to the backend.
#[derive(Clone)]
pub struct Gateway {
    backend: Arc<dyn Backend>,
    log: Arc<dyn DiagnosticLog>,
}

impl Gateway {
    pub fn new(backend: Arc<dyn Backend>, log: Arc<dyn DiagnosticLog>) -> Self {
        Self { backend, log }
    }

    pub fn log(&self) -> &Arc<dyn DiagnosticLog> {
        &self.log
    }

    /// Run one request. Not-found is a successful empty result.
    pub async fn execute(&self, request: ActionRequest) -> ActionResponse<Value> {
        self.execute_logged(request, Severity::Error).await
    }

    /// Like [`Gateway::execute`], recording a failure at `failure_level`.
    /// Callers that report the failure themselves pass `Severity::Warn` so one
    /// failure yields one error entry.
    async fn execute_logged(
        &self,
        request: ActionRequest,
        failure_level: Severity,
    ) -> ActionResponse<Value> {
        let operation = request.operation.to_string();
        self.log.debug(
            TAG,
            "calling backend",
            Some(json!({ "operation": operation, "params": crate::backend::params_to_json(&request.params) })),
        );

        match self.backend.call(&request).await {
            Ok(data) => ActionResponse::ok(data),
            Err(err) if err.is_not_found() => {
                self.log.debug(TAG, "no matching rows", Some(json!({ "operation": operation })));
                ActionResponse::empty()
            }
            Err(err) => {
                self.log.record(
                    failure_level,
                    TAG,
                    &format!("{operation} failed: {}", err.message),
                    Some(json!({ "operation": operation, "code": err.code })),
                );
                ActionResponse::failed(err)
            }
        }
    }

    /// Run a request and decode its payload.
    pub async fn fetch<T: DeserializeOwned>(&self, request: ActionRequest) -> ActionResponse<T> {
        let operation = request.operation.to_string();
        let response = self.execute(request).await;
        self.decode(&operation, response)
    }

    fn decode<T: DeserializeOwned>(
        &self,
        operation: &str,
        response: ActionResponse<Value>,
    ) -> ActionResponse<T> {
        match response {
            ActionResponse {
                success: true,
                data: Some(value),
                ..
            } if !value.is_null() => match serde_json::from_value::<T>(value) {
                Ok(data) => ActionResponse::ok(data),
                Err(err) => {
                    self.log.error(
                        TAG,
                        &format!("{operation} returned an unexpected shape"),
                        Some(json!({ "operation": operation, "detail": err.to_string() })),
                    );
                    ActionResponse::failed(BackendError::with_code(err.to_string(), "decode"))
                }
            },
            ActionResponse {
                success: true, ..
            } => ActionResponse::empty(),
            ActionResponse { error, .. } => ActionResponse::failed(
                error.unwrap_or_else(|| BackendError::new(format!("{operation} failed"))),
            ),
        }
    }

    /// Reject input before any backend call.
    fn reject<T>(&self, operation: &str, err: ValidationError) -> ActionResponse<T> {
        self.log.warn(
            TAG,
            &format!("{operation} rejected: {err}"),
            Some(json!({ "operation": operation })),
        );
        ActionResponse::failed(err.into())
    }
}

/// Collection reads return arrays; an empty payload is an empty list.
fn rows<T>(response: ActionResponse<Vec<T>>) -> ActionResponse<Vec<T>> {
    if response.success && response.data.is_none() {
        ActionResponse::ok(Vec::new())
    } else {
        response
    }
}

/// Inserts with `return=representation` answer with a one-element array.
fn first_row(value: Value) -> Value {
    match value {
        Value::Array(mut items) if !items.is_empty() => items.swap_remove(0),
        Value::Array(_) => Value::Null,
        other => other,
    }
}

fn require_text(field: &'static str, value: &str) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Blank(field));
    }
    Ok(trimmed.to_string())
}

fn require_positive(field: &'static str, value: i64) -> Result<i64, ValidationError> {
    if value <= 0 {
        return Err(ValidationError::NonPositive { field, value });
    }
    Ok(value)
}

fn require_actor(actor: &chirp_types::ActorId) -> Result<(), ValidationError> {
    if actor.is_empty() {
        return Err(ValidationError::Missing("actor id"));
    }
    Ok(())
}
