//! Error types shared by the gateway, controllers and configuration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Code the backend uses when a single-row read matched nothing.
pub const NOT_FOUND_CODE: &str = "PGRST116";

/// An error reported by the backend (or the transport in front of it).
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct BackendError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: Some(code.into()),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::with_code(message, NOT_FOUND_CODE)
    }

    /// Not-found is a normal negative result, not a failure.
    pub fn is_not_found(&self) -> bool {
        self.code.as_deref() == Some(NOT_FOUND_CODE)
    }
}

/// Rejected input at a component boundary. No remote call is made.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing {0}")]
    Missing(&'static str),

    #[error("{field} must be a positive id, got {value}")]
    NonPositive { field: &'static str, value: i64 },

    #[error("{0} must not be blank")]
    Blank(&'static str),
}

impl From<ValidationError> for BackendError {
    fn from(err: ValidationError) -> Self {
        BackendError::with_code(err.to_string(), "validation")
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}
