//! Request shapes and the backend seam.
//!
//! An [`ActionRequest`] names exactly one operation against the external
//! store. The [`Backend`] trait executes it; the gateway never talks to the
//! network directly.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use chirp_types::{ActorId, EntityId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BackendError;

/// Scalar parameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Scalar {
    pub fn to_json(&self) -> Value {
        match self {
            Scalar::Null => Value::Null,
            Scalar::Bool(b) => Value::Bool(*b),
            Scalar::Int(n) => Value::from(*n),
            Scalar::Float(f) => Value::from(*f),
            Scalar::Str(s) => Value::from(s.as_str()),
        }
    }

    /// Rendering used in query strings and log lines.
    pub fn to_query_value(&self) -> String {
        match self {
            Scalar::Null => "null".to_string(),
            Scalar::Bool(b) => b.to_string(),
            Scalar::Int(n) => n.to_string(),
            Scalar::Float(f) => f.to_string(),
            Scalar::Str(s) => s.clone(),
        }
    }
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Scalar::Bool(v)
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Int(v)
    }
}

impl From<u32> for Scalar {
    fn from(v: u32) -> Self {
        Scalar::Int(v as i64)
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Float(v)
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Scalar::Str(v.to_string())
    }
}

impl From<String> for Scalar {
    fn from(v: String) -> Self {
        Scalar::Str(v)
    }
}

impl From<&ActorId> for Scalar {
    fn from(v: &ActorId) -> Self {
        Scalar::Str(v.0.clone())
    }
}

impl From<&EntityId> for Scalar {
    fn from(v: &EntityId) -> Self {
        match v {
            EntityId::Int(n) => Scalar::Int(*n),
            EntityId::Str(s) => Scalar::Str(s.clone()),
        }
    }
}

/// Named scalar parameters, ordered for stable logs and URLs.
pub type Params = BTreeMap<String, Scalar>;

pub fn params_to_json(params: &Params) -> Value {
    Value::Object(
        params
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect(),
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub column: String,
    pub direction: Direction,
}

impl Order {
    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: Direction::Desc,
        }
    }

    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: Direction::Asc,
        }
    }
}

/// Options of a table read. Params of the request act as equality filters.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Select {
    /// Column list, `*` when absent
    pub columns: Option<String>,
    pub order: Option<Order>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    /// Expect exactly one row. Zero rows is reported as not-found.
    pub single: bool,
}

/// The single remote operation a request performs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Operation {
    /// Call a server-side procedure with the params as named arguments
    Rpc { name: String },
    /// Read rows, params are equality filters
    Select { table: String, options: Select },
    /// Insert one row built from the params
    Insert { table: String },
    /// Apply `set` to rows matching the params
    Update { table: String, set: Params },
    /// Delete rows matching the params
    Delete { table: String },
}

impl Operation {
    pub fn rpc(name: impl Into<String>) -> Self {
        Operation::Rpc { name: name.into() }
    }

    pub fn select(table: impl Into<String>, options: Select) -> Self {
        Operation::Select {
            table: table.into(),
            options,
        }
    }

    pub fn insert(table: impl Into<String>) -> Self {
        Operation::Insert {
            table: table.into(),
        }
    }

    pub fn update(table: impl Into<String>, set: Params) -> Self {
        Operation::Update {
            table: table.into(),
            set,
        }
    }

    pub fn delete(table: impl Into<String>) -> Self {
        Operation::Delete {
            table: table.into(),
        }
    }

    /// Whether the operation changes server state.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Operation::Select { .. })
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Rpc { name } => write!(f, "rpc:{name}"),
            Operation::Select { table, .. } => write!(f, "select:{table}"),
            Operation::Insert { table } => write!(f, "insert:{table}"),
            Operation::Update { table, .. } => write!(f, "update:{table}"),
            Operation::Delete { table } => write!(f, "delete:{table}"),
        }
    }
}

/// `{ operation, params }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub operation: Operation,
    #[serde(default)]
    pub params: Params,
}

impl ActionRequest {
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            params: Params::new(),
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Scalar> {
        self.params.get(key)
    }
}

/// Executes requests against the external store.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn call(&self, request: &ActionRequest) -> Result<Value, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_operation_names() {
        assert_eq!(Operation::rpc("toggle_like").to_string(), "rpc:toggle_like");
        assert_eq!(
            Operation::select("likes", Select::default()).to_string(),
            "select:likes"
        );
        assert!(Operation::delete("follows").is_mutation());
        assert!(!Operation::select("posts", Select::default()).is_mutation());
    }

    #[test]
    fn test_params_to_json() {
        let request = ActionRequest::new(Operation::rpc("toggle_like"))
            .param("p_post_id", 42i64)
            .param("p_flag", true);

        assert_eq!(
            params_to_json(&request.params),
            json!({"p_flag": true, "p_post_id": 42})
        );
    }

    #[test]
    fn test_entity_id_scalar() {
        assert_eq!(Scalar::from(&EntityId::Int(5)), Scalar::Int(5));
        assert_eq!(Scalar::from(&EntityId::from("u2")), Scalar::Str("u2".into()));
    }
}
