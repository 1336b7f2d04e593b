//! Shared types for chirp
//!
//! This crate provides common types used across the chirp workspace,
//! including entity identifiers, relation kinds, and realtime change events.

pub mod models;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use models::{Comment, Message, Notification, Post, Profile, Report};

/// Opaque identifier of an authenticated principal, issued by the auth provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(pub String);

impl ActorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActorId {
    fn from(id: &str) -> Self {
        ActorId(id.to_string())
    }
}

/// The authenticated principal. Owned by the auth provider; read-only here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: ActorId,
    pub display_name: String,
}

impl Actor {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: ActorId::new(id),
            display_name: display_name.into(),
        }
    }
}

/// Identifier of a stored entity.
///
/// Posts, comments and notifications use positive integer keys while users
/// and conversations use opaque string keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityId {
    Int(i64),
    Str(String),
}

impl EntityId {
    /// Positive integers and non-blank strings are valid.
    pub fn is_valid(&self) -> bool {
        match self {
            EntityId::Int(n) => *n > 0,
            EntityId::Str(s) => !s.trim().is_empty(),
        }
    }

    /// Read an id out of a JSON value (number or string).
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(EntityId::Int),
            Value::String(s) => Some(EntityId::Str(s.clone())),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            EntityId::Int(n) => Value::from(*n),
            EntityId::Str(s) => Value::from(s.as_str()),
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Int(n) => write!(f, "{n}"),
            EntityId::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for EntityId {
    fn from(id: i64) -> Self {
        EntityId::Int(id)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        EntityId::Str(id.to_string())
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        EntityId::Str(id)
    }
}

impl From<&ActorId> for EntityId {
    fn from(id: &ActorId) -> Self {
        EntityId::Str(id.0.clone())
    }
}

/// Boolean edge kinds between an actor and a target entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    Like,
    Retweet,
    Follow,
    Bookmark,
}

impl RelationKind {
    pub fn all() -> [RelationKind; 4] {
        [
            RelationKind::Like,
            RelationKind::Retweet,
            RelationKind::Follow,
            RelationKind::Bookmark,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RelationKind::Like => "like",
            RelationKind::Retweet => "retweet",
            RelationKind::Follow => "follow",
            RelationKind::Bookmark => "bookmark",
        }
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownRelationKind(pub String);

impl fmt::Display for UnknownRelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown relation kind: {:?}", self.0)
    }
}

impl std::error::Error for UnknownRelationKind {}

impl FromStr for RelationKind {
    type Err = UnknownRelationKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "like" => Ok(RelationKind::Like),
            "retweet" | "repost" => Ok(RelationKind::Retweet),
            "follow" => Ok(RelationKind::Follow),
            "bookmark" => Ok(RelationKind::Bookmark),
            _ => Err(UnknownRelationKind(s.to_string())),
        }
    }
}

/// Operation tag of a realtime change event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    #[serde(alias = "INSERT")]
    Insert,
    #[serde(alias = "UPDATE")]
    Update,
    #[serde(alias = "DELETE")]
    Delete,
}

/// A row-level change emitted by the realtime collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub op: ChangeOp,
    pub table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<Value>,
}

impl ChangeEvent {
    pub fn insert(table: impl Into<String>, row: Value) -> Self {
        Self {
            op: ChangeOp::Insert,
            table: table.into(),
            new: Some(row),
            old: None,
        }
    }

    pub fn update(table: impl Into<String>, new: Value, old: Option<Value>) -> Self {
        Self {
            op: ChangeOp::Update,
            table: table.into(),
            new: Some(new),
            old,
        }
    }

    pub fn delete(table: impl Into<String>, old: Value) -> Self {
        Self {
            op: ChangeOp::Delete,
            table: table.into(),
            new: None,
            old: Some(old),
        }
    }

    /// The most relevant row: the new image, or the old one for deletes.
    pub fn row(&self) -> Option<&Value> {
        self.new.as_ref().or(self.old.as_ref())
    }

    /// Id of the changed row, if it carries an `id` column.
    pub fn row_id(&self) -> Option<EntityId> {
        self.row()
            .and_then(|row| row.get("id"))
            .and_then(EntityId::from_json)
    }
}

/// Diagnostic severity level, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
        }
    }

    /// Error and critical entries are reported to error subscribers.
    pub fn is_failure(&self) -> bool {
        *self >= Severity::Error
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(Severity::Debug),
            "INFO" => Ok(Severity::Info),
            "WARN" | "WARNING" => Ok(Severity::Warn),
            "ERROR" => Ok(Severity::Error),
            "CRITICAL" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

/// Rows that can live in an ordered, id-keyed live collection.
pub trait CollectionItem: Clone + Send + Sync + 'static {
    fn item_id(&self) -> EntityId;

    fn created_at(&self) -> DateTime<Utc>;
}
