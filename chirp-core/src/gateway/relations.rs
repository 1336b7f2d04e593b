//! Toggleable relations: like, retweet, follow, bookmark.

use chirp_types::{ActorId, EntityId, RelationKind, Severity};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{require_actor, ActionResponse, Gateway};
use crate::backend::{ActionRequest, Operation, Select};
use crate::error::ValidationError;

/// Server view of one relation edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationStatus {
    pub value: bool,
    /// Aggregate counter when the server reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
}

impl RelationStatus {
    pub fn new(value: bool, count: Option<u32>) -> Self {
        Self { value, count }
    }
}

/// Tables holding one row per (actor, post) edge.
fn edge_table(kind: RelationKind) -> &'static str {
    match kind {
        RelationKind::Like => "likes",
        RelationKind::Retweet => "retweets",
        RelationKind::Bookmark => "bookmarks",
        RelationKind::Follow => "follows",
    }
}

/// Procedures that flip an edge and report `(flag, count)`.
fn toggle_procedure(kind: RelationKind) -> Option<(&'static str, &'static str, &'static str)> {
    match kind {
        RelationKind::Like => Some(("toggle_like", "liked", "likes_count")),
        RelationKind::Retweet => Some(("toggle_retweet", "retweeted", "retweets_count")),
        RelationKind::Follow | RelationKind::Bookmark => None,
    }
}

/// Procedures answer with a one-row table or a bare object.
fn parse_toggle_row(value: &Value, flag: &str, count: &str) -> Option<RelationStatus> {
    let row = match value {
        Value::Array(items) => items.first()?,
        other => other,
    };
    let value = row.get(flag)?.as_bool()?;
    let count = row
        .get(count)
        .and_then(Value::as_u64)
        .map(|n| n.min(u32::MAX as u64) as u32);
    Some(RelationStatus { value, count })
}

impl Gateway {
    fn validate_edge(
        actor: &ActorId,
        target: &EntityId,
    ) -> Result<(), ValidationError> {
        require_actor(actor)?;
        match target {
            EntityId::Int(n) if *n <= 0 => Err(ValidationError::NonPositive {
                field: "target id",
                value: *n,
            }),
            EntityId::Str(s) if s.trim().is_empty() => Err(ValidationError::Missing("target id")),
            _ => Ok(()),
        }
    }

    /// Idempotent read of the current edge state. Safe to retry.
    pub async fn relation_status(
        &self,
        kind: RelationKind,
        actor: &ActorId,
        target: &EntityId,
    ) -> ActionResponse<RelationStatus> {
        let operation = format!("{kind}_status");
        if let Err(err) = Self::validate_edge(actor, target) {
            return self.reject(&operation, err);
        }

        let request = match kind {
            RelationKind::Follow => ActionRequest::new(Operation::rpc("is_following"))
                .param("p_follower_id", actor)
                .param("p_following_id", target),
            RelationKind::Like | RelationKind::Retweet | RelationKind::Bookmark => {
                ActionRequest::new(Operation::select(
                    edge_table(kind),
                    Select {
                        columns: Some("id".into()),
                        single: true,
                        ..Select::default()
                    },
                ))
                .param("post_id", target)
                .param("user_id", actor)
            }
        };

        let response = self.execute(request).await;
        if !response.success {
            return ActionResponse {
                success: false,
                data: None,
                error: response.error,
            };
        }
        let present = match (kind, response.data) {
            (RelationKind::Follow, Some(value)) => value.as_bool().unwrap_or(false),
            (_, Some(value)) => !value.is_null(),
            (_, None) => false,
        };
        ActionResponse::ok(RelationStatus::new(present, None))
    }

    /// Move the edge to `desired`. Exactly one backend call, never retried.
    ///
    /// Like and retweet go through server procedures that flip the edge and
    /// return the authoritative flag and counter. Follow and bookmark insert
    /// or delete the edge row and report no counter.
    pub async fn set_relation(
        &self,
        kind: RelationKind,
        actor: &ActorId,
        target: &EntityId,
        desired: bool,
    ) -> ActionResponse<RelationStatus> {
        self.set_relation_logged(kind, actor, target, desired, Severity::Error)
            .await
    }

    /// [`Gateway::set_relation`] with the backend failure recorded at
    /// `failure_level`.
    pub(crate) async fn set_relation_logged(
        &self,
        kind: RelationKind,
        actor: &ActorId,
        target: &EntityId,
        desired: bool,
        failure_level: Severity,
    ) -> ActionResponse<RelationStatus> {
        let operation = format!("set_{kind}");
        if let Err(err) = Self::validate_edge(actor, target) {
            return self.reject(&operation, err);
        }

        if let Some((procedure, flag, count)) = toggle_procedure(kind) {
            let request =
                ActionRequest::new(Operation::rpc(procedure)).param("p_post_id", target);
            let response = self.execute_logged(request, failure_level).await;
            if !response.success {
                return ActionResponse::failed(response.error.unwrap_or_else(|| {
                    crate::error::BackendError::new(format!("{procedure} failed"))
                }));
            }
            let status = response
                .data
                .as_ref()
                .and_then(|data| parse_toggle_row(data, flag, count))
                .unwrap_or_else(|| RelationStatus::new(desired, None));
            return ActionResponse::ok(status);
        }

        let (actor_col, target_col) = match kind {
            RelationKind::Follow => ("follower_id", "following_id"),
            _ => ("user_id", "post_id"),
        };
        let table = edge_table(kind);
        let op = if desired {
            Operation::insert(table)
        } else {
            Operation::delete(table)
        };
        let request = ActionRequest::new(op)
            .param(actor_col, actor)
            .param(target_col, target);

        let response = self.execute_logged(request, failure_level).await;
        if response.success {
            ActionResponse::ok(RelationStatus::new(desired, None))
        } else {
            ActionResponse {
                success: false,
                data: None,
                error: response.error,
            }
        }
    }
}
