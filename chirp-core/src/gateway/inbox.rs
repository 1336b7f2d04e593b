//! Notifications and direct messages.

use chirp_types::models::{Message, Notification};
use chirp_types::ActorId;
use serde_json::Value;

use super::{first_row, require_actor, require_positive, require_text, rows, ActionResponse, Gateway};
use crate::backend::{ActionRequest, Operation, Order, Params, Select};

impl Gateway {
    /// Newest-first notifications addressed to `actor`.
    pub async fn notifications_for(
        &self,
        actor: &ActorId,
        limit: u32,
        offset: u32,
    ) -> ActionResponse<Vec<Notification>> {
        if let Err(err) = require_actor(actor) {
            return self.reject("notifications_for", err);
        }
        let request = ActionRequest::new(Operation::select(
            "notifications",
            Select {
                order: Some(Order::desc("created_at")),
                limit: Some(limit),
                offset: Some(offset),
                ..Select::default()
            },
        ))
        .param("user_id", actor);
        rows(self.fetch(request).await)
    }

    /// Unread counter; a missing value counts as zero.
    pub async fn unread_count(&self, actor: &ActorId) -> ActionResponse<u32> {
        if let Err(err) = require_actor(actor) {
            return self.reject("unread_count", err);
        }
        let request = ActionRequest::new(Operation::rpc("get_unread_notifications_count"))
            .param("p_user_id", actor);
        let response = self.execute(request).await;
        if !response.success {
            return ActionResponse {
                success: false,
                data: None,
                error: response.error,
            };
        }
        let count = response
            .data
            .as_ref()
            .and_then(Value::as_u64)
            .map(|n| n.min(u32::MAX as u64) as u32)
            .unwrap_or(0);
        ActionResponse::ok(count)
    }

    pub async fn mark_notification_read(&self, notification_id: i64) -> ActionResponse<()> {
        if let Err(err) = require_positive("notification id", notification_id) {
            return self.reject("mark_notification_read", err);
        }
        let mut set = Params::new();
        set.insert("read".into(), true.into());
        let request = ActionRequest::new(Operation::update("notifications", set))
            .param("id", notification_id);
        self.execute(request).await.map(|_| ())
    }

    pub async fn mark_all_notifications_read(&self, actor: &ActorId) -> ActionResponse<()> {
        if let Err(err) = require_actor(actor) {
            return self.reject("mark_all_notifications_read", err);
        }
        let request =
            ActionRequest::new(Operation::rpc("mark_notifications_as_read")).param("p_user_id", actor);
        self.execute(request).await.map(|_| ())
    }

    /// Messages of one conversation, oldest first.
    pub async fn conversation_messages(&self, conversation_id: &str) -> ActionResponse<Vec<Message>> {
        let conversation_id = match require_text("conversation id", conversation_id) {
            Ok(id) => id,
            Err(err) => return self.reject("conversation_messages", err),
        };
        let request = ActionRequest::new(Operation::select(
            "messages",
            Select {
                order: Some(Order::asc("created_at")),
                ..Select::default()
            },
        ))
        .param("conversation_id", conversation_id);
        rows(self.fetch(request).await)
    }

    pub async fn send_message(
        &self,
        sender: &ActorId,
        conversation_id: &str,
        content: &str,
    ) -> ActionResponse<Message> {
        let checked = require_actor(sender)
            .and_then(|_| require_text("conversation id", conversation_id))
            .and_then(|id| require_text("content", content).map(|content| (id, content)));
        let (conversation_id, content) = match checked {
            Ok(fields) => fields,
            Err(err) => return self.reject("send_message", err),
        };

        let request = ActionRequest::new(Operation::insert("messages"))
            .param("conversation_id", conversation_id)
            .param("sender_id", sender)
            .param("content", content);
        let response = self.execute(request).await.map(first_row);
        self.decode("insert:messages", response)
    }
}
