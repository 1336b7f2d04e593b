//! Row shapes returned by the backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CollectionItem, EntityId};

/// Author summary embedded in post and comment rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default, alias = "is_verified")]
    pub verified: bool,
    #[serde(default)]
    pub followers_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    pub author_id: String,
    pub content: String,
    #[serde(default)]
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub likes_count: u32,
    #[serde(default)]
    pub replies_count: u32,
    #[serde(default, alias = "retweets_count")]
    pub reposts_count: u32,
    #[serde(default)]
    pub liked_by_user: bool,
    /// Joined author profile (`profiles` in table reads).
    #[serde(default, alias = "profiles", skip_serializing_if = "Option::is_none")]
    pub author: Option<Profile>,
}

impl CollectionItem for Post {
    fn item_id(&self) -> EntityId {
        EntityId::Int(self.id)
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    pub post_id: i64,
    pub author_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, alias = "profiles", skip_serializing_if = "Option::is_none")]
    pub author: Option<Profile>,
}

impl CollectionItem for Comment {
    fn item_id(&self) -> EntityId {
        EntityId::Int(self.id)
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub user_id: String,
    #[serde(default)]
    pub actor_id: Option<String>,
    #[serde(default)]
    pub post_id: Option<i64>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl CollectionItem for Notification {
    fn item_id(&self) -> EntityId {
        EntityId::Int(self.id)
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub conversation_id: String,
    pub sender_id: String,
    #[serde(default)]
    pub recipient_id: Option<String>,
    pub content: String,
    #[serde(default)]
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl CollectionItem for Message {
    fn item_id(&self) -> EntityId {
        EntityId::Int(self.id)
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// A moderation report filed against a post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: i64,
    pub reporter_id: String,
    #[serde(default)]
    pub post_id: Option<i64>,
    pub reason: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl CollectionItem for Report {
    fn item_id(&self) -> EntityId {
        EntityId::Int(self.id)
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_post_row_with_joined_profile() {
        let post: Post = serde_json::from_value(json!({
            "id": 42,
            "author_id": "u1",
            "content": "hello",
            "created_at": "2024-05-01T10:00:00Z",
            "likes_count": 3,
            "profiles": {"id": "u1", "username": "ana", "is_verified": true}
        }))
        .unwrap();

        assert_eq!(post.item_id(), EntityId::Int(42));
        assert_eq!(post.likes_count, 3);
        assert_eq!(post.replies_count, 0);
        let author = post.author.unwrap();
        assert!(author.verified);
        assert_eq!(author.username, "ana");
    }

    #[test]
    fn test_notification_type_column() {
        let n: Notification = serde_json::from_value(json!({
            "id": 1,
            "user_id": "u1",
            "type": "like",
            "created_at": "2024-05-01T10:00:00Z"
        }))
        .unwrap();

        assert_eq!(n.kind, "like");
        assert!(!n.read);
    }
}
