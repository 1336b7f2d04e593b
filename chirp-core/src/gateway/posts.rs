//! Posts, comments and search.

use chirp_types::models::{Comment, Post, Profile};
use chirp_types::ActorId;
use serde_json::json;

use super::{first_row, require_actor, require_positive, require_text, rows, ActionResponse, Gateway, TAG};
use crate::backend::{ActionRequest, Operation, Order, Select};

const POST_COLUMNS: &str = "id,content,created_at,author_id,image_url,likes_count,replies_count,reposts_count,profiles(id,username,avatar_url,verified)";
const COMMENT_COLUMNS: &str = "*,profiles:author_id(id,username,avatar_url,is_verified)";

/// Default page size for timelines and search.
pub const DEFAULT_PAGE: u32 = 20;

impl Gateway {
    /// Insert a post authored by `actor`; returns the stored row.
    pub async fn create_post(
        &self,
        actor: &ActorId,
        content: &str,
        image_url: Option<&str>,
    ) -> ActionResponse<Post> {
        if let Err(err) = require_actor(actor) {
            return self.reject("create_post", err);
        }
        let content = match require_text("content", content) {
            Ok(content) => content,
            Err(err) => return self.reject("create_post", err),
        };

        let mut request = ActionRequest::new(Operation::insert("posts"))
            .param("author_id", actor)
            .param("content", content);
        if let Some(url) = image_url {
            request = request.param("image_url", url);
        }

        let response = self.execute(request).await.map(first_row);
        let response: ActionResponse<Post> = self.decode("insert:posts", response);
        if let Some(post) = &response.data {
            self.log.info(TAG, "post created", Some(json!({ "post_id": post.id })));
        }
        response
    }

    pub async fn delete_post(&self, post_id: i64) -> ActionResponse<()> {
        if let Err(err) = require_positive("post id", post_id) {
            return self.reject("delete_post", err);
        }
        let request = ActionRequest::new(Operation::delete("posts")).param("id", post_id);
        self.execute(request).await.map(|_| ())
    }

    /// Newest-first public posts.
    pub async fn public_posts(&self, limit: u32, offset: u32) -> ActionResponse<Vec<Post>> {
        let request = ActionRequest::new(Operation::select(
            "posts",
            Select {
                columns: Some(POST_COLUMNS.into()),
                order: Some(Order::desc("created_at")),
                limit: Some(limit),
                offset: Some(offset),
                single: false,
            },
        ));
        rows(self.fetch(request).await)
    }

    /// The actor's feed (own posts plus followed authors). Falls back to the
    /// public posts when the feed procedure fails.
    pub async fn timeline(
        &self,
        actor: &ActorId,
        limit: u32,
        offset: u32,
    ) -> ActionResponse<Vec<Post>> {
        if let Err(err) = require_actor(actor) {
            return self.reject("timeline", err);
        }
        let request = ActionRequest::new(Operation::rpc("get_timeline_feed"))
            .param("p_user_id", actor)
            .param("p_limit", limit)
            .param("p_offset", offset);

        let response = rows(self.fetch(request).await);
        if response.success {
            return response;
        }
        self.log.warn(
            TAG,
            "timeline procedure failed, falling back to public posts",
            Some(json!({ "actor": actor.as_str() })),
        );
        self.public_posts(limit, offset).await
    }

    /// Newest-first comments of one post.
    pub async fn comments_for_post(&self, post_id: i64) -> ActionResponse<Vec<Comment>> {
        if let Err(err) = require_positive("post id", post_id) {
            return self.reject("comments_for_post", err);
        }
        let request = ActionRequest::new(Operation::select(
            "comments",
            Select {
                columns: Some(COMMENT_COLUMNS.into()),
                order: Some(Order::desc("created_at")),
                ..Select::default()
            },
        ))
        .param("post_id", post_id);
        rows(self.fetch(request).await)
    }

    /// Content is trimmed; blank comments never reach the backend.
    pub async fn add_comment(
        &self,
        actor: &ActorId,
        post_id: i64,
        content: &str,
    ) -> ActionResponse<()> {
        let checked = require_actor(actor)
            .and_then(|_| require_positive("post id", post_id))
            .and_then(|_| require_text("content", content));
        let content = match checked {
            Ok(content) => content,
            Err(err) => return self.reject("add_comment", err),
        };

        let request = ActionRequest::new(Operation::insert("comments"))
            .param("post_id", post_id)
            .param("author_id", actor)
            .param("content", content);
        self.execute(request).await.map(|_| ())
    }

    pub async fn delete_comment(&self, comment_id: i64) -> ActionResponse<()> {
        if let Err(err) = require_positive("comment id", comment_id) {
            return self.reject("delete_comment", err);
        }
        let request = ActionRequest::new(Operation::delete("comments")).param("id", comment_id);
        self.execute(request).await.map(|_| ())
    }

    pub async fn search_users(&self, query: &str, limit: u32) -> ActionResponse<Vec<Profile>> {
        let query = match require_text("search query", query) {
            Ok(query) => query,
            Err(err) => return self.reject("search_users", err),
        };
        let request = ActionRequest::new(Operation::rpc("search_users"))
            .param("search_query", query)
            .param("limit_count", limit);
        rows(self.fetch(request).await)
    }

    pub async fn search_posts(&self, query: &str, limit: u32) -> ActionResponse<Vec<Post>> {
        let query = match require_text("search query", query) {
            Ok(query) => query,
            Err(err) => return self.reject("search_posts", err),
        };
        let request = ActionRequest::new(Operation::rpc("search_posts"))
            .param("search_query", query)
            .param("limit_count", limit);
        rows(self.fetch(request).await)
    }
}
