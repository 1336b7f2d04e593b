//! Live collections bound to a change-feed scope.
//!
//! A subscription opens its feed stream, seeds the collection with one full
//! fetch, then reconciles on every in-scope event. The default policy
//! re-fetches (bursts coalesced by a debounce window); the merge policy
//! applies row images directly. Cancellation is synchronous: once
//! [`LiveSubscription::unsubscribe`] returns nothing touches the collection.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chirp_types::models::{Comment, Message, Notification, Post};
use chirp_types::{ActorId, ChangeEvent, ChangeOp, CollectionItem};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::collection::{LiveCollection, SortOrder};
use crate::diagnostics::DiagnosticLog;
use crate::error::BackendError;
use crate::feed::{ChangeFeed, ChangeStream, FeedEvent, FeedScope, RowFilter};
use crate::gateway::{ActionResponse, Gateway};

const TAG: &str = "LIVE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconcilePolicy {
    /// Re-fetch everything on change
    #[default]
    Refetch,
    /// Upsert/remove the changed row in place
    Merge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveOptions {
    pub policy: ReconcilePolicy,
    /// Window after the first event of a burst during which further events
    /// are folded into the same re-fetch. Zero disables coalescing.
    pub debounce: Duration,
}

impl Default for LiveOptions {
    fn default() -> Self {
        Self {
            policy: ReconcilePolicy::Refetch,
            debounce: Duration::from_millis(150),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LiveStatus {
    Loading,
    Ready,
    /// The seeding fetch failed; the collection is empty.
    Failed(BackendError),
}

/// Result of a manual [`LiveSubscription::refresh`].
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    /// The collection was replaced with this many items
    Applied(usize),
    /// The fetch failed; previous items were kept
    Failed(BackendError),
    /// The subscription was cancelled; the result was dropped
    Discarded,
}

/// Full read of the rows behind a scope.
#[async_trait]
pub trait CollectionSource<T>: Send + Sync {
    async fn fetch_all(&self) -> Result<Vec<T>, BackendError>;
}

#[async_trait]
impl<T, F, Fut> CollectionSource<T> for F
where
    T: Send + 'static,
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = ActionResponse<Vec<T>>> + Send + 'static,
{
    async fn fetch_all(&self) -> Result<Vec<T>, BackendError> {
        Ok((self)().await.into_result()?.unwrap_or_default())
    }
}

struct State<T> {
    collection: LiveCollection<T>,
    status: LiveStatus,
    cancelled: bool,
}

struct Reconciler<T> {
    scope: FeedScope,
    source: Arc<dyn CollectionSource<T>>,
    log: Arc<dyn DiagnosticLog>,
    state: Mutex<State<T>>,
    /// Serializes fetch+apply so results land in the order fetches started.
    fetch_gate: tokio::sync::Mutex<()>,
    version: watch::Sender<u64>,
}

impl<T> Reconciler<T>
where
    T: CollectionItem + DeserializeOwned,
{
    /// Run `f` on the state unless cancelled, then bump the version.
    fn apply<R>(&self, f: impl FnOnce(&mut State<T>) -> R) -> Option<R> {
        let mut state = self.state.lock();
        if state.cancelled {
            return None;
        }
        let result = f(&mut state);
        self.version.send_modify(|v| *v += 1);
        Some(result)
    }

    async fn seed(&self) {
        let _gate = self.fetch_gate.lock().await;
        match self.source.fetch_all().await {
            Ok(items) => {
                let applied = self.apply(|state| {
                    state.collection.replace_all(items);
                    state.status = LiveStatus::Ready;
                    state.collection.len()
                });
                if let Some(count) = applied {
                    self.log.debug(
                        TAG,
                        "collection seeded",
                        Some(json!({ "scope": self.scope.to_string(), "count": count })),
                    );
                }
            }
            Err(err) => {
                let applied = self.apply(|state| {
                    state.collection.clear();
                    state.status = LiveStatus::Failed(err.clone());
                });
                if applied.is_some() {
                    self.log.error(
                        TAG,
                        &format!("initial fetch failed: {}", err.message),
                        Some(json!({ "scope": self.scope.to_string(), "code": err.code })),
                    );
                }
            }
        }
    }

    async fn refetch(&self) -> RefreshOutcome {
        if self.state.lock().cancelled {
            return RefreshOutcome::Discarded;
        }
        let _gate = self.fetch_gate.lock().await;
        match self.source.fetch_all().await {
            Ok(items) => {
                let applied = self.apply(|state| {
                    state.collection.replace_all(items);
                    state.status = LiveStatus::Ready;
                    state.collection.len()
                });
                match applied {
                    Some(count) => RefreshOutcome::Applied(count),
                    None => RefreshOutcome::Discarded,
                }
            }
            Err(err) => {
                if self.state.lock().cancelled {
                    return RefreshOutcome::Discarded;
                }
                self.log.error(
                    TAG,
                    &format!("refetch failed, keeping previous items: {}", err.message),
                    Some(json!({ "scope": self.scope.to_string(), "code": err.code })),
                );
                RefreshOutcome::Failed(err)
            }
        }
    }

    /// Apply one event in place. Returns `false` when only a full fetch can
    /// reconcile it.
    fn merge(&self, event: &ChangeEvent) -> bool {
        let in_scope = |row: &serde_json::Value| {
            self.scope
                .filter
                .as_ref()
                .map(|filter: &RowFilter| filter.matches(row))
                .unwrap_or(true)
        };

        match event.op {
            ChangeOp::Insert | ChangeOp::Update => {
                let Some(row) = event.new.as_ref() else {
                    return false;
                };
                if !in_scope(row) {
                    let Some(id) = event.row_id() else {
                        return false;
                    };
                    self.apply(|state| state.collection.remove(&id));
                    return true;
                }
                match serde_json::from_value::<T>(row.clone()) {
                    Ok(item) => {
                        self.apply(|state| state.collection.upsert(item));
                        true
                    }
                    Err(err) => {
                        self.log.warn(
                            TAG,
                            "change row did not decode, falling back to refetch",
                            Some(json!({ "scope": self.scope.to_string(), "detail": err.to_string() })),
                        );
                        false
                    }
                }
            }
            ChangeOp::Delete => {
                let Some(id) = event.row_id() else {
                    return false;
                };
                self.apply(|state| state.collection.remove(&id));
                true
            }
        }
    }

    async fn run(self: Arc<Self>, mut stream: ChangeStream, options: LiveOptions) {
        self.seed().await;

        while let Some(event) = stream.next().await {
            let needs_fetch = match (&event, options.policy) {
                (FeedEvent::Change(change), ReconcilePolicy::Merge) => !self.merge(change),
                (FeedEvent::Lagged(skipped), _) => {
                    self.log.warn(
                        TAG,
                        "change feed lagged, refetching",
                        Some(json!({ "scope": self.scope.to_string(), "skipped": skipped })),
                    );
                    true
                }
                (FeedEvent::Change(_), ReconcilePolicy::Refetch) => true,
            };
            if !needs_fetch {
                continue;
            }

            if !options.debounce.is_zero() {
                let deadline = Instant::now() + options.debounce;
                loop {
                    match tokio::time::timeout_at(deadline, stream.next()).await {
                        Ok(Some(_)) => continue,
                        Ok(None) | Err(_) => break,
                    }
                }
            }
            self.refetch().await;
        }
    }
}

/// Handle to a live collection. Dropping it unsubscribes.
pub struct LiveSubscription<T> {
    core: Arc<Reconciler<T>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<T> LiveSubscription<T>
where
    T: CollectionItem + DeserializeOwned,
{
    /// Subscribe to `scope` on `feed`, seeding from `source`. Must be called
    /// from within a tokio runtime.
    pub fn subscribe(
        feed: &dyn ChangeFeed,
        scope: FeedScope,
        source: impl CollectionSource<T> + 'static,
        order: SortOrder<T>,
        options: LiveOptions,
        log: Arc<dyn DiagnosticLog>,
    ) -> Self {
        // Open the stream before the seeding fetch so no change is missed.
        let stream = feed.subscribe(&scope);
        let (version, _) = watch::channel(0);
        let core = Arc::new(Reconciler {
            scope,
            source: Arc::new(source),
            log,
            state: Mutex::new(State {
                collection: LiveCollection::new(order),
                status: LiveStatus::Loading,
                cancelled: false,
            }),
            fetch_gate: tokio::sync::Mutex::new(()),
            version,
        });
        core.log.debug(
            TAG,
            "subscribed",
            Some(json!({ "scope": core.scope.to_string(), "policy": options.policy })),
        );
        let task = tokio::spawn(Arc::clone(&core).run(stream, options));
        Self {
            core,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn scope(&self) -> &FeedScope {
        &self.core.scope
    }

    pub fn snapshot(&self) -> Vec<T> {
        self.core.state.lock().collection.items().to_vec()
    }

    pub fn status(&self) -> LiveStatus {
        self.core.state.lock().status.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.core.state.lock().cancelled
    }

    /// Version counter, bumped on every applied mutation.
    pub fn watch(&self) -> watch::Receiver<u64> {
        self.core.version.subscribe()
    }

    /// Wait for the seeding fetch to finish.
    pub async fn ready(&self) -> LiveStatus {
        let mut rx = self.watch();
        loop {
            let status = self.status();
            if status != LiveStatus::Loading || self.is_cancelled() {
                return status;
            }
            if rx.changed().await.is_err() {
                return self.status();
            }
        }
    }

    /// Manual full re-fetch.
    pub async fn refresh(&self) -> RefreshOutcome {
        self.core.refetch().await
    }

    /// Detach from the feed. Idempotent.
    pub fn unsubscribe(&self) {
        let first = {
            let mut state = self.core.state.lock();
            !std::mem::replace(&mut state.cancelled, true)
        };
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        if first {
            self.core.log.debug(
                TAG,
                "unsubscribed",
                Some(json!({ "scope": self.core.scope.to_string() })),
            );
        }
    }
}

impl<T> Drop for LiveSubscription<T> {
    fn drop(&mut self) {
        self.core.state.lock().cancelled = true;
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

impl<T> std::fmt::Debug for LiveSubscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveSubscription")
            .field("scope", &self.core.scope)
            .finish_non_exhaustive()
    }
}

impl LiveSubscription<Comment> {
    /// Comments of one post, newest first.
    pub fn comments(
        gateway: &Gateway,
        feed: &dyn ChangeFeed,
        post_id: i64,
        options: LiveOptions,
    ) -> Self {
        let source = {
            let gateway = gateway.clone();
            move || {
                let gateway = gateway.clone();
                async move { gateway.comments_for_post(post_id).await }
            }
        };
        Self::subscribe(
            feed,
            FeedScope::table("comments").filtered(RowFilter::eq("post_id", post_id)),
            source,
            SortOrder::NewestFirst,
            options,
            Arc::clone(gateway.log()),
        )
    }
}

impl LiveSubscription<Notification> {
    pub fn notifications(
        gateway: &Gateway,
        feed: &dyn ChangeFeed,
        actor: ActorId,
        limit: u32,
        options: LiveOptions,
    ) -> Self {
        let scope = FeedScope::table("notifications").filtered(RowFilter::eq("user_id", &actor));
        let source = {
            let gateway = gateway.clone();
            move || {
                let gateway = gateway.clone();
                let actor = actor.clone();
                async move { gateway.notifications_for(&actor, limit, 0).await }
            }
        };
        Self::subscribe(
            feed,
            scope,
            source,
            SortOrder::NewestFirst,
            options,
            Arc::clone(gateway.log()),
        )
    }
}

impl LiveSubscription<Post> {
    /// The actor's timeline; any change to `posts` triggers reconciliation.
    pub fn timeline(
        gateway: &Gateway,
        feed: &dyn ChangeFeed,
        actor: ActorId,
        limit: u32,
        options: LiveOptions,
    ) -> Self {
        let source = {
            let gateway = gateway.clone();
            move || {
                let gateway = gateway.clone();
                let actor = actor.clone();
                async move { gateway.timeline(&actor, limit, 0).await }
            }
        };
        Self::subscribe(
            feed,
            FeedScope::table("posts"),
            source,
            SortOrder::NewestFirst,
            options,
            Arc::clone(gateway.log()),
        )
    }
}

impl LiveSubscription<Message> {
    /// Messages of one conversation, oldest first.
    pub fn conversation(
        gateway: &Gateway,
        feed: &dyn ChangeFeed,
        conversation_id: &str,
        options: LiveOptions,
    ) -> Self {
        let scope = FeedScope::table("messages")
            .filtered(RowFilter::eq("conversation_id", conversation_id));
        let conversation_id = conversation_id.to_string();
        let source = {
            let gateway = gateway.clone();
            move || {
                let gateway = gateway.clone();
                let conversation_id = conversation_id.clone();
                async move { gateway.conversation_messages(&conversation_id).await }
            }
        };
        Self::subscribe(
            feed,
            scope,
            source,
            SortOrder::OldestFirst,
            options,
            Arc::clone(gateway.log()),
        )
    }
}
