//! Change-feed seam.
//!
//! A realtime transport publishes row-level [`ChangeEvent`]s into a
//! [`ChangeFeed`]; live collections subscribe to a [`FeedScope`] and receive
//! the events touching it. [`LocalChangeFeed`] is the in-process hub.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chirp_types::ChangeEvent;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Buffered events per table before slow subscribers start lagging.
pub const DEFAULT_FEED_CAPACITY: usize = 256;

/// Equality filter on one column, written `column=eq.value`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RowFilter {
    pub column: String,
    pub value: String,
}

impl RowFilter {
    pub fn eq(column: impl Into<String>, value: impl fmt::Display) -> Self {
        Self {
            column: column.into(),
            value: value.to_string(),
        }
    }

    pub fn matches(&self, row: &Value) -> bool {
        match row.get(&self.column) {
            Some(Value::String(s)) => *s == self.value,
            Some(Value::Number(n)) => n.to_string() == self.value,
            Some(Value::Bool(b)) => b.to_string() == self.value,
            Some(Value::Null) => self.value == "null",
            _ => false,
        }
    }
}

impl fmt::Display for RowFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=eq.{}", self.column, self.value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidRowFilter(pub String);

impl fmt::Display for InvalidRowFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid row filter {:?}, expected column=eq.value", self.0)
    }
}

impl std::error::Error for InvalidRowFilter {}

impl FromStr for RowFilter {
    type Err = InvalidRowFilter;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (column, rest) = s
            .split_once('=')
            .ok_or_else(|| InvalidRowFilter(s.to_string()))?;
        let value = rest
            .strip_prefix("eq.")
            .ok_or_else(|| InvalidRowFilter(s.to_string()))?;
        let column = column.trim();
        if column.is_empty() {
            return Err(InvalidRowFilter(s.to_string()));
        }
        Ok(RowFilter::eq(column, value))
    }
}

/// `(table, optional row filter)`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FeedScope {
    pub table: String,
    pub filter: Option<RowFilter>,
}

impl FeedScope {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filter: None,
        }
    }

    pub fn filtered(mut self, filter: RowFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// An event is in scope when its table matches and either row image
    /// passes the filter (so rows moving out of scope are still seen).
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if event.table != self.table {
            return false;
        }
        let Some(filter) = &self.filter else {
            return true;
        };
        [event.new.as_ref(), event.old.as_ref()]
            .into_iter()
            .flatten()
            .any(|row| filter.matches(row))
    }
}

impl fmt::Display for FeedScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.filter {
            Some(filter) => write!(f, "{}:{}", self.table, filter),
            None => f.write_str(&self.table),
        }
    }
}

/// Item yielded by a [`ChangeStream`].
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Change(ChangeEvent),
    /// The subscriber fell behind and `n` events were dropped.
    Lagged(u64),
}

/// Receiving end of one subscription. Dropping it unsubscribes.
pub struct ChangeStream {
    scope: FeedScope,
    rx: broadcast::Receiver<ChangeEvent>,
}

impl ChangeStream {
    pub fn new(scope: FeedScope, rx: broadcast::Receiver<ChangeEvent>) -> Self {
        Self { scope, rx }
    }

    pub fn scope(&self) -> &FeedScope {
        &self.scope
    }

    /// Next in-scope event, or `None` once the feed is closed.
    pub async fn next(&mut self) -> Option<FeedEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.scope.matches(&event) => return Some(FeedEvent::Change(event)),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => return Some(FeedEvent::Lagged(n)),
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl fmt::Debug for ChangeStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeStream")
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// Source of row-level change events.
pub trait ChangeFeed: Send + Sync {
    /// Open a stream for `scope`. Events published after this call returns
    /// are delivered.
    fn subscribe(&self, scope: &FeedScope) -> ChangeStream;
}

/// In-process hub with one broadcast channel per table.
pub struct LocalChangeFeed {
    capacity: usize,
    channels: Mutex<HashMap<String, broadcast::Sender<ChangeEvent>>>,
}

impl LocalChangeFeed {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_FEED_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: Mutex::new(HashMap::new()),
        }
    }

    fn sender(&self, table: &str) -> broadcast::Sender<ChangeEvent> {
        let mut channels = self.channels.lock();
        channels
            .entry(table.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Deliver an event to every subscriber of its table. Returns the number
    /// of open streams it reached before scope filtering.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        let sender = {
            let channels = self.channels.lock();
            match channels.get(&event.table) {
                Some(sender) => sender.clone(),
                None => {
                    trace!(table = %event.table, "no subscribers for change event");
                    return 0;
                }
            }
        };
        debug!(table = %event.table, op = ?event.op, "publishing change event");
        sender.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self, table: &str) -> usize {
        self.channels
            .lock()
            .get(table)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }
}

impl Default for LocalChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeFeed for LocalChangeFeed {
    fn subscribe(&self, scope: &FeedScope) -> ChangeStream {
        ChangeStream::new(scope.clone(), self.sender(&scope.table).subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chirp_types::EntityId;
    use serde_json::json;

    #[test]
    fn test_row_filter_parse() {
        let filter: RowFilter = "post_id=eq.42".parse().unwrap();
        assert_eq!(filter, RowFilter::eq("post_id", 42));
        assert_eq!(filter.to_string(), "post_id=eq.42");
        assert!(filter.matches(&json!({"post_id": 42})));
        assert!(!filter.matches(&json!({"post_id": 7})));
        assert!(!filter.matches(&json!({})));

        assert!("post_id=42".parse::<RowFilter>().is_err());
        assert!("=eq.1".parse::<RowFilter>().is_err());
    }

    #[test]
    fn test_scope_matches_old_image() {
        let scope = FeedScope::table("comments").filtered(RowFilter::eq("post_id", 42));
        assert!(scope.matches(&ChangeEvent::insert("comments", json!({"id": 1, "post_id": 42}))));
        assert!(scope.matches(&ChangeEvent::delete("comments", json!({"id": 1, "post_id": 42}))));
        assert!(!scope.matches(&ChangeEvent::insert("comments", json!({"id": 2, "post_id": 9}))));
        assert!(!scope.matches(&ChangeEvent::insert("likes", json!({"post_id": 42}))));
    }

    #[tokio::test]
    async fn test_local_feed_filters_per_scope() {
        let feed = LocalChangeFeed::new();
        let mut all = feed.subscribe(&FeedScope::table("comments"));
        let mut post_42 =
            feed.subscribe(&FeedScope::table("comments").filtered(RowFilter::eq("post_id", 42)));
        assert_eq!(feed.subscriber_count("comments"), 2);

        feed.publish(ChangeEvent::insert("comments", json!({"id": 1, "post_id": 7})));
        feed.publish(ChangeEvent::insert("comments", json!({"id": 2, "post_id": 42})));

        let Some(FeedEvent::Change(first)) = all.next().await else {
            panic!("expected a change");
        };
        assert_eq!(first.row_id(), Some(EntityId::Int(1)));

        let Some(FeedEvent::Change(only)) = post_42.next().await else {
            panic!("expected a change");
        };
        assert_eq!(only.row_id(), Some(EntityId::Int(2)));

        drop(post_42);
        assert_eq!(feed.subscriber_count("comments"), 1);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let feed = LocalChangeFeed::new();
        assert_eq!(feed.publish(ChangeEvent::insert("posts", json!({"id": 1}))), 0);
    }
}
