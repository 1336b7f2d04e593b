//! Bounded in-memory diagnostic log
//!
//! Components record leveled events here so failures of the gateway, toggle
//! controllers and live subscriptions can be inspected or exported later.
//! Every record is also mirrored to `tracing`.

use std::collections::VecDeque;
use std::sync::Arc;

use chirp_types::Severity;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

/// Default ring capacity.
pub const DEFAULT_CAPACITY: usize = 500;

/// A single diagnostic record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub level: Severity,
    pub tag: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Sink for diagnostic events.
///
/// Components take an `Arc<dyn DiagnosticLog>` so tests can substitute their
/// own recorder.
pub trait DiagnosticLog: Send + Sync {
    fn record(&self, severity: Severity, tag: &str, message: &str, payload: Option<Value>);

    fn debug(&self, tag: &str, message: &str, payload: Option<Value>) {
        self.record(Severity::Debug, tag, message, payload);
    }

    fn info(&self, tag: &str, message: &str, payload: Option<Value>) {
        self.record(Severity::Info, tag, message, payload);
    }

    fn warn(&self, tag: &str, message: &str, payload: Option<Value>) {
        self.record(Severity::Warn, tag, message, payload);
    }

    fn error(&self, tag: &str, message: &str, payload: Option<Value>) {
        self.record(Severity::Error, tag, message, payload);
    }

    fn critical(&self, tag: &str, message: &str, payload: Option<Value>) {
        self.record(Severity::Critical, tag, message, payload);
    }
}

/// Ring configuration
#[derive(Debug, Clone)]
pub struct LogRingConfig {
    /// Maximum number of retained entries
    pub capacity: usize,
    /// Entries below this level are dropped
    pub min_level: Severity,
    /// Number of errors that count as a burst
    pub burst_threshold: usize,
    /// Window the burst must fall within
    pub burst_window: Duration,
}

impl Default for LogRingConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            min_level: Severity::Debug,
            burst_threshold: 5,
            burst_window: Duration::seconds(10),
        }
    }
}

/// Filter for [`LogRing::query`]. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct LogQuery {
    pub tag: Option<String>,
    pub level: Option<Severity>,
    pub since: Option<DateTime<Utc>>,
}

impl LogQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn level(mut self, level: Severity) -> Self {
        self.level = Some(level);
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn matches(&self, entry: &LogEntry) -> bool {
        if let Some(tag) = &self.tag {
            if !entry.tag.contains(tag.as_str()) {
                return false;
            }
        }
        if let Some(level) = self.level {
            if entry.level != level {
                return false;
            }
        }
        if let Some(since) = self.since {
            if entry.timestamp < since {
                return false;
            }
        }
        true
    }
}

/// Client identification attached to exports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub client: String,
    pub version: String,
    pub os: String,
    pub arch: String,
}

impl Environment {
    pub fn current(client: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            client: client.into(),
            version: version.into(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
        }
    }
}

/// Portable dump of the ring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogExport {
    pub exported_at: DateTime<Utc>,
    pub entries: Vec<LogEntry>,
    pub environment: Environment,
}

struct RingState {
    entries: VecDeque<LogEntry>,
    next_id: u64,
    min_level: Severity,
    /// Id of the newest error already reported as part of a burst
    burst_reported_through: Option<u64>,
}

/// Fixed-capacity ring buffer of [`LogEntry`] values.
pub struct LogRing {
    config: LogRingConfig,
    state: Mutex<RingState>,
    failures: broadcast::Sender<LogEntry>,
}

impl LogRing {
    pub fn new(config: LogRingConfig) -> Self {
        let (failures, _) = broadcast::channel(64);
        let capacity = config.capacity.max(1);
        Self {
            state: Mutex::new(RingState {
                entries: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
                next_id: 0,
                min_level: config.min_level,
                burst_reported_through: None,
            }),
            config: LogRingConfig { capacity, ..config },
            failures,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(LogRingConfig {
            capacity,
            ..LogRingConfig::default()
        })
    }

    /// Convenience for handing the ring to components.
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    pub fn set_min_level(&self, level: Severity) {
        self.state.lock().min_level = level;
    }

    /// Snapshot of every retained entry, oldest first.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.state.lock().entries.iter().cloned().collect()
    }

    pub fn query(&self, query: &LogQuery) -> Vec<LogEntry> {
        self.state
            .lock()
            .entries
            .iter()
            .filter(|e| query.matches(e))
            .cloned()
            .collect()
    }

    /// Drop all entries. Ids keep increasing afterwards.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.burst_reported_through = None;
    }

    /// Receive every error and critical entry recorded from now on.
    pub fn subscribe_errors(&self) -> broadcast::Receiver<LogEntry> {
        self.failures.subscribe()
    }

    pub fn export(&self, environment: Environment) -> LogExport {
        LogExport {
            exported_at: Utc::now(),
            entries: self.entries(),
            environment,
        }
    }

    fn push(state: &mut RingState, capacity: usize, entry: LogEntry) {
        while state.entries.len() >= capacity {
            state.entries.pop_front();
        }
        state.entries.push_back(entry);
    }

    fn make_entry(
        state: &mut RingState,
        level: Severity,
        tag: &str,
        message: &str,
        data: Option<Value>,
    ) -> LogEntry {
        let id = state.next_id;
        state.next_id += 1;
        LogEntry {
            id,
            timestamp: Utc::now(),
            level,
            tag: tag.to_string(),
            message: message.to_string(),
            data,
        }
    }

    /// Returns a critical entry when the newest errors form a burst that has
    /// not been reported yet.
    fn detect_burst(&self, state: &mut RingState) -> Option<LogEntry> {
        let threshold = self.config.burst_threshold;
        if threshold == 0 {
            return None;
        }
        let recent: Vec<&LogEntry> = state
            .entries
            .iter()
            .rev()
            .filter(|e| e.level == Severity::Error)
            .take(threshold)
            .collect();
        if recent.len() < threshold {
            return None;
        }
        let newest = recent[0];
        let oldest = recent[threshold - 1];
        if let Some(through) = state.burst_reported_through {
            if oldest.id <= through {
                return None;
            }
        }
        let span = newest.timestamp - oldest.timestamp;
        if span >= self.config.burst_window {
            return None;
        }
        let newest_id = newest.id;
        let payload = serde_json::json!({
            "errors": threshold,
            "span_ms": span.num_milliseconds(),
            "recoverable": false,
        });
        state.burst_reported_through = Some(newest_id);
        Some(Self::make_entry(
            state,
            Severity::Critical,
            "DIAGNOSTICS",
            "multiple errors detected",
            Some(payload),
        ))
    }
}

impl Default for LogRing {
    fn default() -> Self {
        Self::new(LogRingConfig::default())
    }
}

impl DiagnosticLog for LogRing {
    fn record(&self, severity: Severity, tag: &str, message: &str, payload: Option<Value>) {
        let mut emitted = Vec::with_capacity(2);
        {
            let mut state = self.state.lock();
            if severity < state.min_level {
                return;
            }
            let entry = Self::make_entry(&mut state, severity, tag, message, payload);
            Self::push(&mut state, self.config.capacity, entry.clone());
            emitted.push(entry);

            if severity == Severity::Error {
                if let Some(alert) = self.detect_burst(&mut state) {
                    Self::push(&mut state, self.config.capacity, alert.clone());
                    emitted.push(alert);
                }
            }
        }

        for entry in emitted {
            mirror(&entry);
            if entry.level.is_failure() {
                // No receivers is fine.
                let _ = self.failures.send(entry);
            }
        }
    }
}

fn mirror(entry: &LogEntry) {
    let data = entry.data.as_ref().map(|d| d.to_string()).unwrap_or_default();
    match entry.level {
        Severity::Debug => tracing::debug!(tag = %entry.tag, id = entry.id, %data, "{}", entry.message),
        Severity::Info => tracing::info!(tag = %entry.tag, id = entry.id, %data, "{}", entry.message),
        Severity::Warn => tracing::warn!(tag = %entry.tag, id = entry.id, %data, "{}", entry.message),
        Severity::Error => tracing::error!(tag = %entry.tag, id = entry.id, %data, "{}", entry.message),
        Severity::Critical => {
            tracing::error!(tag = %entry.tag, id = entry.id, critical = true, %data, "{}", entry.message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn quiet_ring(capacity: usize) -> LogRing {
        LogRing::new(LogRingConfig {
            capacity,
            burst_threshold: 0,
            ..LogRingConfig::default()
        })
    }

    #[test]
    fn test_ids_strictly_increase() {
        let ring = quiet_ring(10);
        ring.info("A", "one", None);
        ring.info("A", "two", None);
        ring.info("A", "three", None);

        let ids: Vec<u64> = ring.entries().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn test_overflow_evicts_oldest() {
        let ring = quiet_ring(3);
        for i in 0..4 {
            ring.info("RING", &format!("entry {i}"), None);
        }

        let entries = ring.entries();
        assert_eq!(entries.len(), 3);
        assert!(entries.iter().all(|e| e.message != "entry 0"));
        assert_eq!(entries.last().unwrap().message, "entry 3");
    }

    #[test]
    fn test_never_exceeds_capacity() {
        let ring = quiet_ring(5);
        for i in 0..50 {
            ring.warn("RING", &i.to_string(), None);
            assert!(ring.len() <= 5);
        }
        assert_eq!(ring.capacity(), 5);
    }

    #[test]
    fn test_query_by_tag_and_level() {
        let ring = quiet_ring(10);
        ring.info("GATEWAY", "call", None);
        ring.error("GATEWAY", "failed", Some(json!({"op": "rpc:toggle_like"})));
        ring.error("LIVE", "refetch failed", None);

        let gateway = ring.query(&LogQuery::new().tag("GATE"));
        assert_eq!(gateway.len(), 2);

        let errors = ring.query(&LogQuery::new().level(Severity::Error));
        assert_eq!(errors.len(), 2);

        let both = ring.query(&LogQuery::new().tag("GATEWAY").level(Severity::Error));
        assert_eq!(both.len(), 1);
        assert_eq!(both[0].data, Some(json!({"op": "rpc:toggle_like"})));
    }

    #[test]
    fn test_query_since() {
        let ring = quiet_ring(10);
        ring.info("T", "old", None);
        std::thread::sleep(std::time::Duration::from_millis(5));
        let cutoff = Utc::now();
        std::thread::sleep(std::time::Duration::from_millis(5));
        ring.info("T", "new", None);

        let recent = ring.query(&LogQuery::new().since(cutoff));
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].message, "new");
    }

    #[test]
    fn test_snapshot_is_detached() {
        let ring = quiet_ring(10);
        ring.info("T", "original", None);

        let mut snapshot = ring.entries();
        snapshot[0].message = "mutated".into();
        snapshot.clear();

        assert_eq!(ring.entries()[0].message, "original");
    }

    #[test]
    fn test_min_level_drops_entries() {
        let ring = quiet_ring(10);
        ring.set_min_level(Severity::Warn);
        ring.debug("T", "noise", None);
        ring.info("T", "noise", None);
        ring.warn("T", "kept", None);

        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn test_error_burst_flags_critical_once() {
        let ring = LogRing::default();
        for i in 0..5 {
            ring.error("GATEWAY", &format!("failure {i}"), None);
        }
        let critical = ring.query(&LogQuery::new().level(Severity::Critical));
        assert_eq!(critical.len(), 1);
        assert_eq!(critical[0].message, "multiple errors detected");

        // The sixth error overlaps the reported window.
        ring.error("GATEWAY", "failure 5", None);
        assert_eq!(ring.query(&LogQuery::new().level(Severity::Critical)).len(), 1);
    }

    #[tokio::test]
    async fn test_error_subscribers() {
        let ring = quiet_ring(10);
        let mut rx = ring.subscribe_errors();

        ring.info("T", "ignored", None);
        ring.error("T", "boom", None);

        let entry = rx.recv().await.unwrap();
        assert_eq!(entry.message, "boom");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_export_document() {
        let ring = quiet_ring(10);
        ring.info("T", "hello", None);

        let export = ring.export(Environment::current("chirp-test", "0.1.0"));
        let value = serde_json::to_value(&export).unwrap();

        assert!(value["exported_at"].is_string());
        assert_eq!(value["entries"][0]["level"], json!("INFO"));
        assert_eq!(value["environment"]["client"], json!("chirp-test"));
    }

    #[test]
    fn test_clear_keeps_ids_monotonic() {
        let ring = quiet_ring(10);
        ring.info("T", "a", None);
        ring.clear();
        assert!(ring.is_empty());
        ring.info("T", "b", None);
        assert_eq!(ring.entries()[0].id, 1);
    }
}
