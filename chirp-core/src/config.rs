//! Client configuration parsing.

use std::path::Path;
use std::time::Duration;

use chirp_types::Severity;
use serde::{Deserialize, Serialize};

use crate::diagnostics::{LogRingConfig, DEFAULT_CAPACITY};
use crate::error::ConfigError;
use crate::live::{LiveOptions, ReconcilePolicy};

/// Main configuration struct matching chirp.yml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    pub backend: BackendConfig,

    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,

    #[serde(default)]
    pub live: LiveConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Project URL, e.g. `https://xyz.supabase.co`
    pub url: String,
    /// Public (anon) key sent as `apikey`
    pub api_key: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    10
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:54321".to_string(),
            api_key: String::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl BackendConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    #[serde(default = "default_min_level")]
    pub min_level: Severity,

    #[serde(default = "default_burst_threshold")]
    pub burst_threshold: usize,

    #[serde(default = "default_burst_window_secs")]
    pub burst_window_secs: u64,
}

fn default_capacity() -> usize {
    DEFAULT_CAPACITY
}

fn default_min_level() -> Severity {
    Severity::Debug
}

fn default_burst_threshold() -> usize {
    5
}

fn default_burst_window_secs() -> u64 {
    10
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            min_level: default_min_level(),
            burst_threshold: default_burst_threshold(),
            burst_window_secs: default_burst_window_secs(),
        }
    }
}

impl DiagnosticsConfig {
    pub fn ring_config(&self) -> LogRingConfig {
        LogRingConfig {
            capacity: self.capacity,
            min_level: self.min_level,
            burst_threshold: self.burst_threshold,
            burst_window: chrono::Duration::seconds(self.burst_window_secs as i64),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveConfig {
    #[serde(default)]
    pub policy: ReconcilePolicy,

    /// Window used to coalesce bursts of change events
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

fn default_debounce_ms() -> u64 {
    150
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            policy: ReconcilePolicy::default(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl LiveConfig {
    pub fn options(&self) -> LiveOptions {
        LiveOptions {
            policy: self.policy,
            debounce: Duration::from_millis(self.debounce_ms),
        }
    }
}

impl ClientConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.backend.url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "backend.url must be an http(s) URL, got {url:?}"
            )));
        }
        if self.diagnostics.capacity == 0 {
            return Err(ConfigError::Invalid(
                "diagnostics.capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = ClientConfig::parse(
            "backend:\n  url: https://demo.supabase.co\n  api_key: anon\n",
        )
        .unwrap();

        assert_eq!(config.backend.timeout_secs, 10);
        assert_eq!(config.diagnostics.capacity, 500);
        assert_eq!(config.live.policy, ReconcilePolicy::Refetch);
        assert_eq!(config.live.options().debounce, Duration::from_millis(150));
    }

    #[test]
    fn test_full_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "backend:\n  url: http://localhost:54321\n  api_key: k\n  timeout_secs: 3\n\
             diagnostics:\n  capacity: 50\n  min_level: WARN\n\
             live:\n  policy: merge\n  debounce_ms: 0\n"
        )
        .unwrap();

        let config = ClientConfig::from_file(file.path()).unwrap();
        assert_eq!(config.diagnostics.min_level, Severity::Warn);
        assert_eq!(config.diagnostics.ring_config().capacity, 50);
        assert_eq!(config.live.policy, ReconcilePolicy::Merge);
        assert_eq!(config.backend.request_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn test_rejects_bad_url() {
        let err = ClientConfig::parse("backend:\n  url: ftp://nope\n  api_key: k\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
