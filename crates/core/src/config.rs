//! # Stream Configuration
//!
//! Knobs for one research stream: where the upstream lives and how long
//! the pipeline waits on it.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the stream processor and upstream client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StreamConfig {
    /// Base URL of the upstream research service
    pub upstream_url: String,
    /// Path of the streaming endpoint on the upstream service
    pub stream_path: String,
    /// Hard upper bound for the whole stream, measured from connection start
    pub hard_timeout_secs: u64,
    /// Idle time without a parsed event before the watchdog logs diagnostics
    pub stall_threshold_secs: u64,
    /// Capacity of the bounded channel between processor and client
    pub channel_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            upstream_url: "http://localhost:8000".to_string(),
            stream_path: "/research/stream".to_string(),
            hard_timeout_secs: 300,
            stall_threshold_secs: 30,
            channel_capacity: 100,
        }
    }
}

impl StreamConfig {
    pub fn hard_timeout(&self) -> Duration {
        Duration::from_secs(self.hard_timeout_secs)
    }

    pub fn stall_threshold(&self) -> Duration {
        Duration::from_secs(self.stall_threshold_secs)
    }

    /// Full URL of the upstream streaming endpoint
    pub fn stream_url(&self) -> String {
        format!(
            "{}/{}",
            self.upstream_url.trim_end_matches('/'),
            self.stream_path.trim_start_matches('/')
        )
    }

    /// Merge overrides, only fields explicitly set in `other` win.
    pub fn merge(&mut self, other: StreamConfigOverrides) {
        if let Some(url) = other.upstream_url {
            self.upstream_url = url;
        }
        if let Some(path) = other.stream_path {
            self.stream_path = path;
        }
        if let Some(secs) = other.hard_timeout_secs {
            self.hard_timeout_secs = secs;
        }
        if let Some(secs) = other.stall_threshold_secs {
            self.stall_threshold_secs = secs;
        }
        if let Some(capacity) = other.channel_capacity {
            self.channel_capacity = capacity.max(1);
        }
    }
}

/// Partial configuration, as read from a config file or the environment
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hard_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stall_threshold_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_capacity: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StreamConfig::default();
        assert_eq!(config.hard_timeout(), Duration::from_secs(300));
        assert_eq!(config.stall_threshold(), Duration::from_secs(30));
        assert_eq!(config.stream_url(), "http://localhost:8000/research/stream");
    }

    #[test]
    fn test_merge_only_set_fields() {
        let mut config = StreamConfig::default();
        config.merge(StreamConfigOverrides {
            upstream_url: Some("https://panel.example.com/".to_string()),
            stall_threshold_secs: Some(5),
            channel_capacity: Some(0),
            ..Default::default()
        });
        assert_eq!(config.stream_url(), "https://panel.example.com/research/stream");
        assert_eq!(config.stall_threshold_secs, 5);
        assert_eq!(config.hard_timeout_secs, 300);
        assert_eq!(config.channel_capacity, 1);
    }

    #[test]
    fn test_partial_json() {
        let config: StreamConfig = serde_json::from_str(r#"{"hard_timeout_secs": 60}"#).unwrap();
        assert_eq!(config.hard_timeout_secs, 60);
        assert_eq!(config.stall_threshold_secs, 30);
    }
}
