//! # Errors
//!
//! Two tiers: [`LineError`] is recovered per line and never leaves the
//! pipeline; [`StreamError`] terminates it.

use std::time::Duration;
use thiserror::Error;

/// A single upstream line that could not be turned into events.
#[derive(Debug, Error)]
pub enum LineError {
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("unrecognized line shape: {0}")]
    Unrecognized(String),

    #[error("invalid {kind} payload: {source}")]
    InvalidPayload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid raw token: {0}")]
    InvalidToken(String),
}

/// Failure that ends the pipeline for this request.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("upstream returned HTTP {status}: {body}")]
    UpstreamStatus { status: u16, body: String },

    #[error("upstream connection failed: {0}")]
    Connection(String),

    #[error("failed to read upstream stream: {0}")]
    Read(String),

    #[error("research stream exceeded {0:?}")]
    Timeout(Duration),

    #[error("downstream sink closed")]
    SinkClosed,
}

impl StreamError {
    /// Short machine-readable tag used as `errorType` downstream
    pub fn kind(&self) -> &'static str {
        match self {
            StreamError::UpstreamStatus { .. } => "upstream_status",
            StreamError::Connection(_) => "connection",
            StreamError::Read(_) => "stream_read",
            StreamError::Timeout(_) => "timeout",
            StreamError::SinkClosed => "sink_closed",
        }
    }

    /// Payload of the terminal error event sent to the client
    pub fn to_event_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "error": self.to_string(),
            "errorType": self.kind(),
        })
    }
}

impl From<reqwest::Error> for StreamError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            StreamError::Connection(format!("timed out: {}", err))
        } else if err.is_body() || err.is_decode() {
            StreamError::Read(err.to_string())
        } else {
            StreamError::Connection(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_payload() {
        let err = StreamError::Timeout(Duration::from_secs(300));
        let payload = err.to_event_payload();
        assert_eq!(payload["errorType"], "timeout");
        assert!(payload["error"].as_str().unwrap().contains("300s"));
    }

    #[test]
    fn test_status_message() {
        let err = StreamError::UpstreamStatus {
            status: 502,
            body: "bad gateway".to_string(),
        };
        assert_eq!(err.to_string(), "upstream returned HTTP 502: bad gateway");
        assert_eq!(err.kind(), "upstream_status");
    }
}
