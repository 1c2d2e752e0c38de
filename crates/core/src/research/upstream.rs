//! # Upstream Client
//!
//! Opens the streaming connection to the external research service. The
//! pipeline only sees the resulting byte stream.

use crate::config::StreamConfig;
use crate::error::StreamError;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Raw upstream byte stream
pub type UpstreamStream = BoxStream<'static, Result<Bytes, reqwest::Error>>;

/// Body sent to the upstream research service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResearchRequest {
    /// What the panel should research
    pub topic: String,
    /// Upper bound on the size of the analyst panel
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_analysts: Option<u32>,
    /// Extra options passed through untouched
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub options: serde_json::Map<String, serde_json::Value>,
}

impl ResearchRequest {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            max_analysts: None,
            options: serde_json::Map::new(),
        }
    }
}

/// HTTP client for the upstream streaming endpoint
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    url: String,
}

impl UpstreamClient {
    pub fn new(config: &StreamConfig) -> Result<Self, StreamError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("roundtable/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| StreamError::Connection(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            url: config.stream_url(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Start a research run and return its byte stream.
    ///
    /// Non-2xx responses are fatal; no retry is attempted here.
    pub async fn open(&self, request: &ResearchRequest) -> Result<UpstreamStream, StreamError> {
        tracing::info!(url = %self.url, topic = %request.topic, "Opening upstream research stream");

        let response = self
            .http
            .post(&self.url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StreamError::UpstreamStatus {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }

        Ok(response.bytes_stream().boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_body() {
        let mut request = ResearchRequest::new("Water risk in mining");
        request.max_analysts = Some(3);
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body, json!({"topic": "Water risk in mining", "maxAnalysts": 3}));
    }

    #[test]
    fn test_client_url() {
        let config = StreamConfig {
            upstream_url: "http://panel:9000/".to_string(),
            ..StreamConfig::default()
        };
        let client = UpstreamClient::new(&config).unwrap();
        assert_eq!(client.url(), "http://panel:9000/research/stream");
    }

    #[tokio::test]
    async fn test_connection_refused_is_connection_error() {
        let config = StreamConfig {
            upstream_url: "http://127.0.0.1:9".to_string(),
            ..StreamConfig::default()
        };
        let client = UpstreamClient::new(&config).unwrap();
        let result = client.open(&ResearchRequest::new("x")).await;
        assert!(matches!(result, Err(StreamError::Connection(_))));
    }
}
