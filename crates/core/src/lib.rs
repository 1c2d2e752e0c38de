//! # Roundtable Core
//!
//! Normalizes the event stream of a multi-analyst research service into a
//! single canonical model and forwards it to clients.
//!
//! ## Architecture
//!
//! - `wire/` - Line framing, format detection and normalization
//! - `research/` - Event model, reconciliation, channels and the stream processor
//! - `state/` - The per-request research session and its snapshot
//! - `config` - Stream settings loaded by the server
//!
//! ## Usage
//!
//! ```rust,ignore
//! use roundtable_core::config::StreamConfig;
//! use roundtable_core::research::{ResearchRequest, StreamProcessor, UpstreamClient};
//!
//! let config = StreamConfig::default();
//! let client = UpstreamClient::new(&config)?;
//! let (tx, mut rx) = tokio::sync::mpsc::channel(config.channel_capacity);
//! let mut processor = StreamProcessor::new(config, "Water risk", tx);
//! let snapshot = processor.run_upstream(&client, &ResearchRequest::new("Water risk")).await?;
//! ```

pub mod config;
pub mod error;
pub mod research;
pub mod state;
pub mod wire;

pub use config::StreamConfig;
pub use error::{LineError, StreamError};
