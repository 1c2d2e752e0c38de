//! # Channel Classification
//!
//! Decides how each event travels downstream and defines the output record.
//!
//! | Kind | Channel |
//! |---|---|
//! | Analyst, Section | persistent |
//! | Progress, Interview, Search, Error, Metadata | transient |
//! | TextDelta | stream |
//! | Heartbeat | dropped |

use super::events::{EventKind, ResearchEvent};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Downstream channel of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Updates durable session state and is retained in the snapshot
    Persistent,
    /// UI hint, forwarded once and never retained
    Transient,
    /// Streamed text content, reassembled client side by id
    Stream,
    /// Never forwarded
    Dropped,
}

/// Fixed channel of an event kind
pub fn channel_for(kind: EventKind) -> Channel {
    match kind {
        EventKind::Analyst | EventKind::Section => Channel::Persistent,
        EventKind::Progress
        | EventKind::Interview
        | EventKind::Search
        | EventKind::Error
        | EventKind::Metadata => Channel::Transient,
        EventKind::TextDelta => Channel::Stream,
        EventKind::Heartbeat => Channel::Dropped,
    }
}

/// Channel of a concrete event.
///
/// The kind table is authoritative; an upstream `transient` flag that
/// disagrees with it is logged and ignored.
pub fn classify(event: &ResearchEvent) -> Channel {
    let kind = event.kind();
    let channel = channel_for(kind);
    if let Some(flag) = event.transient {
        let disagrees = match channel {
            Channel::Persistent => flag,
            Channel::Transient => !flag,
            Channel::Stream | Channel::Dropped => false,
        };
        if disagrees {
            tracing::debug!(kind = %kind, upstream_transient = flag, "Upstream transient flag overridden");
        }
    }
    channel
}

/// Kind tag of an output record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputKind {
    #[serde(rename = "data-analysts")]
    Analysts,
    #[serde(rename = "data-interview-status")]
    InterviewStatus,
    #[serde(rename = "data-interviews")]
    Interviews,
    #[serde(rename = "data-progress")]
    Progress,
    #[serde(rename = "data-search")]
    Search,
    #[serde(rename = "data-sections")]
    Sections,
    #[serde(rename = "data-error")]
    Error,
    #[serde(rename = "data-metadata")]
    Metadata,
    #[serde(rename = "text-start")]
    TextStart,
    #[serde(rename = "text-delta")]
    TextDelta,
    #[serde(rename = "text-end")]
    TextEnd,
    #[serde(rename = "research-complete")]
    ResearchComplete,
}

impl OutputKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputKind::Analysts => "data-analysts",
            OutputKind::InterviewStatus => "data-interview-status",
            OutputKind::Interviews => "data-interviews",
            OutputKind::Progress => "data-progress",
            OutputKind::Search => "data-search",
            OutputKind::Sections => "data-sections",
            OutputKind::Error => "data-error",
            OutputKind::Metadata => "data-metadata",
            OutputKind::TextStart => "text-start",
            OutputKind::TextDelta => "text-delta",
            OutputKind::TextEnd => "text-end",
            OutputKind::ResearchComplete => "research-complete",
        }
    }
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One record written to the downstream sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputEvent {
    pub kind: OutputKind,
    pub payload: serde_json::Value,
    pub transient: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl OutputEvent {
    pub fn persistent(kind: OutputKind, payload: serde_json::Value) -> Self {
        Self {
            kind,
            payload,
            transient: false,
            id: None,
        }
    }

    pub fn transient(kind: OutputKind, payload: serde_json::Value) -> Self {
        Self {
            kind,
            payload,
            transient: true,
            id: None,
        }
    }

    /// Streamed text is neither merged nor a hint, so it is not transient
    pub fn stream(kind: OutputKind, payload: serde_json::Value, stream_id: String) -> Self {
        Self {
            kind,
            payload,
            transient: false,
            id: Some(stream_id),
        }
    }

    /// Build the record for `channel`; `Stream` and `Dropped` fall back to
    /// persistent and transient respectively.
    pub fn on_channel(channel: Channel, kind: OutputKind, payload: serde_json::Value) -> Self {
        match channel {
            Channel::Persistent | Channel::Stream => Self::persistent(kind, payload),
            Channel::Transient | Channel::Dropped => Self::transient(kind, payload),
        }
    }

    pub fn with_id(mut self, id: Option<String>) -> Self {
        self.id = id;
        self
    }
}
