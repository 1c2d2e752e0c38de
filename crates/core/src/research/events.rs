//! # Research Events
//!
//! The canonical event union every upstream wire shape normalizes into.
//! Payload structs deserialize straight from the upstream `data` objects.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of research event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Analyst,
    Progress,
    Interview,
    Search,
    Section,
    Error,
    Metadata,
    #[serde(rename = "text-delta")]
    TextDelta,
    Heartbeat,
}

impl EventKind {
    /// Resolve a wire kind tag (`analyst`, `interview`, ...)
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "analyst" => Some(EventKind::Analyst),
            "progress" => Some(EventKind::Progress),
            "interview" => Some(EventKind::Interview),
            "search" => Some(EventKind::Search),
            "section" => Some(EventKind::Section),
            "error" => Some(EventKind::Error),
            "metadata" => Some(EventKind::Metadata),
            "text-delta" => Some(EventKind::TextDelta),
            "heartbeat" => Some(EventKind::Heartbeat),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Analyst => "analyst",
            EventKind::Progress => "progress",
            EventKind::Interview => "interview",
            EventKind::Search => "search",
            EventKind::Section => "section",
            EventKind::Error => "error",
            EventKind::Metadata => "metadata",
            EventKind::TextDelta => "text-delta",
            EventKind::Heartbeat => "heartbeat",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A synthetic analyst on the research panel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analyst {
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub affiliation: String,
    #[serde(default)]
    pub esg_focus: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub esg_categories: Option<Vec<String>>,
}

/// Progress report; absent fields leave session progress untouched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u32>,
}

/// Where an interview thread currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterviewStatus {
    Started,
    Questioning,
    Searching,
    Answering,
    Completed,
    #[serde(other)]
    Unknown,
}

/// Speaker of a transcript message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    /// Parse an explicit role hint; analyst questions count as `user`
    pub fn parse(role: &str) -> Option<Self> {
        match role.to_ascii_lowercase().as_str() {
            "user" | "analyst" | "human" => Some(MessageRole::User),
            "assistant" | "expert" | "ai" => Some(MessageRole::Assistant),
            _ => None,
        }
    }
}

/// Per-message metadata attached to interview fragments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct InterviewMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One fragment of an analyst's interview
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterviewUpdate {
    pub analyst_name: String,
    pub status: InterviewStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_preview: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<InterviewMetadata>,
}

impl InterviewUpdate {
    /// Explicit metadata role first, then inferred from status
    pub fn resolved_role(&self) -> MessageRole {
        if let Some(role) = self
            .metadata
            .as_ref()
            .and_then(|m| m.role.as_deref())
            .and_then(MessageRole::parse)
        {
            return role;
        }
        match self.status {
            InterviewStatus::Questioning => MessageRole::User,
            _ => MessageRole::Assistant,
        }
    }
}

/// Lifecycle of a tool search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStatus {
    Started,
    Completed,
    Error,
    #[serde(other)]
    Unknown,
}

/// A web/tool search performed by an analyst
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchUpdate {
    #[serde(default)]
    pub tool: String,
    #[serde(default)]
    pub query: String,
    pub status: SearchStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Latest report section preview for an analyst
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionUpdate {
    pub analyst_name: String,
    #[serde(default)]
    pub content_preview: String,
}

/// Error reported by the upstream service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorUpdate {
    #[serde(alias = "message")]
    pub error: String,
    #[serde(default = "default_error_type")]
    pub error_type: String,
}

fn default_error_type() -> String {
    "unknown".to_string()
}

/// Which part of a text run a delta belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextMarker {
    Start,
    Delta,
    End,
}

/// Streamed text fragment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextDelta {
    pub marker: TextMarker,
    pub stream_id: Option<String>,
    pub delta: String,
}

impl TextDelta {
    pub fn delta(text: impl Into<String>) -> Self {
        Self {
            marker: TextMarker::Delta,
            stream_id: None,
            delta: text.into(),
        }
    }
}

/// Kind-specific payload
#[derive(Debug, Clone, PartialEq)]
pub enum EventBody {
    Analyst(Analyst),
    Progress(ProgressUpdate),
    Interview(InterviewUpdate),
    Search(SearchUpdate),
    Section(SectionUpdate),
    Error(ErrorUpdate),
    Metadata(serde_json::Value),
    TextDelta(TextDelta),
    Heartbeat,
}

/// A normalized event, independent of the wire shape it arrived in
#[derive(Debug, Clone, PartialEq)]
pub struct ResearchEvent {
    pub body: EventBody,
    /// Upstream event id, if any
    pub id: Option<String>,
    /// Upstream transient flag, if the upstream set one
    pub transient: Option<bool>,
}

impl ResearchEvent {
    pub fn new(body: EventBody) -> Self {
        Self {
            body,
            id: None,
            transient: None,
        }
    }

    pub fn with_id(mut self, id: Option<String>) -> Self {
        self.id = id;
        self
    }

    pub fn with_transient(mut self, transient: Option<bool>) -> Self {
        self.transient = transient;
        self
    }

    pub fn kind(&self) -> EventKind {
        match &self.body {
            EventBody::Analyst(_) => EventKind::Analyst,
            EventBody::Progress(_) => EventKind::Progress,
            EventBody::Interview(_) => EventKind::Interview,
            EventBody::Search(_) => EventKind::Search,
            EventBody::Section(_) => EventKind::Section,
            EventBody::Error(_) => EventKind::Error,
            EventBody::Metadata(_) => EventKind::Metadata,
            EventBody::TextDelta(_) => EventKind::TextDelta,
            EventBody::Heartbeat => EventKind::Heartbeat,
        }
    }
}
