//! # Research Session
//!
//! The single mutable aggregate for one research request. Only the
//! reconciler mutates it; it is read once at the end to build the snapshot.

use crate::research::events::{Analyst, MessageRole};
use crate::research::phase::ResearchPhase;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One message in an analyst's interview transcript
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterviewMessage {
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_number: Option<u32>,
    pub timestamp: DateTime<Utc>,
}

impl InterviewMessage {
    /// Same role, content and turn, ignoring the timestamp
    fn same_fragment(&self, other: &InterviewMessage) -> bool {
        self.role == other.role && self.content == other.content && self.turn_number == other.turn_number
    }
}

/// A completed search that returned results
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub tool: String,
    pub query: String,
    pub results_count: u32,
    pub completed_at: DateTime<Utc>,
}

/// Overall progress counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Progress {
    pub current: u32,
    pub total: u32,
    pub message: String,
}

/// Last error reported for the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionError {
    pub message: String,
    pub kind: String,
}

/// Result of upserting an analyst
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Updated,
    Unchanged,
}

/// Accumulated state of one research session
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchSession {
    pub topic: String,
    pub phase: ResearchPhase,
    /// Ordered by first appearance, unique by name
    pub analysts: Vec<Analyst>,
    /// Participant name → append-only transcript
    pub interviews: BTreeMap<String, Vec<InterviewMessage>>,
    /// Participant name → latest section preview
    pub sections: BTreeMap<String, String>,
    pub searches: Vec<SearchResult>,
    pub progress: Progress,
    pub error: Option<SessionError>,
    pub started_at: DateTime<Utc>,
}

impl Default for ResearchSession {
    fn default() -> Self {
        Self::new("")
    }
}

impl ResearchSession {
    /// Create an empty session in the initialization phase
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            phase: ResearchPhase::Initialization,
            analysts: Vec::new(),
            interviews: BTreeMap::new(),
            sections: BTreeMap::new(),
            searches: Vec::new(),
            progress: Progress::default(),
            error: None,
            started_at: Utc::now(),
        }
    }

    /// Replace the analyst with the same name in place, or append
    pub(crate) fn upsert_analyst(&mut self, analyst: Analyst) -> Upsert {
        match self.analysts.iter_mut().find(|a| a.name == analyst.name) {
            Some(existing) if *existing == analyst => Upsert::Unchanged,
            Some(existing) => {
                *existing = analyst;
                Upsert::Updated
            }
            None => {
                self.analysts.push(analyst);
                Upsert::Inserted
            }
        }
    }

    /// Append a transcript message unless it duplicates stored content.
    ///
    /// Duplicate when the content equals the participant's last message, or
    /// when the same (turn, role, content) fragment is already stored.
    pub(crate) fn append_message(&mut self, participant: &str, message: InterviewMessage) -> bool {
        let transcript = self.interviews.entry(participant.to_string()).or_default();

        if transcript
            .last()
            .is_some_and(|last| last.content == message.content)
        {
            return false;
        }
        if transcript.iter().any(|stored| stored.same_fragment(&message)) {
            return false;
        }

        transcript.push(message);
        true
    }

    /// Make sure a transcript exists for the participant
    pub(crate) fn ensure_transcript(&mut self, participant: &str) {
        self.interviews.entry(participant.to_string()).or_default();
    }

    /// Last-write-wins section preview; returns whether it changed
    pub(crate) fn set_section(&mut self, participant: &str, content: String) -> bool {
        match self.sections.get(participant) {
            Some(existing) if *existing == content => false,
            _ => {
                self.sections.insert(participant.to_string(), content);
                true
            }
        }
    }

    /// Record a completed search; identical repeats are ignored
    pub(crate) fn record_search(&mut self, search: SearchResult) -> bool {
        let duplicate = self.searches.iter().any(|s| {
            s.tool == search.tool && s.query == search.query && s.results_count == search.results_count
        });
        if duplicate {
            return false;
        }
        self.searches.push(search);
        true
    }

    pub fn transcript(&self, participant: &str) -> &[InterviewMessage] {
        self.interviews
            .get(participant)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn interview_message_count(&self) -> usize {
        self.interviews.values().map(Vec::len).sum()
    }

    /// Full dump of accumulated state with the phase forced to completed
    pub fn snapshot(&self) -> ResearchSnapshot {
        ResearchSnapshot {
            topic: self.topic.clone(),
            phase: ResearchPhase::Completed,
            analysts: self.analysts.clone(),
            interviews: self.interviews.clone(),
            sections: self.sections.clone(),
            searches: self.searches.clone(),
            progress: self.progress.clone(),
            error: self.error.clone(),
        }
    }
}

/// Terminal state carried by the `research-complete` event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchSnapshot {
    pub topic: String,
    pub phase: ResearchPhase,
    pub analysts: Vec<Analyst>,
    pub interviews: BTreeMap<String, Vec<InterviewMessage>>,
    pub sections: BTreeMap<String, String>,
    pub searches: Vec<SearchResult>,
    pub progress: Progress,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<SessionError>,
}
