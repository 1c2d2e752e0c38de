//! # Reconciler
//!
//! Applies per-kind merge rules to the [`ResearchSession`] and produces the
//! downstream records each event fans out into.
//!
//! | Kind | Key | Merge rule |
//! |---|---|---|
//! | Analyst | name | upsert in place, once per batch |
//! | Progress | - | overwrite present fields, phase if supplied |
//! | Interview | participant | append unless duplicate content |
//! | Search | - | append completed searches with results |
//! | Section | participant | last write wins |
//! | Error | - | overwrite |
//! | Metadata | - | phase/topic only, otherwise forwarded |
//! | TextDelta | - | forwarded with a stream id |
//! | Heartbeat | - | dropped |

use super::channel::{classify, Channel, OutputEvent, OutputKind};
use super::events::{
    EventBody, InterviewUpdate, ProgressUpdate, ResearchEvent, SearchStatus, SearchUpdate,
    TextDelta, TextMarker,
};
use super::phase::{transition, PhaseTransition, ResearchPhase};
use crate::state::{InterviewMessage, ResearchSession, SearchResult, SessionError, Upsert};
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashSet;

/// State scoped to one input line (one batch)
#[derive(Debug, Default)]
pub struct BatchScope {
    seen_analysts: HashSet<String>,
}

impl BatchScope {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Merges normalized events into the session
#[derive(Debug, Default)]
pub struct Reconciler {
    /// Id of the text run currently being streamed
    active_text_stream: Option<String>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one event and return the records to emit, in order
    pub fn apply(
        &mut self,
        session: &mut ResearchSession,
        event: ResearchEvent,
        batch: &mut BatchScope,
    ) -> Vec<OutputEvent> {
        let channel = classify(&event);
        let id = event.id;

        match event.body {
            EventBody::Analyst(analyst) => {
                if !batch.seen_analysts.insert(analyst.name.clone()) {
                    tracing::debug!(analyst = %analyst.name, "Analyst already processed in this batch");
                    return Vec::new();
                }
                match session.upsert_analyst(analyst) {
                    Upsert::Unchanged => Vec::new(),
                    Upsert::Inserted | Upsert::Updated => vec![OutputEvent::on_channel(
                        channel,
                        OutputKind::Analysts,
                        json!({ "analysts": session.analysts }),
                    )
                    .with_id(id)],
                }
            }
            EventBody::Progress(progress) => {
                let payload = merge_progress(session, progress);
                vec![OutputEvent::on_channel(channel, OutputKind::Progress, payload).with_id(id)]
            }
            EventBody::Interview(update) => merge_interview(session, update, channel, id),
            EventBody::Search(search) => {
                record_search(session, &search);
                let payload = serde_json::to_value(&search).unwrap_or(Value::Null);
                vec![OutputEvent::on_channel(channel, OutputKind::Search, payload).with_id(id)]
            }
            EventBody::Section(section) => {
                if !session.set_section(&section.analyst_name, section.content_preview.clone()) {
                    return Vec::new();
                }
                vec![OutputEvent::on_channel(
                    channel,
                    OutputKind::Sections,
                    json!({
                        "analystName": section.analyst_name,
                        "contentPreview": section.content_preview,
                    }),
                )
                .with_id(id)]
            }
            EventBody::Error(error) => {
                tracing::warn!(error = %error.error, error_type = %error.error_type, "Upstream reported an error");
                session.error = Some(SessionError {
                    message: error.error.clone(),
                    kind: error.error_type.clone(),
                });
                vec![OutputEvent::on_channel(
                    channel,
                    OutputKind::Error,
                    json!({ "error": error.error, "errorType": error.error_type }),
                )
                .with_id(id)]
            }
            EventBody::Metadata(value) => {
                merge_metadata(session, &value);
                vec![OutputEvent::on_channel(channel, OutputKind::Metadata, value).with_id(id)]
            }
            EventBody::TextDelta(delta) => vec![self.text_event(delta)],
            EventBody::Heartbeat => Vec::new(),
        }
    }

    /// Resolve the stream id for a text fragment and build its record
    fn text_event(&mut self, text: TextDelta) -> OutputEvent {
        let stream_id = text
            .stream_id
            .or_else(|| match text.marker {
                TextMarker::Start => None,
                TextMarker::Delta | TextMarker::End => self.active_text_stream.clone(),
            })
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        match text.marker {
            TextMarker::Start => {
                self.active_text_stream = Some(stream_id.clone());
                OutputEvent::stream(OutputKind::TextStart, json!({}), stream_id)
            }
            TextMarker::Delta => {
                self.active_text_stream = Some(stream_id.clone());
                OutputEvent::stream(
                    OutputKind::TextDelta,
                    json!({ "delta": text.delta }),
                    stream_id,
                )
            }
            TextMarker::End => {
                self.active_text_stream = None;
                OutputEvent::stream(OutputKind::TextEnd, json!({}), stream_id)
            }
        }
    }
}

fn merge_progress(session: &mut ResearchSession, progress: ProgressUpdate) -> Value {
    if let Some(message) = progress.message {
        session.progress.message = message;
    }
    if let Some(current) = progress.current {
        session.progress.current = current;
    }
    if let Some(total) = progress.total {
        session.progress.total = total;
    }
    if let Some(phase) = progress.phase.as_deref() {
        apply_phase(session, phase);
    }

    json!({
        "message": session.progress.message,
        "phase": session.phase,
        "current": session.progress.current,
        "total": session.progress.total,
    })
}

fn merge_interview(
    session: &mut ResearchSession,
    update: InterviewUpdate,
    channel: Channel,
    id: Option<String>,
) -> Vec<OutputEvent> {
    let participant = update.analyst_name.clone();
    session.ensure_transcript(&participant);

    // Status hint goes out first, whatever happens to the transcript
    let mut out = vec![OutputEvent::on_channel(
        channel,
        OutputKind::InterviewStatus,
        serde_json::to_value(&update).unwrap_or(Value::Null),
    )
    .with_id(id)];

    // Blank previews carry no message, anything else is stored verbatim
    let content = match update.message_preview.as_deref() {
        Some(content) if !content.trim().is_empty() => content.to_string(),
        _ => return out,
    };

    let message = InterviewMessage {
        role: update.resolved_role(),
        content,
        turn_number: update.turn_number,
        timestamp: Utc::now(),
    };
    if session.append_message(&participant, message) {
        out.push(OutputEvent::persistent(
            OutputKind::Interviews,
            json!({
                "analystName": participant,
                "messages": session.transcript(&participant),
            }),
        ));
    } else {
        tracing::debug!(analyst = %participant, "Duplicate interview fragment suppressed");
    }
    out
}

fn record_search(session: &mut ResearchSession, search: &SearchUpdate) {
    if search.status != SearchStatus::Completed {
        return;
    }
    let Some(results_count) = search.results_count.filter(|count| *count > 0) else {
        return;
    };
    session.record_search(SearchResult {
        tool: search.tool.clone(),
        query: search.query.clone(),
        results_count,
        completed_at: Utc::now(),
    });
}

fn merge_metadata(session: &mut ResearchSession, value: &Value) {
    if let Some(topic) = value.get("topic").and_then(Value::as_str) {
        if !topic.trim().is_empty() {
            session.topic = topic.to_string();
        }
    }
    if let Some(phase) = value.get("phase").and_then(Value::as_str) {
        apply_phase(session, phase);
    }
}

fn apply_phase(session: &mut ResearchSession, raw: &str) {
    let next = match raw.parse::<ResearchPhase>() {
        Ok(next) => next,
        Err(e) => {
            tracing::warn!(error = %e, "Ignoring phase value");
            return;
        }
    };
    let previous = session.phase;
    match transition(&mut session.phase, next) {
        PhaseTransition::Unchanged => {}
        PhaseTransition::Advanced => {
            tracing::info!(from = %previous, to = %next, "Research phase advanced");
        }
        PhaseTransition::Regressed => {
            tracing::warn!(from = %previous, to = %next, "Research phase moved backward");
        }
        PhaseTransition::Rejected => {
            tracing::warn!(to = %next, "Phase change after completion ignored");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{detect_line, normalize};

    fn run(reconciler: &mut Reconciler, session: &mut ResearchSession, line: &str) -> Vec<OutputEvent> {
        let mut batch = BatchScope::new();
        normalize(detect_line(line).unwrap())
            .into_iter()
            .filter_map(Result::ok)
            .flat_map(|event| reconciler.apply(session, event, &mut batch))
            .collect()
    }

    #[test]
    fn test_batch_scenario() {
        let mut session = ResearchSession::new("ESG");
        let mut reconciler = Reconciler::new();
        let out = run(
            &mut reconciler,
            &mut session,
            r#"[{"type":"analyst","data":{"name":"A","role":"R","affiliation":"Aff","esgFocus":"F"}},{"type":"interview","data":{"analystName":"A","status":"questioning","messagePreview":"Q1"}}]"#,
        );

        assert_eq!(session.analysts.len(), 1);
        assert_eq!(session.analysts[0].name, "A");
        let transcript = session.transcript("A");
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript[0].role, crate::research::events::MessageRole::User);
        assert_eq!(transcript[0].content, "Q1");

        let kinds: Vec<_> = out.iter().map(|e| (e.kind, e.transient)).collect();
        assert_eq!(
            kinds,
            vec![
                (OutputKind::Analysts, false),
                (OutputKind::InterviewStatus, true),
                (OutputKind::Interviews, false),
            ]
        );
    }

    #[test]
    fn test_same_analyst_twice_keeps_second() {
        let mut session = ResearchSession::new("ESG");
        let mut reconciler = Reconciler::new();
        run(&mut reconciler, &mut session, r#"{"type":"data-analyst","data":{"name":"A","role":"first"}}"#);
        let out = run(&mut reconciler, &mut session, r#"{"type":"data-analyst","data":{"name":"A","role":"second"}}"#);

        assert_eq!(session.analysts.len(), 1);
        assert_eq!(session.analysts[0].role, "second");
        assert_eq!(out.len(), 1);

        // Identical redelivery changes nothing and emits nothing
        let out = run(&mut reconciler, &mut session, r#"{"type":"data-analyst","data":{"name":"A","role":"second"}}"#);
        assert!(out.is_empty());
    }

    #[test]
    fn test_analyst_seen_once_per_batch() {
        let mut session = ResearchSession::new("ESG");
        let mut reconciler = Reconciler::new();
        let out = run(
            &mut reconciler,
            &mut session,
            r#"[{"type":"analyst","data":{"name":"A","role":"first"}},{"type":"analyst","data":{"name":"A","role":"second"}}]"#,
        );
        assert_eq!(out.len(), 1);
        assert_eq!(session.analysts[0].role, "first");
    }

    #[test]
    fn test_batch_redelivery_is_idempotent() {
        let line = r#"[{"type":"analyst","data":{"name":"A"}},{"type":"analyst","data":{"name":"B"}},{"type":"interview","data":{"analystName":"A","status":"questioning","messagePreview":"Q1"}},{"type":"interview","data":{"analystName":"A","status":"answering","messagePreview":"A1"}}]"#;
        let mut session = ResearchSession::new("ESG");
        let mut reconciler = Reconciler::new();
        run(&mut reconciler, &mut session, line);
        run(&mut reconciler, &mut session, line);

        assert_eq!(session.analysts.len(), 2);
        assert_eq!(session.interview_message_count(), 2);
    }

    #[test]
    fn test_consecutive_identical_previews() {
        let mut session = ResearchSession::new("ESG");
        let mut reconciler = Reconciler::new();
        let line = r#"{"type":"data-interview","data":{"analystName":"A","status":"answering","messagePreview":"Same"}}"#;
        let first = run(&mut reconciler, &mut session, line);
        let second = run(&mut reconciler, &mut session, line);

        assert_eq!(session.transcript("A").len(), 1);
        assert_eq!(first.len(), 2);
        // Status hint still forwarded, no transcript update
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].kind, OutputKind::InterviewStatus);
    }

    #[test]
    fn test_preview_stored_verbatim() {
        let mut session = ResearchSession::new("ESG");
        let mut reconciler = Reconciler::new();
        let out = run(&mut reconciler, &mut session, r#"{"type":"data-interview","data":{"analystName":"A","status":"answering","messagePreview":"  Indented answer\n"}}"#);
        assert_eq!(session.transcript("A")[0].content, "  Indented answer\n");
        assert_eq!(out[1].payload["messages"][0]["content"], "  Indented answer\n");

        let out = run(&mut reconciler, &mut session, r#"{"type":"data-interview","data":{"analystName":"A","status":"answering","messagePreview":"   "}}"#);
        assert_eq!(out.len(), 1);
        assert_eq!(session.transcript("A").len(), 1);
    }

    #[test]
    fn test_search_persistence_rules() {
        let mut session = ResearchSession::new("ESG");
        let mut reconciler = Reconciler::new();
        run(&mut reconciler, &mut session, r#"{"type":"data-search","data":{"tool":"web","query":"q","status":"started"}}"#);
        assert!(session.searches.is_empty());

        run(&mut reconciler, &mut session, r#"{"type":"data-search","data":{"tool":"web","query":"q","status":"completed","resultsCount":0}}"#);
        run(&mut reconciler, &mut session, r#"{"type":"data-search","data":{"tool":"web","query":"q","status":"error","error":"boom"}}"#);
        assert!(session.searches.is_empty());

        let out = run(&mut reconciler, &mut session, r#"{"type":"data-search","data":{"tool":"web","query":"q","status":"completed","resultsCount":5}}"#);
        assert_eq!(session.searches.len(), 1);
        assert_eq!(session.searches[0].results_count, 5);
        assert!(out[0].transient);
    }

    #[test]
    fn test_progress_and_phase() {
        let mut session = ResearchSession::new("ESG");
        let mut reconciler = Reconciler::new();
        run(&mut reconciler, &mut session, r#"{"type":"data-progress","data":{"message":"Building panel","phase":"analysts","current":1,"total":4}}"#);
        assert_eq!(session.phase, ResearchPhase::Analysts);
        assert_eq!(session.progress.total, 4);

        let out = run(&mut reconciler, &mut session, r#"{"type":"data-progress","data":{"current":2}}"#);
        assert_eq!(session.phase, ResearchPhase::Analysts);
        assert_eq!(session.progress.message, "Building panel");
        assert_eq!(out[0].payload["current"], 2);
        assert_eq!(out[0].payload["total"], 4);
    }

    #[test]
    fn test_error_does_not_move_phase() {
        let mut session = ResearchSession::new("ESG");
        session.phase = ResearchPhase::Interviews;
        let mut reconciler = Reconciler::new();
        let out = run(&mut reconciler, &mut session, r#"{"type":"data-error","data":{"error":"search quota","errorType":"tool"}}"#);

        assert_eq!(session.phase, ResearchPhase::Interviews);
        assert_eq!(session.error.as_ref().unwrap().kind, "tool");
        assert_eq!(out[0].kind, OutputKind::Error);
        assert!(out[0].transient);
    }

    #[test]
    fn test_metadata_sets_topic_and_phase() {
        let mut session = ResearchSession::new("");
        let mut reconciler = Reconciler::new();
        let out = run(&mut reconciler, &mut session, r#"{"type":"data-metadata","data":{"topic":"Water risk","phase":"topic_extraction"}}"#);
        assert_eq!(session.topic, "Water risk");
        assert_eq!(session.phase, ResearchPhase::TopicExtraction);
        assert!(out[0].transient);
    }

    #[test]
    fn test_section_overwrites() {
        let mut session = ResearchSession::new("ESG");
        let mut reconciler = Reconciler::new();
        run(&mut reconciler, &mut session, r#"{"type":"data-section","data":{"analystName":"A","contentPreview":"v1"}}"#);
        let out = run(&mut reconciler, &mut session, r#"{"type":"data-section","data":{"analystName":"A","contentPreview":"v2"}}"#);
        assert_eq!(session.sections["A"], "v2");
        assert_eq!(out[0].kind, OutputKind::Sections);
        assert!(!out[0].transient);
    }

    #[test]
    fn test_text_stream_ids() {
        let mut session = ResearchSession::new("ESG");
        let mut reconciler = Reconciler::new();
        let first = run(&mut reconciler, &mut session, r#""0:Hel""#);
        let second = run(&mut reconciler, &mut session, r#""0:lo""#);
        assert_eq!(first[0].kind, OutputKind::TextDelta);
        assert_eq!(first[0].payload["delta"], "Hel");
        assert!(first[0].id.is_some());
        assert_eq!(first[0].id, second[0].id);

        let start = run(&mut reconciler, &mut session, r#"{"type":"text-start","id":"m-2"}"#);
        let delta = run(&mut reconciler, &mut session, r#"{"type":"text-delta","delta":"x"}"#);
        let end = run(&mut reconciler, &mut session, r#"{"type":"text-end"}"#);
        assert_eq!(start[0].id.as_deref(), Some("m-2"));
        assert_eq!(delta[0].id.as_deref(), Some("m-2"));
        assert_eq!(end[0].kind, OutputKind::TextEnd);
        assert_eq!(end[0].id.as_deref(), Some("m-2"));
        assert!(session.analysts.is_empty());
    }

    #[test]
    fn test_heartbeat_dropped() {
        let mut session = ResearchSession::new("ESG");
        let mut reconciler = Reconciler::new();
        assert!(run(&mut reconciler, &mut session, r#"{"type":"data-heartbeat"}"#).is_empty());
    }
}
