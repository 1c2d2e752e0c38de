//! # Event Normalizer
//!
//! Maps every detected wire shape onto [`ResearchEvent`]. Legacy batch
//! elements, discrete typed events and `2:` data parts all funnel through
//! [`canonical_event`], so each event kind has exactly one decoding path.

use super::detect::{preview, RawToken, WireShape, DISCRETE_PREFIX};
use crate::error::LineError;
use crate::research::events::{
    EventBody, EventKind, ResearchEvent, TextDelta, TextMarker,
};
use serde_json::{Map, Value};

/// Envelope fields that travel next to `data`
#[derive(Debug, Clone, Default)]
struct Envelope {
    id: Option<String>,
    transient: Option<bool>,
    metadata: Option<Map<String, Value>>,
}

impl Envelope {
    fn from_object(object: &Map<String, Value>) -> Self {
        let metadata = object.get("metadata").and_then(Value::as_object).cloned();
        let lookup = |key: &str| {
            object
                .get(key)
                .or_else(|| metadata.as_ref().and_then(|m| m.get(key)))
                .cloned()
        };
        Self {
            id: lookup("id").and_then(|v| v.as_str().map(str::to_string)),
            transient: lookup("transient").and_then(|v| v.as_bool()),
            metadata,
        }
    }
}

/// Normalize one detected line into zero or more events.
///
/// Failures are reported per element so one bad batch element never hides
/// the rest of the batch. Unknown kinds are dropped without an error.
pub fn normalize(shape: WireShape) -> Vec<Result<ResearchEvent, LineError>> {
    match shape {
        WireShape::LegacyBatch(items) => normalize_batch(items),
        WireShape::Discrete { kind, mut object } => {
            let data = object.remove("data").unwrap_or(Value::Null);
            let envelope = Envelope::from_object(&object);
            canonical_event(&kind, data, envelope).into_iter().collect()
        }
        WireShape::RawToken(token) => normalize_token(token),
        WireShape::TextPassthrough(object) => vec![Ok(text_event(&object))],
        WireShape::Reserved(tag) => {
            tracing::debug!(tag = %tag, "Skipping reserved upstream object");
            Vec::new()
        }
        WireShape::Control => Vec::new(),
    }
}

fn normalize_batch(items: Vec<Value>) -> Vec<Result<ResearchEvent, LineError>> {
    items
        .into_iter()
        .filter_map(|item| {
            let mut element = match item {
                Value::Object(element) => element,
                other => {
                    return Some(Err(LineError::Unrecognized(format!(
                        "batch element {}",
                        preview(&other.to_string())
                    ))))
                }
            };
            let tag = element
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let data = element.remove("data").unwrap_or(Value::Null);
            let envelope = Envelope::from_object(&element);
            let tag = tag.strip_prefix(DISCRETE_PREFIX).unwrap_or(&tag);
            canonical_event(tag, data, envelope)
        })
        .collect()
}

fn normalize_token(token: RawToken) -> Vec<Result<ResearchEvent, LineError>> {
    match token {
        RawToken::Text(text) => vec![Ok(ResearchEvent::new(EventBody::TextDelta(
            TextDelta::delta(text),
        )))],
        RawToken::Data { name, items } if name.is_empty() => normalize_batch(items),
        RawToken::Data { name, items } => {
            let tag = name.strip_prefix(DISCRETE_PREFIX).unwrap_or(&name);
            items
                .into_iter()
                .filter_map(|data| canonical_event(tag, data, Envelope::default()))
                .collect()
        }
        RawToken::Error(value) => {
            let data = match value {
                Value::String(message) => serde_json::json!({
                    "error": message,
                    "errorType": "stream",
                }),
                Value::Object(mut object) => {
                    object
                        .entry("errorType")
                        .or_insert_with(|| Value::String("stream".to_string()));
                    Value::Object(object)
                }
                other => serde_json::json!({
                    "error": other.to_string(),
                    "errorType": "stream",
                }),
            };
            canonical_event("error", data, Envelope::default())
                .into_iter()
                .collect()
        }
    }
}

/// The single decoding path from `(kind tag, data)` to a canonical event
fn canonical_event(
    tag: &str,
    data: Value,
    envelope: Envelope,
) -> Option<Result<ResearchEvent, LineError>> {
    let Some(kind) = EventKind::from_tag(tag) else {
        tracing::debug!(tag = %tag, "Ignoring unknown event kind");
        return None;
    };

    let body = match decode_body(kind, data, envelope.metadata.as_ref()) {
        Ok(body) => body,
        Err(source) => {
            return Some(Err(LineError::InvalidPayload {
                kind: kind.to_string(),
                source,
            }))
        }
    };

    Some(Ok(ResearchEvent::new(body)
        .with_id(envelope.id)
        .with_transient(envelope.transient)))
}

fn decode_body(
    kind: EventKind,
    data: Value,
    metadata: Option<&Map<String, Value>>,
) -> Result<EventBody, serde_json::Error> {
    Ok(match kind {
        EventKind::Analyst => EventBody::Analyst(serde_json::from_value(data)?),
        EventKind::Progress => EventBody::Progress(serde_json::from_value(data)?),
        EventKind::Interview => {
            EventBody::Interview(serde_json::from_value(with_envelope_role(data, metadata))?)
        }
        EventKind::Search => EventBody::Search(serde_json::from_value(data)?),
        EventKind::Section => EventBody::Section(serde_json::from_value(data)?),
        EventKind::Error => EventBody::Error(serde_json::from_value(data)?),
        EventKind::Metadata => EventBody::Metadata(data),
        EventKind::TextDelta => {
            let object = data.as_object().cloned().unwrap_or_default();
            return Ok(text_event(&object).body);
        }
        EventKind::Heartbeat => EventBody::Heartbeat,
    })
}

/// Batch elements carry the speaker role next to `data`; fold it in so both
/// shapes decode to the same interview payload.
fn with_envelope_role(mut data: Value, metadata: Option<&Map<String, Value>>) -> Value {
    let Some(role) = metadata.and_then(|m| m.get("role")).cloned() else {
        return data;
    };
    if let Value::Object(object) = &mut data {
        let slot = object
            .entry("metadata")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(inner) = slot {
            inner.entry("role").or_insert(role);
        }
    }
    data
}

fn text_event(object: &Map<String, Value>) -> ResearchEvent {
    let marker = match object.get("type").and_then(Value::as_str) {
        Some("text-start") => TextMarker::Start,
        Some("text-end") => TextMarker::End,
        _ => TextMarker::Delta,
    };
    let stream_id = object
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string);
    let delta = object
        .get("delta")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    ResearchEvent::new(EventBody::TextDelta(TextDelta {
        marker,
        stream_id: stream_id.clone(),
        delta,
    }))
    .with_id(stream_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::research::events::{Analyst, InterviewStatus, MessageRole};
    use crate::wire::detect::detect_line;
    use serde_json::json;

    fn events(line: &str) -> Vec<ResearchEvent> {
        normalize(detect_line(line).unwrap())
            .into_iter()
            .map(|r| r.unwrap())
            .collect()
    }

    #[test]
    fn test_raw_text_token() {
        let out = events(r#""0:Hello""#);
        assert_eq!(out.len(), 1);
        match &out[0].body {
            EventBody::TextDelta(delta) => {
                assert_eq!(delta.delta, "Hello");
                assert_eq!(delta.marker, TextMarker::Delta);
            }
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[test]
    fn test_split_text_run_keeps_spaces() {
        let joined: String = ["0:Hello ", "0:world", "data: 0: again "]
            .iter()
            .flat_map(|line| events(line))
            .map(|event| match event.body {
                EventBody::TextDelta(delta) => delta.delta,
                other => panic!("unexpected body {:?}", other),
            })
            .collect();
        assert_eq!(joined, "Hello world again ");
    }

    #[test]
    fn test_prefixed_data_part_name() {
        let out = events(r#"2:data-analyst[{"name":"A"},{"name":"B"}]"#);
        assert_eq!(out.len(), 2);
        assert!(matches!(&out[1].body, EventBody::Analyst(a) if a.name == "B"));
    }

    #[test]
    fn test_named_data_part_analyst() {
        let out = events(
            r#"2:analyst[{"name":"Dr. Chen","role":"ESG Lead","affiliation":"X","esgFocus":"Y"}]"#,
        );
        assert_eq!(
            out[0].body,
            EventBody::Analyst(Analyst {
                name: "Dr. Chen".to_string(),
                role: "ESG Lead".to_string(),
                affiliation: "X".to_string(),
                esg_focus: "Y".to_string(),
                esg_categories: None,
            })
        );
    }

    #[test]
    fn test_batch_and_discrete_normalize_identically() {
        let batch = events(
            r#"[{"type":"interview","data":{"analystName":"A","status":"answering","turnNumber":2,"messagePreview":"Yes"},"metadata":{"role":"assistant"}}]"#,
        );
        let discrete = events(
            r#"{"type":"data-interview","data":{"analystName":"A","status":"answering","turnNumber":2,"messagePreview":"Yes","metadata":{"role":"assistant"}}}"#,
        );
        assert_eq!(batch[0].body, discrete[0].body);

        let EventBody::Interview(update) = &batch[0].body else {
            panic!("expected interview");
        };
        assert_eq!(update.status, InterviewStatus::Answering);
        assert_eq!(update.resolved_role(), MessageRole::Assistant);
    }

    #[test]
    fn test_unknown_batch_element_does_not_halt() {
        let results = normalize(
            detect_line(
                r#"[{"type":"frobnicate"},{"type":"section","data":{"analystName":"A","contentPreview":"Intro"}}]"#,
            )
            .unwrap(),
        );
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0].as_ref().unwrap().body, EventBody::Section(_)));
    }

    #[test]
    fn test_invalid_payload_reported_per_element() {
        let results = normalize(
            detect_line(
                r#"[{"type":"analyst","data":{"role":"no name"}},{"type":"heartbeat"}]"#,
            )
            .unwrap(),
        );
        assert_eq!(results.len(), 2);
        assert!(matches!(
            results[0],
            Err(LineError::InvalidPayload { ref kind, .. }) if kind == "analyst"
        ));
        assert_eq!(results[1].as_ref().unwrap().body, EventBody::Heartbeat);
    }

    #[test]
    fn test_envelope_id_and_transient() {
        let out = events(
            r#"{"type":"data-progress","id":"p-1","transient":true,"data":{"message":"Working","phase":"analysts"}}"#,
        );
        assert_eq!(out[0].id.as_deref(), Some("p-1"));
        assert_eq!(out[0].transient, Some(true));

        let out = events(
            r#"[{"type":"progress","data":{"message":"Working"},"metadata":{"transient":true}}]"#,
        );
        assert_eq!(out[0].transient, Some(true));
    }

    #[test]
    fn test_error_token_defaults_type() {
        let out = events(r#"3:"upstream overloaded""#);
        match &out[0].body {
            EventBody::Error(err) => {
                assert_eq!(err.error, "upstream overloaded");
                assert_eq!(err.error_type, "stream");
            }
            other => panic!("unexpected body {:?}", other),
        }

        let out = events(r#"3:{"error":"quota","errorType":"rate_limit"}"#);
        let EventBody::Error(err) = &out[0].body else {
            panic!("expected error");
        };
        assert_eq!(err.error_type, "rate_limit");
    }

    #[test]
    fn test_text_passthrough() {
        let out = events(r#"{"type":"text-start","id":"msg-1"}"#);
        assert_eq!(out[0].id.as_deref(), Some("msg-1"));
        match &out[0].body {
            EventBody::TextDelta(delta) => assert_eq!(delta.marker, TextMarker::Start),
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[test]
    fn test_unnamed_data_part_is_batch() {
        let out = events(r#"2:[{"type":"metadata","data":{"topic":"Water risk"}}]"#);
        assert_eq!(out[0].body, EventBody::Metadata(json!({"topic": "Water risk"})));
    }

    #[test]
    fn test_reserved_objects_produce_nothing() {
        assert!(normalize(detect_line(r#"{"type":"messages","data":[]}"#).unwrap()).is_empty());
    }
}
