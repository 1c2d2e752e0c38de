//! # Format Detector
//!
//! Classifies one protocol line into the upstream wire shape it uses.
//!
//! ## Precedence
//!
//! ```text
//! JSON array                          → LegacyBatch
//! object, type "data-<kind>"          → Discrete
//! string "<digit>:<payload>"          → RawToken (0 text, 2 data part, 3 error)
//! object, type text-start|delta|end   → TextPassthrough
//! object, type updates|messages       → Reserved (not translated)
//! anything else                       → LineError::Unrecognized
//! ```

use crate::error::LineError;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

/// Type prefix marking a discrete typed event
pub const DISCRETE_PREFIX: &str = "data-";

/// Textual marker that may precede a JSON payload on a line
const LINE_MARKER: &str = "data:";

static RAW_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^(\d):(.*)$").expect("static regex"));

static DATA_PART: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^([A-Za-z0-9_-]*)(\[.*\])$").expect("static regex"));

/// Parsed raw token protocol line
#[derive(Debug, Clone, PartialEq)]
pub enum RawToken {
    /// `0:` streamed text
    Text(String),
    /// `2:<name>[...]`, each item is the data of one `<name>` event.
    /// An empty name means the items are `{type, data}` batch elements.
    Data { name: String, items: Vec<Value> },
    /// `3:` error payload
    Error(Value),
}

/// Wire shape of one line
#[derive(Debug, Clone, PartialEq)]
pub enum WireShape {
    /// `[ {type, data, metadata?}, ... ]`
    LegacyBatch(Vec<Value>),
    /// `{ "type": "data-<kind>", ... }` with the prefix stripped into `kind`
    Discrete { kind: String, object: Map<String, Value> },
    RawToken(RawToken),
    /// `{ "type": "text-start"|"text-delta"|"text-end", ... }`
    TextPassthrough(Map<String, Value>),
    /// `updates` / `messages` objects, acknowledged but not translated
    Reserved(String),
    /// Blank lines, SSE control fields and the `[DONE]` sentinel
    Control,
}

/// Detect the shape of one framed line
pub fn detect_line(line: &str) -> Result<WireShape, LineError> {
    // Only leading whitespace goes; a bare text token owns its trailing spaces
    let line = line.trim_end_matches(['\r', '\n']).trim_start();
    if line.trim_end().is_empty() || line.starts_with(':') {
        return Ok(WireShape::Control);
    }
    if ["event:", "id:", "retry:"]
        .iter()
        .any(|field| line.starts_with(field))
    {
        return Ok(WireShape::Control);
    }

    let payload = match line.strip_prefix(LINE_MARKER) {
        Some(rest) => rest.trim_start(),
        None => line,
    };
    let bare = payload.trim_end();
    if bare.is_empty() || bare == "[DONE]" {
        return Ok(WireShape::Control);
    }

    match serde_json::from_str::<Value>(payload) {
        Ok(value) => detect_value(value),
        // Unquoted raw tokens are not valid JSON
        Err(e) => match RAW_TOKEN.captures(payload) {
            Some(_) => parse_raw_token(payload).map(WireShape::RawToken),
            None => Err(LineError::InvalidJson(e)),
        },
    }
}

/// Detect the shape of an already parsed value
pub fn detect_value(value: Value) -> Result<WireShape, LineError> {
    match value {
        Value::Array(items) => Ok(WireShape::LegacyBatch(items)),
        Value::Object(object) => {
            let type_tag = object
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();

            if let Some(kind) = type_tag.strip_prefix(DISCRETE_PREFIX) {
                return Ok(WireShape::Discrete {
                    kind: kind.to_string(),
                    object,
                });
            }
            match type_tag.as_str() {
                "text-start" | "text-delta" | "text-end" => Ok(WireShape::TextPassthrough(object)),
                "updates" | "messages" => Ok(WireShape::Reserved(type_tag)),
                "" => Err(LineError::Unrecognized("object without type".to_string())),
                other => Err(LineError::Unrecognized(format!("object type '{}'", other))),
            }
        }
        Value::String(text) if RAW_TOKEN.is_match(&text) => {
            parse_raw_token(&text).map(WireShape::RawToken)
        }
        other => Err(LineError::Unrecognized(preview(&other.to_string()))),
    }
}

/// Parse a `<digit>:<payload>` token
pub fn parse_raw_token(token: &str) -> Result<RawToken, LineError> {
    let caps = RAW_TOKEN
        .captures(token)
        .ok_or_else(|| LineError::InvalidToken(preview(token)))?;
    let payload = caps.get(2).map_or("", |m| m.as_str());

    match caps.get(1).map_or("", |m| m.as_str()) {
        "0" => {
            // Text is normally a JSON string literal, but bare text is accepted
            let text = match serde_json::from_str::<Value>(payload) {
                Ok(Value::String(text)) => text,
                _ => payload.to_string(),
            };
            Ok(RawToken::Text(text))
        }
        "2" => {
            let caps = DATA_PART
                .captures(payload)
                .ok_or_else(|| LineError::InvalidToken(preview(token)))?;
            let name = caps.get(1).map_or("", |m| m.as_str()).to_string();
            let body = caps.get(2).map_or("[]", |m| m.as_str());
            match serde_json::from_str::<Value>(body)? {
                Value::Array(items) => Ok(RawToken::Data { name, items }),
                _ => Err(LineError::InvalidToken(preview(token))),
            }
        }
        "3" => {
            let value = serde_json::from_str::<Value>(payload)
                .unwrap_or_else(|_| Value::String(payload.to_string()));
            Ok(RawToken::Error(value))
        }
        digit => Err(LineError::InvalidToken(format!(
            "unsupported token prefix '{}'",
            digit
        ))),
    }
}

/// Truncate long payloads for log lines
pub fn preview(text: &str) -> String {
    text.chars().take(200).collect()
}
