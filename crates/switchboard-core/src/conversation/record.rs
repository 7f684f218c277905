//! Dialect-neutral stream records.
//!
//! Every engine dialect decodes into this closed set. The parser matches on
//! it exhaustively, so a new record or block kind is a compile error until
//! the state machine handles it.

use serde_json::{Map, Value};

use super::turn::TokenUsage;

#[derive(Debug, Clone, PartialEq)]
pub enum StreamRecord {
    /// Session bootstrap (`system/init` and friends).
    System {
        subtype: Option<String>,
        engine_session_id: Option<String>,
        model: Option<String>,
    },
    Assistant {
        message_id: Option<String>,
        blocks: Vec<ContentBlock>,
        /// The record carries an explicit end-of-message marker.
        end_of_message: bool,
        usage: Option<TokenUsage>,
    },
    User {
        blocks: Vec<ContentBlock>,
    },
    /// Terminal record for one run, with aggregate totals.
    Result {
        is_error: bool,
        summary: Option<String>,
        usage: TokenUsage,
        cost_usd: Option<f64>,
    },
    /// The engine reported an error inline.
    EngineError {
        message: String,
    },
    /// Well-formed record of a type the parser has no use for.
    Ignored {
        record_type: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    Text(String),
    Thinking(String),
    ToolUse {
        id: String,
        name: String,
        input: Map<String, Value>,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        is_error: bool,
    },
}

/// A line that could not be decoded as a record of the engine's dialect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError {
    pub reason: String,
}

impl DecodeError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.reason)
    }
}

/// Flatten a tool result payload (string, array of blocks, or anything else) to text.
pub(crate) fn flatten_result_content(content: &Value) -> String {
    match content {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item.get("text").and_then(Value::as_str) {
                Some(text) => text.to_string(),
                None => flatten_result_content(item),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}

/// Coerce tool input into an argument map; non-object input lands under `"input"`.
pub(crate) fn into_arguments(input: Value) -> Map<String, Value> {
    match input {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("input".to_string(), other);
            map
        }
    }
}
