//! Wire types for Gemini's NDJSON stream.
//!
//! Record types: `init`, `message`, `tool_use`, `tool_result`, `error`,
//! `result`. Fields are snake_case and most are only present on some types,
//! so this is a flat struct rather than a tagged enum; [`super::decode_line`]
//! maps it onto the closed record model.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct GeminiStreamEvent {
    #[serde(rename = "type")]
    pub event_type: String,

    #[serde(default)]
    pub timestamp: Option<String>,

    /// Present on `init`.
    #[serde(default)]
    pub session_id: Option<String>,

    #[serde(default)]
    pub model: Option<String>,

    /// `assistant` or `user` on `message` records.
    #[serde(default)]
    pub role: Option<String>,

    #[serde(default)]
    pub content: Option<String>,

    /// True for streaming fragments of a message.
    #[serde(default)]
    pub delta: Option<bool>,

    #[serde(default)]
    pub tool_name: Option<String>,

    #[serde(default)]
    pub tool_id: Option<String>,

    #[serde(default)]
    pub parameters: Option<serde_json::Value>,

    /// `success` or `error` on `tool_result` and `result`.
    #[serde(default)]
    pub status: Option<String>,

    #[serde(default)]
    pub output: Option<String>,

    #[serde(default)]
    pub error: Option<serde_json::Value>,

    #[serde(default)]
    pub message: Option<String>,

    #[serde(default)]
    pub stats: Option<GeminiStats>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct GeminiStats {
    pub total_tokens: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub duration_ms: u64,
    pub tool_calls: u64,
}
