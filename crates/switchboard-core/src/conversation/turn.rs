//! Turn types.
//!
//! A turn is one atomic entry in a session transcript: a message, a tool
//! invocation, a tool result, or metadata the core records about the run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::session::SessionStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    ToolResult,
}

/// Token counts reported by an engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens
            .saturating_add(self.output_tokens)
            .saturating_add(self.cache_read_tokens)
            .saturating_add(self.cache_creation_tokens)
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    fn accumulate(&mut self, other: &TokenUsage) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
        self.cache_read_tokens = self.cache_read_tokens.saturating_add(other.cache_read_tokens);
        self.cache_creation_tokens = self
            .cache_creation_tokens
            .saturating_add(other.cache_creation_tokens);
    }
}

/// Running per-session totals. Only ever grows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UsageTotals {
    pub tokens: TokenUsage,
    pub cost_usd: f64,
    pub runs: u32,
}

impl UsageTotals {
    /// Fold in the totals of one closed run.
    pub fn absorb(&mut self, usage: &TokenUsage, cost_usd: Option<f64>) {
        self.tokens.accumulate(usage);
        if let Some(cost) = cost_usd.filter(|c| c.is_finite() && *c > 0.0) {
            self.cost_usd += cost;
        }
        self.runs = self.runs.saturating_add(1);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    pub tool_name: String,
    pub arguments: Map<String, Value>,
    pub invocation_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub invocation_id: String,
    pub output: String,
    pub is_error: bool,
}

/// Recoverable anomalies recorded in the transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DiagnosticKind {
    MalformedStreamRecord,
    OrphanToolResult,
    SimulationParseError,
    EngineError,
    ProcessTerminatedUnexpectedly,
    ProcessSpawnFailure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TurnMetadata {
    #[serde(rename_all = "camelCase")]
    SessionStarted {
        engine_session_id: Option<String>,
        model: Option<String>,
    },
    Reasoning {
        text: String,
    },
    #[serde(rename_all = "camelCase")]
    StreamClosed {
        is_error: bool,
        summary: Option<String>,
        usage: TokenUsage,
        cost_usd: Option<f64>,
    },
    Diagnostic {
        diagnostic: DiagnosticKind,
        detail: String,
        raw: Option<String>,
    },
    Terminated {
        status: SessionStatus,
        reason: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum TurnContent {
    Text(String),
    ToolInvocation(ToolInvocation),
    ToolResult(ToolResult),
    Metadata(TurnMetadata),
}

impl TurnContent {
    pub fn diagnostic(
        kind: DiagnosticKind,
        detail: impl Into<String>,
        raw: Option<String>,
    ) -> Self {
        TurnContent::Metadata(TurnMetadata::Diagnostic {
            diagnostic: kind,
            detail: detail.into(),
            raw,
        })
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            TurnContent::Text(text) => Some(text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    pub index: u64,
    pub role: Role,
    pub content: TurnContent,
    pub timestamp: DateTime<Utc>,
    pub token_usage: Option<TokenUsage>,
}

impl Turn {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.content,
            TurnContent::Metadata(TurnMetadata::StreamClosed { .. })
        )
    }

    pub fn diagnostic_kind(&self) -> Option<DiagnosticKind> {
        match &self.content {
            TurnContent::Metadata(TurnMetadata::Diagnostic { diagnostic, .. }) => Some(*diagnostic),
            _ => None,
        }
    }
}
