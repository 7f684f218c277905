//! Outbound per-session events.

use serde::Serialize;

use super::state::{SessionId, SessionStatus};
use crate::conversation::{DiagnosticKind, Turn};
use crate::tools::CallState;

/// Every event carries its session id and a per-session sequence number.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEvent {
    pub session_id: SessionId,
    pub seq: u64,
    #[serde(flatten)]
    pub kind: SessionEventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SessionEventKind {
    TurnAppended {
        turn: Turn,
    },
    #[serde(rename_all = "camelCase")]
    ToolCall {
        invocation_id: String,
        tool_name: String,
        state: CallState,
    },
    Status {
        status: SessionStatus,
    },
    Diagnostic {
        diagnostic: DiagnosticKind,
        detail: String,
    },
    /// Exactly one per engine process.
    Terminated {
        status: SessionStatus,
        reason: Option<String>,
    },
}

impl SessionEventKind {
    pub fn is_terminated(&self) -> bool {
        matches!(self, SessionEventKind::Terminated { .. })
    }
}
