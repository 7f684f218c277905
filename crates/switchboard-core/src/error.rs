//! Error taxonomy for the execution core.
//!
//! Only engine resolution and spawn failures abort a session outright.
//! Streaming and tool anomalies are recorded as diagnostic turns instead
//! (see [`crate::conversation::DiagnosticKind`]); the variants here are what
//! callers of a command can get back.

use std::io;

use thiserror::Error;

use crate::checkpoint::CheckpointId;
use crate::engines::EngineKind;
use crate::session::SessionId;
use crate::tools::CallState;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{engine} binary not found: {detail}")]
    EngineNotFound { engine: EngineKind, detail: String },

    #[error("failed to spawn {engine} process: {source}")]
    ProcessSpawnFailure {
        engine: EngineKind,
        #[source]
        source: io::Error,
    },

    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("checkpoint not found: {0}")]
    CheckpointNotFound(CheckpointId),

    #[error("no process is running for session {0}")]
    NotRunning(SessionId),

    #[error("session {0} still has a live process")]
    SessionBusy(SessionId),

    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("tool {tool} is not available on {engine}")]
    ToolUnavailable { tool: String, engine: EngineKind },

    #[error("no delimited result for {tool_name} call {invocation_id} in engine reply")]
    SimulationParse {
        tool_name: String,
        invocation_id: String,
    },

    #[error("run for session {session_id} ended without a reply: {reason}")]
    RunInterrupted { session_id: SessionId, reason: String },

    #[error("invalid tool call transition {from:?} -> {to:?}")]
    InvalidTransition { from: CallState, to: CallState },

    #[error("invalid engine command: {0}")]
    Command(String),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    /// Whether this error ends a session start instead of being recorded on it.
    pub fn is_fatal_to_start(&self) -> bool {
        matches!(
            self,
            CoreError::EngineNotFound { .. } | CoreError::ProcessSpawnFailure { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_failure_surfaces_os_error() {
        let err = CoreError::ProcessSpawnFailure {
            engine: EngineKind::Claude,
            source: io::Error::new(io::ErrorKind::PermissionDenied, "permission denied"),
        };
        let message = err.to_string();
        assert!(message.contains("claude"));
        assert!(message.contains("permission denied"));
        assert!(err.is_fatal_to_start());
    }

    #[test]
    fn session_not_found_is_not_fatal_to_start() {
        let err = CoreError::SessionNotFound(SessionId::from("abc"));
        assert_eq!(err.to_string(), "session not found: abc");
        assert!(!err.is_fatal_to_start());
    }
}
