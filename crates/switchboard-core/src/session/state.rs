//! Per-session state.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::checkpoint::CheckpointId;
use crate::conversation::{Transcript, UsageTotals};
use crate::engines::EngineKind;

/// Unique identifier for a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Initializing,
    Running,
    AwaitingInput,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    /// The last run ended (successfully or not) and no process is live.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Cancelled
        )
    }
}

/// A conversation with one engine in one project.
///
/// The live process is not stored here; it sits in the orchestrator's slot
/// for this id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    pub engine_kind: EngineKind,
    pub project_root: PathBuf,
    pub created_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub transcript: Transcript,
    /// Checkpoint this session was forked from.
    pub ancestor: Option<CheckpointId>,
    /// The engine's own conversation id, used to resume follow-up prompts.
    pub engine_session_id: Option<String>,
    pub usage: UsageTotals,
    /// Prepended to the next prompt, then cleared.
    pub pending_context: Option<String>,
}

impl Session {
    pub fn new(id: SessionId, engine_kind: EngineKind, project_root: PathBuf) -> Self {
        Self {
            id,
            engine_kind,
            project_root,
            created_at: Utc::now(),
            status: SessionStatus::Initializing,
            transcript: Transcript::new(),
            ancestor: None,
            engine_session_id: None,
            usage: UsageTotals::default(),
            pending_context: None,
        }
    }

    /// A session seeded from a checkpoint's transcript copy.
    pub fn forked(
        engine_kind: EngineKind,
        project_root: PathBuf,
        transcript: Transcript,
        ancestor: CheckpointId,
        replay: Option<String>,
    ) -> Self {
        Self {
            status: SessionStatus::AwaitingInput,
            transcript,
            ancestor: Some(ancestor),
            pending_context: replay,
            ..Self::new(SessionId::new(), engine_kind, project_root)
        }
    }

    pub fn push_pending_context(&mut self, text: &str) {
        match &mut self.pending_context {
            Some(existing) => {
                existing.push_str("\n\n");
                existing.push_str(text);
            }
            None => self.pending_context = Some(text.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod session_id {
        use super::*;

        #[test]
        fn new_generates_unique_ids() {
            assert_ne!(SessionId::new(), SessionId::new());
        }

        #[test]
        fn serializes_as_plain_string() {
            let id = SessionId::from("abc");
            assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");
        }
    }

    mod session {
        use super::*;

        #[test]
        fn new_session_starts_initializing() {
            let session = Session::new(SessionId::new(), EngineKind::Claude, PathBuf::from("/p"));
            assert_eq!(session.status, SessionStatus::Initializing);
            assert!(session.transcript.is_empty());
            assert!(session.ancestor.is_none());
        }

        #[test]
        fn forked_session_gets_fresh_id_and_ancestor() {
            let ancestor = CheckpointId::from("cp-1");
            let fork = Session::forked(
                EngineKind::Gemini,
                PathBuf::from("/p"),
                Transcript::new(),
                ancestor.clone(),
                Some("replay".to_string()),
            );
            assert_eq!(fork.ancestor, Some(ancestor));
            assert_eq!(fork.status, SessionStatus::AwaitingInput);
            assert_eq!(fork.pending_context.as_deref(), Some("replay"));
        }

        #[test]
        fn pending_context_accumulates() {
            let mut session =
                Session::new(SessionId::new(), EngineKind::Claude, PathBuf::from("/p"));
            session.push_pending_context("one");
            session.push_pending_context("two");
            assert_eq!(session.pending_context.as_deref(), Some("one\n\ntwo"));
        }

        #[test]
        fn terminal_statuses() {
            assert!(SessionStatus::Cancelled.is_terminal());
            assert!(SessionStatus::Failed.is_terminal());
            assert!(!SessionStatus::Running.is_terminal());
            assert!(!SessionStatus::AwaitingInput.is_terminal());
        }
    }
}
