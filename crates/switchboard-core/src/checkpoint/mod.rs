//! Immutable transcript snapshots and forking.
//!
//! Checkpoints are never mutated after creation. Restoring one always
//! produces a brand-new session; the source timeline is left alone.

mod replay;
mod store;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::conversation::Turn;
use crate::engines::EngineKind;
use crate::session::SessionId;

pub use replay::render_replay;
pub use store::CheckpointStore;

/// Unique identifier for a checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckpointId(pub String);

impl CheckpointId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CheckpointId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CheckpointId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A deep copy of a session's transcript at one moment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub id: CheckpointId,
    pub session_id: SessionId,
    pub engine_kind: EngineKind,
    pub project_root: PathBuf,
    /// Index of the last turn included; `None` for an empty transcript.
    pub turn_index_snapshot: Option<u64>,
    pub transcript_snapshot: Vec<Turn>,
    pub created_at: DateTime<Utc>,
    pub label: String,
}
