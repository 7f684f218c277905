//! Flat records handed to the storage layer.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::checkpoint::{Checkpoint, CheckpointId};
use crate::conversation::{Turn, UsageTotals};
use crate::engines::EngineKind;
use crate::session::{Session, SessionId, SessionStatus};

/// Summary of an archived session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: SessionId,
    pub engine_kind: EngineKind,
    pub project_root: PathBuf,
    pub created_at: DateTime<Utc>,
    pub archived_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub turn_count: usize,
    pub last_turn_index: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ancestor: Option<CheckpointId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_session_id: Option<String>,
    #[serde(default)]
    pub usage: UsageTotals,
    pub transcript: Vec<Turn>,
}

impl From<&Session> for SessionSummary {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id.clone(),
            engine_kind: session.engine_kind,
            project_root: session.project_root.clone(),
            created_at: session.created_at,
            archived_at: Utc::now(),
            status: session.status,
            turn_count: session.transcript.len(),
            last_turn_index: session.transcript.last_index(),
            ancestor: session.ancestor.clone(),
            engine_session_id: session.engine_session_id.clone(),
            usage: session.usage,
            transcript: session.transcript.turns().to_vec(),
        }
    }
}

/// A checkpoint as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointRecord {
    pub id: CheckpointId,
    pub session_id: SessionId,
    pub engine_kind: EngineKind,
    pub project_root: PathBuf,
    pub turn_index_snapshot: Option<u64>,
    pub label: String,
    pub created_at: DateTime<Utc>,
    pub transcript: Vec<Turn>,
}

impl From<&Checkpoint> for CheckpointRecord {
    fn from(checkpoint: &Checkpoint) -> Self {
        Self {
            id: checkpoint.id.clone(),
            session_id: checkpoint.session_id.clone(),
            engine_kind: checkpoint.engine_kind,
            project_root: checkpoint.project_root.clone(),
            turn_index_snapshot: checkpoint.turn_index_snapshot,
            label: checkpoint.label.clone(),
            created_at: checkpoint.created_at,
            transcript: checkpoint.transcript_snapshot.clone(),
        }
    }
}

impl From<CheckpointRecord> for Checkpoint {
    fn from(record: CheckpointRecord) -> Self {
        Self {
            id: record.id,
            session_id: record.session_id,
            engine_kind: record.engine_kind,
            project_root: record.project_root,
            turn_index_snapshot: record.turn_index_snapshot,
            transcript_snapshot: record.transcript,
            created_at: record.created_at,
            label: record.label,
        }
    }
}
