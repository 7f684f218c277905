//! JSON files for session summaries and checkpoint records.
//!
//! # File Structure
//!
//! ```text
//! <data dir>/
//! ├── sessions/<session-id>.json
//! └── checkpoints/<checkpoint-id>.json
//! ```
//!
//! Every save writes `<id>.json.tmp` first and renames it into place.

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::records::{CheckpointRecord, SessionSummary};

const SESSIONS_DIR: &str = "sessions";
const CHECKPOINTS_DIR: &str = "checkpoints";

/// Error type for persistence operations.
#[derive(Debug)]
pub enum PersistenceError {
    /// IO error (permission denied, disk full, etc.)
    Io(std::io::Error),
    /// JSON serialization/deserialization error
    Json(serde_json::Error),
    /// Record not found
    NotFound(String),
}

impl std::fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PersistenceError::Io(e) => write!(f, "IO error: {e}"),
            PersistenceError::Json(e) => write!(f, "JSON error: {e}"),
            PersistenceError::NotFound(id) => write!(f, "Record not found: {id}"),
        }
    }
}

impl std::error::Error for PersistenceError {}

impl From<std::io::Error> for PersistenceError {
    fn from(e: std::io::Error) -> Self {
        PersistenceError::Io(e)
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(e: serde_json::Error) -> Self {
        PersistenceError::Json(e)
    }
}

pub fn save_session_summary(root: &Path, summary: &SessionSummary) -> Result<(), PersistenceError> {
    write_record(&root.join(SESSIONS_DIR), summary.id.as_str(), summary)
}

pub fn load_session_summary(
    root: &Path,
    session_id: &str,
) -> Result<SessionSummary, PersistenceError> {
    read_record(&root.join(SESSIONS_DIR), session_id)
}

pub fn save_checkpoint_record(
    root: &Path,
    record: &CheckpointRecord,
) -> Result<(), PersistenceError> {
    write_record(&root.join(CHECKPOINTS_DIR), record.id.as_str(), record)
}

pub fn load_checkpoint_record(
    root: &Path,
    checkpoint_id: &str,
) -> Result<CheckpointRecord, PersistenceError> {
    read_record(&root.join(CHECKPOINTS_DIR), checkpoint_id)
}

/// Every stored checkpoint, oldest first. A missing directory is empty.
pub fn load_checkpoint_records(root: &Path) -> Result<Vec<CheckpointRecord>, PersistenceError> {
    let dir = root.join(CHECKPOINTS_DIR);
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut records = Vec::new();
    for entry in fs::read_dir(&dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let contents = fs::read_to_string(&path)?;
        records.push(serde_json::from_str::<CheckpointRecord>(&contents)?);
    }
    records.sort_by_key(|r| r.created_at);
    Ok(records)
}

fn write_record<T: Serialize>(dir: &Path, id: &str, value: &T) -> Result<(), PersistenceError> {
    fs::create_dir_all(dir)?;

    let file_path = dir.join(format!("{id}.json"));
    let temp_path = dir.join(format!("{id}.json.tmp"));

    let json = serde_json::to_string_pretty(value)?;
    fs::write(&temp_path, json)?;
    fs::rename(&temp_path, &file_path)?;

    Ok(())
}

fn read_record<T: DeserializeOwned>(dir: &Path, id: &str) -> Result<T, PersistenceError> {
    let file_path = dir.join(format!("{id}.json"));
    if !file_path.exists() {
        return Err(PersistenceError::NotFound(id.to_string()));
    }
    let contents = fs::read_to_string(&file_path)?;
    Ok(serde_json::from_str(&contents)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::CheckpointId;
    use crate::conversation::{Role, Transcript, TurnContent};
    use crate::engines::EngineKind;
    use crate::session::{Session, SessionId};
    use chrono::{Duration, Utc};
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn make_summary(id: &str) -> SessionSummary {
        let mut session =
            Session::new(SessionId::from(id), EngineKind::Claude, PathBuf::from("/p"));
        session
            .transcript
            .append(Role::User, TurnContent::Text("hi".into()), None);
        SessionSummary::from(&session)
    }

    fn make_record(id: &str, age_secs: i64) -> CheckpointRecord {
        let mut transcript = Transcript::new();
        transcript.append(Role::User, TurnContent::Text("hi".into()), None);
        CheckpointRecord {
            id: CheckpointId::from(id),
            session_id: SessionId::from("s-1"),
            engine_kind: EngineKind::Gemini,
            project_root: PathBuf::from("/p"),
            turn_index_snapshot: transcript.last_index(),
            label: "x".into(),
            created_at: Utc::now() - Duration::seconds(age_secs),
            transcript: transcript.turns().to_vec(),
        }
    }

    #[test]
    fn session_summary_round_trip() {
        let dir = tempdir().unwrap();
        let summary = make_summary("s-1");

        save_session_summary(dir.path(), &summary).unwrap();
        let loaded = load_session_summary(dir.path(), "s-1").unwrap();

        assert_eq!(loaded, summary);
        assert_eq!(loaded.turn_count, 1);
        assert!(dir.path().join("sessions").join("s-1.json").exists());
    }

    #[test]
    fn load_missing_is_not_found() {
        let dir = tempdir().unwrap();
        let result = load_checkpoint_record(dir.path(), "nope");
        assert!(matches!(result, Err(PersistenceError::NotFound(_))));
    }

    #[test]
    fn atomic_write_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        save_checkpoint_record(dir.path(), &make_record("cp-1", 0)).unwrap();

        let checkpoints = dir.path().join("checkpoints");
        assert!(checkpoints.join("cp-1.json").exists());
        assert!(!checkpoints.join("cp-1.json.tmp").exists());
    }

    #[test]
    fn load_all_checkpoints_sorted_oldest_first() {
        let dir = tempdir().unwrap();
        save_checkpoint_record(dir.path(), &make_record("newer", 1)).unwrap();
        save_checkpoint_record(dir.path(), &make_record("older", 60)).unwrap();
        fs::write(dir.path().join("checkpoints").join("notes.txt"), "x").unwrap();

        let records = load_checkpoint_records(dir.path()).unwrap();
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["older", "newer"]);
    }

    #[test]
    fn missing_checkpoint_dir_is_empty() {
        let dir = tempdir().unwrap();
        assert!(load_checkpoint_records(dir.path()).unwrap().is_empty());
    }
}
