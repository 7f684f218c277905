//! Arena of checkpoints plus a per-session timeline index.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use log::info;

use super::replay::render_replay;
use super::{Checkpoint, CheckpointId};
use crate::conversation::Transcript;
use crate::error::{CoreError, Result};
use crate::persistence::CheckpointRecord;
use crate::session::{Session, SessionId, SessionRegistry};

#[derive(Default)]
struct Arena {
    checkpoints: HashMap<CheckpointId, Arc<Checkpoint>>,
    timelines: HashMap<SessionId, Vec<CheckpointId>>,
}

/// Shared checkpoint store. Readers get `Arc`s to immutable records.
pub struct CheckpointStore {
    arena: RwLock<Arena>,
    replay_max_chars: usize,
}

impl CheckpointStore {
    pub fn new(replay_max_chars: usize) -> Self {
        Self {
            arena: RwLock::new(Arena::default()),
            replay_max_chars,
        }
    }

    /// Deep-copy the session's transcript as it is right now.
    pub fn create_checkpoint(
        &self,
        registry: &SessionRegistry,
        session_id: &SessionId,
        label: &str,
    ) -> Result<CheckpointId> {
        let checkpoint = registry.read(session_id, |session| Checkpoint {
            id: CheckpointId::new(),
            session_id: session.id.clone(),
            engine_kind: session.engine_kind,
            project_root: session.project_root.clone(),
            turn_index_snapshot: session.transcript.last_index(),
            transcript_snapshot: session.transcript.turns().to_vec(),
            created_at: Utc::now(),
            label: label.to_string(),
        })?;
        let id = checkpoint.id.clone();
        info!(
            "Checkpoint {} of session {} at turn {:?}",
            id, session_id, checkpoint.turn_index_snapshot
        );

        let mut arena = self.write_arena();
        arena
            .timelines
            .entry(session_id.clone())
            .or_default()
            .push(id.clone());
        arena.checkpoints.insert(id.clone(), Arc::new(checkpoint));
        Ok(id)
    }

    pub fn get(&self, checkpoint_id: &CheckpointId) -> Result<Arc<Checkpoint>> {
        self.read_arena()
            .checkpoints
            .get(checkpoint_id)
            .cloned()
            .ok_or_else(|| CoreError::CheckpointNotFound(checkpoint_id.clone()))
    }

    /// Checkpoints of a session in creation order.
    ///
    /// Works for archived sessions too; an id never seen yields an empty list.
    pub fn list_checkpoints(&self, session_id: &SessionId) -> Vec<Arc<Checkpoint>> {
        let arena = self.read_arena();
        arena
            .timelines
            .get(session_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| arena.checkpoints.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Start a new session from the checkpoint's transcript.
    ///
    /// The fork has no process; its first prompt starts one, with a replay of
    /// the copied history prepended.
    pub fn fork_from(
        &self,
        registry: &SessionRegistry,
        checkpoint_id: &CheckpointId,
    ) -> Result<SessionId> {
        let checkpoint = self.get(checkpoint_id)?;
        let transcript = Transcript::from_turns(checkpoint.transcript_snapshot.clone());
        let replay = render_replay(&checkpoint.transcript_snapshot, self.replay_max_chars);
        let session = Session::forked(
            checkpoint.engine_kind,
            checkpoint.project_root.clone(),
            transcript,
            checkpoint.id.clone(),
            replay,
        );
        let fork_id = registry.insert_session(session);
        info!(
            "Forked session {} from checkpoint {} of {}",
            fork_id, checkpoint.id, checkpoint.session_id
        );
        Ok(fork_id)
    }

    /// Restoring never rewrites the source session; it forks.
    pub fn restore(
        &self,
        registry: &SessionRegistry,
        checkpoint_id: &CheckpointId,
    ) -> Result<SessionId> {
        self.fork_from(registry, checkpoint_id)
    }

    pub fn checkpoint_record(&self, checkpoint_id: &CheckpointId) -> Result<CheckpointRecord> {
        Ok(CheckpointRecord::from(self.get(checkpoint_id)?.as_ref()))
    }

    /// Put a stored checkpoint back into the arena. False if the id is already known.
    pub fn import(&self, record: CheckpointRecord) -> bool {
        let checkpoint = Checkpoint::from(record);
        let mut arena = self.write_arena();
        if arena.checkpoints.contains_key(&checkpoint.id) {
            return false;
        }
        arena
            .timelines
            .entry(checkpoint.session_id.clone())
            .or_default()
            .push(checkpoint.id.clone());
        arena
            .checkpoints
            .insert(checkpoint.id.clone(), Arc::new(checkpoint));
        true
    }

    fn read_arena(&self) -> RwLockReadGuard<'_, Arena> {
        self.arena.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_arena(&self) -> RwLockWriteGuard<'_, Arena> {
        self.arena.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
