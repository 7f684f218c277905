//! SessionRegistry - the per-session home of transcripts and listeners.
//!
//! The map itself is only locked long enough to find a session's slot; all
//! parsing and publishing happens under that session's own lock, so sessions
//! never wait on each other.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use super::dedup::DedupWindow;
use super::event::{SessionEvent, SessionEventKind};
use super::state::{Session, SessionId, SessionStatus};
use crate::config::CoreConfig;
use crate::conversation::{
    ParsedEvent, Role, StreamParser, TokenUsage, ToolInvocation, ToolResult, Turn, TurnContent,
    TurnMetadata,
};
use crate::engines::EngineKind;
use crate::error::{CoreError, Result};

/// Handle returned by `subscribe`, needed to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ListenerId(pub u64);

/// Everything a new run needs from the session.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub engine: EngineKind,
    pub project_root: PathBuf,
    /// Pending context followed by the prompt.
    pub payload: String,
    pub resume: Option<String>,
    /// Index of the user turn recorded for this run.
    pub prompt_index: u64,
    /// Consumed pending context, handed back if the run never starts.
    pub consumed_context: Option<String>,
}

struct SessionState {
    session: Session,
    parser: StreamParser,
    dedup: DedupWindow,
    seq: u64,
    listeners: Vec<(ListenerId, UnboundedSender<SessionEvent>)>,
}

impl SessionState {
    fn publish(&mut self, kind: SessionEventKind) -> usize {
        let event = SessionEvent {
            session_id: self.session.id.clone(),
            seq: self.seq,
            kind,
        };
        self.seq += 1;
        self.listeners.retain(|(id, tx)| {
            let alive = tx.send(event.clone()).is_ok();
            if !alive {
                debug!("Pruning closed listener {:?} on session {}", id, event.session_id);
            }
            alive
        });
        self.listeners.len()
    }

    fn append(&mut self, role: Role, content: TurnContent, usage: Option<TokenUsage>) -> Turn {
        let turn = self.session.transcript.append(role, content, usage).clone();
        self.publish_turn(&turn);
        turn
    }

    /// Turn events plus a diagnostic event for diagnostic turns.
    fn publish_turn(&mut self, turn: &Turn) {
        self.publish(SessionEventKind::TurnAppended { turn: turn.clone() });
        if let TurnContent::Metadata(TurnMetadata::Diagnostic {
            diagnostic, detail, ..
        }) = &turn.content
        {
            self.publish(SessionEventKind::Diagnostic {
                diagnostic: *diagnostic,
                detail: detail.clone(),
            });
        }
    }

    fn apply_parsed(&mut self, events: &[ParsedEvent]) {
        for event in events {
            match event {
                ParsedEvent::TurnAppended(turn) => self.publish_turn(turn),
                ParsedEvent::EngineSessionId(id) => {
                    if self.session.engine_session_id.as_deref() != Some(id.as_str()) {
                        debug!("Session {} bound to engine session {}", self.session.id, id);
                        self.session.engine_session_id = Some(id.clone());
                    }
                }
                ParsedEvent::StreamClosed {
                    usage, cost_usd, ..
                } => self.session.usage.absorb(usage, *cost_usd),
                ParsedEvent::ToolPaired { invocation_id, .. } => {
                    debug!("Paired tool result {} on session {}", invocation_id, self.session.id);
                }
                ParsedEvent::OrphanToolResult { .. } => {}
            }
        }
    }

    fn set_status(&mut self, status: SessionStatus) {
        if self.session.status != status {
            self.session.status = status;
            self.publish(SessionEventKind::Status { status });
        }
    }
}

pub(crate) struct SessionSlot {
    state: Mutex<SessionState>,
}

impl SessionSlot {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Issues session ids and scopes every event to exactly one session.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<SessionSlot>>>,
    next_listener: AtomicU64,
    dedup_window: usize,
    dedup_ttl: Duration,
}

impl SessionRegistry {
    pub fn new(dedup_window: usize, dedup_ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_listener: AtomicU64::new(1),
            dedup_window,
            dedup_ttl,
        }
    }

    pub fn from_config(config: &CoreConfig) -> Self {
        Self::new(config.dedup_window, config.dedup_ttl())
    }

    /// Create an empty session, returns its id.
    pub fn create_session(&self, engine: EngineKind, project_root: PathBuf) -> SessionId {
        let session = Session::new(SessionId::new(), engine, project_root);
        self.insert_session(session)
    }

    /// Register a fully built session (forks arrive this way).
    pub fn insert_session(&self, session: Session) -> SessionId {
        let id = session.id.clone();
        let state = SessionState {
            parser: StreamParser::new(session.engine_kind),
            dedup: DedupWindow::new(self.dedup_window, self.dedup_ttl),
            seq: 0,
            listeners: Vec::new(),
            session,
        };
        info!("Created session {} ({})", id, state.session.engine_kind);
        self.write_map().insert(
            id.clone(),
            Arc::new(SessionSlot {
                state: Mutex::new(state),
            }),
        );
        id
    }

    pub fn contains(&self, session_id: &SessionId) -> bool {
        self.read_map().contains_key(session_id)
    }

    pub fn list_sessions(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.read_map().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn subscribe(
        &self,
        session_id: &SessionId,
        listener: UnboundedSender<SessionEvent>,
    ) -> Result<ListenerId> {
        let slot = self.slot(session_id)?;
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::SeqCst));
        slot.lock().listeners.push((id, listener));
        Ok(id)
    }

    /// Returns false if the listener was already gone.
    pub fn unsubscribe(&self, session_id: &SessionId, listener: ListenerId) -> Result<bool> {
        let slot = self.slot(session_id)?;
        let mut state = slot.lock();
        let before = state.listeners.len();
        state.listeners.retain(|(id, _)| *id != listener);
        Ok(state.listeners.len() != before)
    }

    /// Deliver `kind` to this session's listeners only. Returns how many received it.
    pub fn publish(&self, session_id: &SessionId, kind: SessionEventKind) -> Result<usize> {
        let slot = self.slot(session_id)?;
        let delivered = slot.lock().publish(kind);
        Ok(delivered)
    }

    /// Feed one raw stdout line through dedup and the session's parser.
    pub fn consume_line(&self, session_id: &SessionId, raw_line: &str) -> Result<Vec<ParsedEvent>> {
        let slot = self.slot(session_id)?;
        let mut state = slot.lock();
        if !state.dedup.admit(raw_line) {
            debug!("Dropping repeated record on session {}", session_id);
            return Ok(Vec::new());
        }
        let SessionState {
            session, parser, ..
        } = &mut *state;
        let events = parser.consume_line(&mut session.transcript, raw_line);
        state.apply_parsed(&events);
        Ok(events)
    }

    /// Flush text still buffered by the parser (end of a process's output).
    pub fn finish_stream(&self, session_id: &SessionId) -> Result<Vec<ParsedEvent>> {
        let slot = self.slot(session_id)?;
        let mut state = slot.lock();
        let SessionState {
            session, parser, ..
        } = &mut *state;
        let events = parser.finish(&mut session.transcript);
        state.apply_parsed(&events);
        Ok(events)
    }

    /// Hand a streamed invocation to the tool bridge, which then owns its result.
    pub fn claim_invocation(&self, session_id: &SessionId, invocation_id: &str) -> Result<bool> {
        let slot = self.slot(session_id)?;
        let claimed = slot.lock().parser.claim(invocation_id);
        Ok(claimed)
    }

    /// Record an invocation the tool bridge made for the session.
    pub fn record_invocation(
        &self,
        session_id: &SessionId,
        invocation: ToolInvocation,
    ) -> Result<Vec<ParsedEvent>> {
        let slot = self.slot(session_id)?;
        let mut state = slot.lock();
        let SessionState {
            session, parser, ..
        } = &mut *state;
        let events = parser.record_invocation(&mut session.transcript, invocation);
        state.apply_parsed(&events);
        Ok(events)
    }

    /// Pair a result from the tool bridge with its invocation. A result with
    /// nothing left to pair is recorded as an orphan.
    pub fn resolve_tool_result(
        &self,
        session_id: &SessionId,
        result: ToolResult,
    ) -> Result<Vec<ParsedEvent>> {
        let slot = self.slot(session_id)?;
        let mut state = slot.lock();
        let SessionState {
            session, parser, ..
        } = &mut *state;
        let events = parser.resolve(&mut session.transcript, result);
        state.apply_parsed(&events);
        Ok(events)
    }

    pub fn append_turn(
        &self,
        session_id: &SessionId,
        role: Role,
        content: TurnContent,
        usage: Option<TokenUsage>,
    ) -> Result<Turn> {
        let slot = self.slot(session_id)?;
        let turn = slot.lock().append(role, content, usage);
        Ok(turn)
    }

    /// Record a recovered anomaly as a diagnostic system turn.
    pub fn record_diagnostic(
        &self,
        session_id: &SessionId,
        kind: crate::conversation::DiagnosticKind,
        detail: impl Into<String>,
        raw: Option<String>,
    ) -> Result<Turn> {
        self.append_turn(
            session_id,
            Role::System,
            TurnContent::diagnostic(kind, detail, raw),
            None,
        )
    }

    /// Record the user prompt and hand back what the orchestrator needs.
    pub fn begin_run(&self, session_id: &SessionId, prompt: &str) -> Result<RunPlan> {
        let slot = self.slot(session_id)?;
        let mut state = slot.lock();
        let consumed_context = state.session.pending_context.take();
        let payload = match &consumed_context {
            Some(context) => format!("{}\n\n{}", context, prompt),
            None => prompt.to_string(),
        };
        let prompt_turn = state.append(Role::User, TurnContent::Text(prompt.to_string()), None);
        state.parser.begin_run();
        state.dedup.clear();
        state.set_status(SessionStatus::Running);

        Ok(RunPlan {
            engine: state.session.engine_kind,
            project_root: state.session.project_root.clone(),
            payload,
            resume: state.session.engine_session_id.clone(),
            prompt_index: prompt_turn.index,
            consumed_context,
        })
    }

    /// Close out a run: drop pending invocations, record and publish the end.
    ///
    /// Tool results that show up after this are orphans, except for
    /// invocations the tool bridge claimed.
    pub fn terminate(
        &self,
        session_id: &SessionId,
        status: SessionStatus,
        reason: Option<String>,
    ) -> Result<()> {
        let slot = self.slot(session_id)?;
        let mut state = slot.lock();
        let abandoned = state.parser.abandon_pending();
        if abandoned > 0 {
            warn!(
                "Session {} ended with {} unanswered tool invocation(s)",
                session_id, abandoned
            );
        }
        state.session.status = status;
        state.append(
            Role::System,
            TurnContent::Metadata(TurnMetadata::Terminated {
                status,
                reason: reason.clone(),
            }),
            None,
        );
        state.publish(SessionEventKind::Terminated { status, reason });
        Ok(())
    }

    pub fn set_status(&self, session_id: &SessionId, status: SessionStatus) -> Result<()> {
        self.slot(session_id)?.lock().set_status(status);
        Ok(())
    }

    pub fn status(&self, session_id: &SessionId) -> Result<SessionStatus> {
        Ok(self.slot(session_id)?.lock().session.status)
    }

    /// Copy-on-read view of the session.
    pub fn snapshot(&self, session_id: &SessionId) -> Result<Session> {
        Ok(self.slot(session_id)?.lock().session.clone())
    }

    /// Run `f` against the session under its lock.
    pub fn read<T>(&self, session_id: &SessionId, f: impl FnOnce(&Session) -> T) -> Result<T> {
        let slot = self.slot(session_id)?;
        let state = slot.lock();
        Ok(f(&state.session))
    }

    pub fn push_pending_context(&self, session_id: &SessionId, text: &str) -> Result<()> {
        self.slot(session_id)?.lock().session.push_pending_context(text);
        Ok(())
    }

    /// Put back context taken by a run that never started, ahead of anything newer.
    pub fn restore_pending_context(&self, session_id: &SessionId, context: String) -> Result<()> {
        let slot = self.slot(session_id)?;
        let mut state = slot.lock();
        state.session.pending_context = Some(match state.session.pending_context.take() {
            Some(newer) => format!("{}\n\n{}", context, newer),
            None => context,
        });
        Ok(())
    }

    /// Assistant text appended after turn `after`, joined in order.
    pub fn assistant_text_since(&self, session_id: &SessionId, after: u64) -> Result<String> {
        self.read(session_id, |session| {
            session
                .transcript
                .since(after + 1)
                .iter()
                .filter(|turn| turn.role == Role::Assistant)
                .filter_map(|turn| turn.content.as_text())
                .collect::<Vec<_>>()
                .join("\n")
        })
    }

    /// Remove the session and drop all of its listeners.
    pub fn destroy_session(&self, session_id: &SessionId) -> Result<Session> {
        let slot = self
            .write_map()
            .remove(session_id)
            .ok_or_else(|| CoreError::SessionNotFound(session_id.clone()))?;
        let mut state = slot.lock();
        state.listeners.clear();
        info!("Destroyed session {}", session_id);
        Ok(state.session.clone())
    }

    fn slot(&self, session_id: &SessionId) -> Result<Arc<SessionSlot>> {
        self.read_map()
            .get(session_id)
            .cloned()
            .ok_or_else(|| CoreError::SessionNotFound(session_id.clone()))
    }

    fn read_map(&self) -> std::sync::RwLockReadGuard<'_, HashMap<SessionId, Arc<SessionSlot>>> {
        self.sessions.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_map(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<SessionId, Arc<SessionSlot>>> {
        self.sessions.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
