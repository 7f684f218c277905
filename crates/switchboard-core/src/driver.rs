//! Runs prompts for sessions.
//!
//! Each prompt is one engine process. While a run is active further prompts
//! queue behind it; follow-ups resume the engine's own conversation. A pump
//! task per process feeds stdout into the registry and turns the process's
//! single `Exit` event into the session's single `Terminated` event.
//!
//! With a tool bridge attached, registered tools the engine asks for are run
//! on their own tasks: structured invocations as they stream in, request
//! blocks from engines without native tools once their run completes.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use crate::conversation::{
    DiagnosticKind, ParsedEvent, Role, ToolInvocation, ToolResult, Turn, TurnContent,
};
use crate::engines::EngineKind;
use crate::error::{CoreError, Result};
use crate::persistence::SessionSummary;
use crate::process::{ExitReason, ProcessEvent, ProcessInfo, ProcessOrchestrator};
use crate::session::{
    ListenerId, SessionEvent, SessionEventKind, SessionId, SessionRegistry, SessionStatus,
};
use crate::tools::{
    advertise_tools, parse_tool_requests, PromptFuture, SessionPort, ToolBridge, ToolCall,
};

/// What `send_prompt` did with the prompt.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum PromptOutcome {
    Started { process: ProcessInfo },
    /// Waiting behind the active run; `position` is 1-based.
    Queued { position: usize },
}

/// How a run ended, handed to whoever waits on it.
#[derive(Debug, Clone)]
struct RunOutcome {
    status: SessionStatus,
    reason: Option<String>,
    /// Assistant text produced during the run.
    text: String,
}

type RunWaiter = oneshot::Sender<RunOutcome>;

struct QueuedPrompt {
    text: String,
    waiter: Option<RunWaiter>,
}

struct ActiveRun {
    generation: u64,
    prompt_index: u64,
    waiter: Option<RunWaiter>,
}

#[derive(Default)]
struct RunQueue {
    active: Option<ActiveRun>,
    queued: VecDeque<QueuedPrompt>,
}

type RunTable = Mutex<HashMap<SessionId, Arc<Mutex<RunQueue>>>>;

/// Cheap to clone; every clone drives the same sessions.
#[derive(Clone)]
pub struct SessionDriver {
    registry: Arc<SessionRegistry>,
    orchestrator: Arc<ProcessOrchestrator>,
    runs: Arc<RunTable>,
    bridge: Option<Arc<ToolBridge>>,
}

impl SessionDriver {
    pub fn new(registry: Arc<SessionRegistry>, orchestrator: Arc<ProcessOrchestrator>) -> Self {
        Self {
            registry,
            orchestrator,
            runs: Arc::new(Mutex::new(HashMap::new())),
            bridge: None,
        }
    }

    /// Run the tools engines ask for through `bridge`.
    pub fn with_bridge(mut self, bridge: Arc<ToolBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn orchestrator(&self) -> &Arc<ProcessOrchestrator> {
        &self.orchestrator
    }

    /// Create a session and submit its first prompt.
    ///
    /// Engine resolution and spawn failures abort creation: the session is
    /// removed and the error returned.
    pub fn start_session(
        &self,
        engine: EngineKind,
        project_root: PathBuf,
        prompt: &str,
    ) -> Result<SessionId> {
        let session_id = self.registry.create_session(engine, project_root);
        self.submit_first_prompt(&session_id, prompt)?;
        Ok(session_id)
    }

    /// Like `start_session`, with a listener attached before anything is published.
    pub fn start_session_with_listener(
        &self,
        engine: EngineKind,
        project_root: PathBuf,
        prompt: &str,
        listener: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<(SessionId, ListenerId)> {
        let session_id = self.registry.create_session(engine, project_root);
        let listener_id = self.registry.subscribe(&session_id, listener)?;
        self.submit_first_prompt(&session_id, prompt)?;
        Ok((session_id, listener_id))
    }

    fn submit_first_prompt(&self, session_id: &SessionId, prompt: &str) -> Result<()> {
        match self.send_prompt(session_id, prompt) {
            Ok(_) => Ok(()),
            Err(e) => {
                if e.is_fatal_to_start() {
                    let _ = self.registry.destroy_session(session_id);
                    self.lock_runs().remove(session_id);
                }
                Err(e)
            }
        }
    }

    /// Start a run, or queue the prompt behind the active one.
    pub fn send_prompt(&self, session_id: &SessionId, prompt: &str) -> Result<PromptOutcome> {
        self.submit(session_id, prompt.to_string(), None)
    }

    /// Send a prompt and wait for its run to end. Resolves with the run's
    /// assistant text; a run that fails or is cancelled is `RunInterrupted`.
    pub async fn send_prompt_and_wait(
        &self,
        session_id: &SessionId,
        prompt: String,
    ) -> Result<String> {
        let (tx, rx) = oneshot::channel();
        self.submit(session_id, prompt, Some(tx))?;
        let outcome = rx.await.map_err(|_| CoreError::RunInterrupted {
            session_id: session_id.clone(),
            reason: "prompt was dropped before it ran".to_string(),
        })?;
        match outcome.status {
            SessionStatus::Completed => Ok(outcome.text),
            status => Err(CoreError::RunInterrupted {
                session_id: session_id.clone(),
                reason: outcome
                    .reason
                    .unwrap_or_else(|| format!("run ended as {status:?}")),
            }),
        }
    }

    fn submit(
        &self,
        session_id: &SessionId,
        text: String,
        waiter: Option<RunWaiter>,
    ) -> Result<PromptOutcome> {
        if !self.registry.contains(session_id) {
            return Err(CoreError::SessionNotFound(session_id.clone()));
        }
        let queue = self.queue(session_id);
        let mut queue = lock(&queue);
        if queue.active.is_some() {
            queue.queued.push_back(QueuedPrompt { text, waiter });
            let position = queue.queued.len();
            debug!("Queued prompt {} for busy session {}", position, session_id);
            return Ok(PromptOutcome::Queued { position });
        }
        let process = self.launch(session_id, &mut queue, &text, waiter)?;
        Ok(PromptOutcome::Started { process })
    }

    /// Spawn the engine for `prompt`. Caller holds the session's run lock.
    fn launch(
        &self,
        session_id: &SessionId,
        queue: &mut RunQueue,
        prompt: &str,
        waiter: Option<RunWaiter>,
    ) -> Result<ProcessInfo> {
        let mut plan = self.registry.begin_run(session_id, prompt)?;
        if let Some(preamble) = self.tool_preamble(plan.engine) {
            plan.payload = format!("{preamble}\n\n{}", plan.payload);
        }
        let handle = match self.orchestrator.start(
            session_id,
            plan.engine,
            &plan.payload,
            &plan.project_root,
            plan.resume.as_deref(),
        ) {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Failed to start {} for session {}: {}", plan.engine, session_id, e);
                if let Some(context) = plan.consumed_context {
                    let _ = self.registry.restore_pending_context(session_id, context);
                }
                let _ = self.registry.record_diagnostic(
                    session_id,
                    DiagnosticKind::ProcessSpawnFailure,
                    e.to_string(),
                    None,
                );
                let reason = e.to_string();
                let _ = self
                    .registry
                    .terminate(session_id, SessionStatus::Failed, Some(reason.clone()));
                if let Some(waiter) = waiter {
                    let _ = waiter.send(RunOutcome {
                        status: SessionStatus::Failed,
                        reason: Some(reason),
                        text: String::new(),
                    });
                }
                return Err(e);
            }
        };

        let info = handle.info.clone();
        queue.active = Some(ActiveRun {
            generation: info.generation,
            prompt_index: plan.prompt_index,
            waiter,
        });

        let driver = self.clone();
        let session = session_id.clone();
        let generation = info.generation;
        tokio::spawn(async move {
            driver.pump(session, generation, handle.events).await;
        });
        Ok(info)
    }

    async fn pump(
        self,
        session_id: SessionId,
        generation: u64,
        mut events: mpsc::UnboundedReceiver<ProcessEvent>,
    ) {
        while let Some(event) = events.recv().await {
            match event {
                ProcessEvent::Stdout(line) => {
                    if let Err(e) = self.ingest_line(&session_id, &line) {
                        debug!("Dropping output for session {}: {}", session_id, e);
                    }
                }
                ProcessEvent::Stderr(line) => {
                    warn!("[{}] stderr: {}", session_id, line);
                }
                ProcessEvent::Exit(reason) => {
                    self.finish(&session_id, generation, reason);
                    return;
                }
            }
        }
        // The supervisor always sends Exit; a closed channel means it was torn down.
        self.finish(
            &session_id,
            generation,
            ExitReason::Exited {
                code: None,
                signal: None,
            },
        );
    }

    /// Feed one stdout line to the session. Invocations of registered tools
    /// are claimed and handed to the bridge.
    pub fn ingest_line(&self, session_id: &SessionId, line: &str) -> Result<Vec<ParsedEvent>> {
        let parsed = self.registry.consume_line(session_id, line)?;
        if let Some(bridge) = &self.bridge {
            for event in &parsed {
                if let ParsedEvent::TurnAppended(Turn {
                    content: TurnContent::ToolInvocation(invocation),
                    ..
                }) = event
                {
                    if bridge.is_registered(&invocation.tool_name) {
                        self.dispatch_invocation(bridge, session_id, invocation.clone())?;
                    }
                }
            }
        }
        Ok(parsed)
    }

    fn dispatch_invocation(
        &self,
        bridge: &Arc<ToolBridge>,
        session_id: &SessionId,
        invocation: ToolInvocation,
    ) -> Result<()> {
        if !self
            .registry
            .claim_invocation(session_id, &invocation.invocation_id)?
        {
            debug!("Invocation {} already has a result", invocation.invocation_id);
            return Ok(());
        }
        let engine = self.registry.read(session_id, |session| session.engine_kind)?;
        info!(
            "Session {} asked for {} ({})",
            session_id, invocation.tool_name, invocation.invocation_id
        );
        let bridge = Arc::clone(bridge);
        let driver = self.clone();
        let session_id = session_id.clone();
        tokio::spawn(async move {
            if let Err(e) = bridge.dispatch(invocation, &session_id, engine, &driver).await {
                debug!("Requested call on session {} ended with: {}", session_id, e);
            }
        });
        Ok(())
    }

    /// Tool listing for engines that only learn about tools from the prompt.
    fn tool_preamble(&self, engine: EngineKind) -> Option<String> {
        if engine.capabilities().native_tools {
            return None;
        }
        advertise_tools(&self.bridge.as_ref()?.list_available(engine))
    }

    /// Run the tools a completed reply asked for with request blocks.
    fn dispatch_requests(&self, session_id: &SessionId, reply: &str) {
        let Some(bridge) = &self.bridge else {
            return;
        };
        let Ok(engine) = self.registry.read(session_id, |session| session.engine_kind) else {
            return;
        };
        if engine.capabilities().native_tools {
            return;
        }
        for request in parse_tool_requests(reply) {
            if !bridge.is_registered(&request.tool_name) {
                warn!("Session {} asked for unknown tool {}", session_id, request.tool_name);
                continue;
            }
            info!("Session {} asked for {}", session_id, request.tool_name);
            let bridge = Arc::clone(bridge);
            let driver = self.clone();
            let session_id = session_id.clone();
            tokio::spawn(async move {
                let tool_name = request.tool_name;
                if let Err(e) = bridge
                    .execute(&tool_name, request.arguments, &session_id, engine, &driver)
                    .await
                {
                    warn!("{} call for session {} failed: {}", tool_name, session_id, e);
                }
            });
        }
    }

    /// Handle a process exit exactly once: release, terminate, then start the next prompt.
    fn finish(&self, session_id: &SessionId, generation: u64, reason: ExitReason) {
        self.orchestrator.release(session_id, generation);
        let _ = self.registry.finish_stream(session_id);

        let (status, detail) = match &reason {
            ExitReason::Cancelled => {
                (SessionStatus::Cancelled, Some("cancelled by user".to_string()))
            }
            ExitReason::Superseded => (
                SessionStatus::Cancelled,
                Some("superseded by a newer process".to_string()),
            ),
            ExitReason::Exited {
                code: Some(0),
                signal: None,
            } => (SessionStatus::Completed, None),
            ExitReason::Exited { code, signal } => (
                SessionStatus::Failed,
                Some(format!(
                    "process terminated unexpectedly (exit code {}, signal {})",
                    code.map_or("none".to_string(), |c| c.to_string()),
                    signal.map_or("none".to_string(), |s| s.to_string()),
                )),
            ),
        };

        let queue = self.queue(session_id);
        let mut queue = lock(&queue);
        let is_current = queue
            .active
            .as_ref()
            .is_some_and(|run| run.generation == generation);
        if !is_current {
            // A replaced process still gets its one terminal event.
            debug!("Stale exit for session {} generation {}", session_id, generation);
            let _ = self.registry.publish(
                session_id,
                SessionEventKind::Terminated {
                    status: SessionStatus::Cancelled,
                    reason: detail,
                },
            );
            return;
        }
        let Some(run) = queue.active.take() else {
            return;
        };

        if status == SessionStatus::Failed {
            let _ = self.registry.record_diagnostic(
                session_id,
                DiagnosticKind::ProcessTerminatedUnexpectedly,
                detail.clone().unwrap_or_default(),
                None,
            );
        }
        info!("Session {} run ended: {:?}", session_id, status);
        if let Err(e) = self.registry.terminate(session_id, status, detail.clone()) {
            debug!("Session {} gone before its exit: {}", session_id, e);
        }

        let text = self
            .registry
            .assistant_text_since(session_id, run.prompt_index)
            .unwrap_or_default();
        if status == SessionStatus::Completed {
            self.dispatch_requests(session_id, &text);
        }
        if let Some(waiter) = run.waiter {
            let _ = waiter.send(RunOutcome {
                status,
                reason: detail,
                text,
            });
        }

        if status == SessionStatus::Cancelled {
            let dropped = queue.queued.len();
            queue.queued.clear();
            if dropped > 0 {
                info!("Dropped {} queued prompt(s) for cancelled session {}", dropped, session_id);
            }
            return;
        }
        while let Some(next) = queue.queued.pop_front() {
            match self.launch(session_id, &mut queue, &next.text, next.waiter) {
                Ok(_) => break,
                Err(e) => warn!("Queued prompt for session {} did not start: {}", session_id, e),
            }
        }
    }

    /// Stop the session's process; queued prompts are discarded.
    pub fn cancel(&self, session_id: &SessionId) -> Result<()> {
        if !self.registry.contains(session_id) {
            return Err(CoreError::SessionNotFound(session_id.clone()));
        }
        if let Some(queue) = self.lock_runs().get(session_id).cloned() {
            lock(&queue).queued.clear();
        }
        self.orchestrator.cancel(session_id)
    }

    pub fn is_alive(&self, session_id: &SessionId) -> bool {
        self.orchestrator.is_alive(session_id)
    }

    /// Whether a run is active or waiting to finish its exit handling.
    pub fn is_busy(&self, session_id: &SessionId) -> bool {
        self.lock_runs()
            .get(session_id)
            .is_some_and(|queue| lock(queue).active.is_some())
    }

    /// Remove an idle session and hand back its summary.
    pub fn archive_session(&self, session_id: &SessionId) -> Result<SessionSummary> {
        if !self.registry.contains(session_id) {
            return Err(CoreError::SessionNotFound(session_id.clone()));
        }
        if self.is_alive(session_id) || self.is_busy(session_id) {
            return Err(CoreError::SessionBusy(session_id.clone()));
        }
        let session = self.registry.destroy_session(session_id)?;
        self.lock_runs().remove(session_id);
        info!("Archived session {}", session_id);
        Ok(SessionSummary::from(&session))
    }

    /// Cancel everything (shutdown).
    pub fn shutdown(&self) {
        for queue in self.lock_runs().values() {
            lock(queue).queued.clear();
        }
        self.orchestrator.cancel_all();
    }

    fn queue(&self, session_id: &SessionId) -> Arc<Mutex<RunQueue>> {
        Arc::clone(self.lock_runs().entry(session_id.clone()).or_default())
    }

    fn lock_runs(&self) -> MutexGuard<'_, HashMap<SessionId, Arc<Mutex<RunQueue>>>> {
        self.runs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn lock(queue: &Mutex<RunQueue>) -> MutexGuard<'_, RunQueue> {
    queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SessionPort for SessionDriver {
    fn append_turn(
        &self,
        session_id: &SessionId,
        role: Role,
        content: TurnContent,
    ) -> Result<Turn> {
        self.registry.append_turn(session_id, role, content, None)
    }

    fn record_invocation(&self, session_id: &SessionId, invocation: ToolInvocation) -> Result<()> {
        self.registry.record_invocation(session_id, invocation)?;
        Ok(())
    }

    fn record_result(&self, session_id: &SessionId, result: ToolResult) -> Result<()> {
        self.registry.resolve_tool_result(session_id, result)?;
        Ok(())
    }

    fn publish_call(&self, session_id: &SessionId, call: &ToolCall) -> Result<()> {
        self.registry.publish(
            session_id,
            SessionEventKind::ToolCall {
                invocation_id: call.invocation_id.clone(),
                tool_name: call.tool_name.clone(),
                state: call.state,
            },
        )?;
        Ok(())
    }

    fn inject(&self, session_id: &SessionId, text: &str) -> Result<()> {
        self.registry.push_pending_context(session_id, text)
    }

    fn project_root(&self, session_id: &SessionId) -> Result<PathBuf> {
        self.registry.read(session_id, |session| session.project_root.clone())
    }

    fn prompt_and_collect<'a>(
        &'a self,
        session_id: &'a SessionId,
        prompt: String,
    ) -> PromptFuture<'a> {
        Box::pin(self.send_prompt_and_wait(session_id, prompt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::engines::EngineLocator;
    use std::time::Duration;

    fn driver_for(binaries: &[(EngineKind, PathBuf)], threshold: usize) -> SessionDriver {
        let config = CoreConfig {
            shell_prefix: Some("/bin/sh -c".to_string()),
            grace_period_ms: 200,
            arg_threshold_chars: threshold,
            ..Default::default()
        };
        let locator = binaries
            .iter()
            .fold(EngineLocator::new(), |l, (kind, path)| l.with_override(*kind, path));
        let registry = Arc::new(SessionRegistry::from_config(&config));
        let orchestrator = Arc::new(ProcessOrchestrator::with_locator(Arc::new(config), locator));
        SessionDriver::new(registry, orchestrator)
    }

    async fn next_terminated(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> SessionEvent {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let event = rx.recv().await.expect("listener closed");
                if event.kind.is_terminated() {
                    return event;
                }
            }
        })
        .await
        .expect("no terminal event")
    }

    #[test]
    fn unknown_session_is_not_found() {
        let driver = driver_for(&[], 7_500);
        let missing = SessionId::from("missing");
        assert!(matches!(
            driver.send_prompt(&missing, "hi"),
            Err(CoreError::SessionNotFound(_))
        ));
        assert!(matches!(driver.cancel(&missing), Err(CoreError::SessionNotFound(_))));
        assert!(matches!(
            driver.archive_session(&missing),
            Err(CoreError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn missing_engine_aborts_session_creation() {
        let driver = driver_for(&[(EngineKind::Claude, PathBuf::from("/no/such/claude"))], 7_500);
        let err = driver
            .start_session(EngineKind::Claude, PathBuf::from("."), "hi")
            .unwrap_err();
        assert!(matches!(err, CoreError::EngineNotFound { .. }));
        assert!(driver.registry().list_sessions().is_empty());
    }

    #[tokio::test]
    async fn cancel_on_idle_session_is_not_running() {
        let driver = driver_for(&[], 7_500);
        let id = driver
            .registry()
            .create_session(EngineKind::Claude, PathBuf::from("."));
        assert!(matches!(driver.cancel(&id), Err(CoreError::NotRunning(_))));
    }

    #[cfg(unix)]
    mod live {
        use super::*;
        use crate::conversation::TurnMetadata;
        use std::os::unix::fs::PermissionsExt;
        use tempfile::TempDir;

        const CLAUDE_REPLY: &str = r#"cat >/dev/null
echo '{"type":"system","subtype":"init","session_id":"eng-1","model":"fake"}'
echo '{"type":"assistant","message":{"id":"m1","role":"assistant","content":[{"type":"text","text":"hello"}],"stop_reason":"end_turn"}}'
echo '{"type":"result","subtype":"success","is_error":false,"result":"hello","total_cost_usd":0.01,"usage":{"input_tokens":3,"output_tokens":2}}'
echo '{"type":"result","subtype":"success","is_error":false,"result":"hello","total_cost_usd":0.01,"usage":{"input_tokens":3,"output_tokens":2}}'"#;

        fn script(dir: &TempDir, name: &str, body: &str) -> PathBuf {
            let path = dir.path().join(name);
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        fn start(
            driver: &SessionDriver,
            engine: EngineKind,
            root: &TempDir,
            prompt: &str,
        ) -> (SessionId, mpsc::UnboundedReceiver<SessionEvent>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let (id, _) = driver
                .start_session_with_listener(engine, root.path().to_path_buf(), prompt, tx)
                .unwrap();
            (id, rx)
        }

        #[tokio::test]
        async fn completed_run_records_turns_and_usage() {
            let dir = TempDir::new().unwrap();
            let binary = script(&dir, "claude", CLAUDE_REPLY);
            let driver = driver_for(&[(EngineKind::Claude, binary)], 7_500);

            let (id, mut rx) = start(&driver, EngineKind::Claude, &dir, "say hello");
            let terminal = next_terminated(&mut rx).await;
            assert_eq!(terminal.session_id, id);
            assert!(matches!(
                terminal.kind,
                SessionEventKind::Terminated {
                    status: SessionStatus::Completed,
                    ..
                }
            ));

            let session = driver.registry().snapshot(&id).unwrap();
            assert_eq!(session.status, SessionStatus::Completed);
            assert_eq!(session.engine_session_id.as_deref(), Some("eng-1"));
            assert_eq!(session.usage.runs, 1);
            let turns = session.transcript.turns();
            assert_eq!(turns[0].content, TurnContent::Text("say hello".into()));
            assert_eq!(turns.iter().filter(|t| t.is_terminal()).count(), 1);
            assert!(turns
                .iter()
                .any(|t| t.role == Role::Assistant && t.content.as_text() == Some("hello")));
            for pair in turns.windows(2) {
                assert_eq!(pair[1].index, pair[0].index + 1);
            }
            assert!(!driver.is_alive(&id));
        }

        #[tokio::test]
        async fn cancel_mid_stream_emits_one_cancelled_event() {
            let dir = TempDir::new().unwrap();
            let binary = script(
                &dir,
                "claude",
                r#"echo '{"type":"system","subtype":"init","session_id":"eng-2"}'
exec sleep 30"#,
            );
            let driver = driver_for(&[(EngineKind::Claude, binary)], 7_500);
            let (id, mut rx) = start(&driver, EngineKind::Claude, &dir, "long task");

            tokio::time::sleep(Duration::from_millis(200)).await;
            driver.cancel(&id).unwrap();
            let terminal = next_terminated(&mut rx).await;
            assert!(matches!(
                terminal.kind,
                SessionEventKind::Terminated {
                    status: SessionStatus::Cancelled,
                    ..
                }
            ));

            tokio::time::sleep(Duration::from_millis(300)).await;
            let mut extra = 0;
            while let Ok(event) = rx.try_recv() {
                if event.kind.is_terminated() {
                    extra += 1;
                }
            }
            assert_eq!(extra, 0);
            assert!(!driver.is_alive(&id));
            assert_eq!(
                driver.registry().status(&id).unwrap(),
                SessionStatus::Cancelled
            );
        }

        #[tokio::test]
        async fn nonzero_exit_is_failed_with_reason() {
            let dir = TempDir::new().unwrap();
            let binary = script(&dir, "claude", "echo 'not json at all'\nexit 7");
            let driver = driver_for(&[(EngineKind::Claude, binary)], 7_500);
            let (id, mut rx) = start(&driver, EngineKind::Claude, &dir, "x");

            let terminal = next_terminated(&mut rx).await;
            match terminal.kind {
                SessionEventKind::Terminated { status, reason } => {
                    assert_eq!(status, SessionStatus::Failed);
                    assert!(reason.unwrap().contains("exit code 7"));
                }
                other => panic!("unexpected {other:?}"),
            }
            let session = driver.registry().snapshot(&id).unwrap();
            let kinds: Vec<DiagnosticKind> = session
                .transcript
                .turns()
                .iter()
                .filter_map(|t| t.diagnostic_kind())
                .collect();
            assert!(kinds.contains(&DiagnosticKind::MalformedStreamRecord));
            assert!(kinds.contains(&DiagnosticKind::ProcessTerminatedUnexpectedly));
        }

        #[tokio::test]
        async fn prompts_queue_behind_active_run() {
            let dir = TempDir::new().unwrap();
            let binary = script(&dir, "claude", &format!("sleep 0.3\n{CLAUDE_REPLY}"));
            let driver = driver_for(&[(EngineKind::Claude, binary)], 7_500);
            let (id, mut rx) = start(&driver, EngineKind::Claude, &dir, "first");

            let outcome = driver.send_prompt(&id, "second").unwrap();
            assert!(matches!(outcome, PromptOutcome::Queued { position: 1 }));

            next_terminated(&mut rx).await;
            next_terminated(&mut rx).await;

            let session = driver.registry().snapshot(&id).unwrap();
            let prompts: Vec<&str> = session
                .transcript
                .turns()
                .iter()
                .filter(|t| t.role == Role::User)
                .filter_map(|t| t.content.as_text())
                .collect();
            assert_eq!(prompts, vec!["first", "second"]);
            assert_eq!(session.usage.runs, 2);
        }

        #[tokio::test]
        async fn send_prompt_and_wait_returns_run_text() {
            let dir = TempDir::new().unwrap();
            let binary = script(&dir, "claude", CLAUDE_REPLY);
            let driver = driver_for(&[(EngineKind::Claude, binary)], 7_500);
            let id = driver
                .registry()
                .create_session(EngineKind::Claude, dir.path().to_path_buf());

            let text = driver.send_prompt_and_wait(&id, "hi".into()).await.unwrap();
            assert_eq!(text, "hello");
        }

        #[tokio::test]
        async fn archive_requires_idle_session() {
            let dir = TempDir::new().unwrap();
            let binary = script(&dir, "claude", "exec sleep 30");
            let driver = driver_for(&[(EngineKind::Claude, binary)], 7_500);
            let (id, mut rx) = start(&driver, EngineKind::Claude, &dir, "x");

            assert!(matches!(
                driver.archive_session(&id),
                Err(CoreError::SessionBusy(_))
            ));
            driver.cancel(&id).unwrap();
            next_terminated(&mut rx).await;

            let summary = driver.archive_session(&id).unwrap();
            assert_eq!(summary.id, id);
            assert_eq!(summary.status, SessionStatus::Cancelled);
            assert!(!driver.registry().contains(&id));
        }

        #[tokio::test]
        async fn concurrent_sessions_stay_isolated() {
            let dir = TempDir::new().unwrap();
            let binary = script(&dir, "claude", CLAUDE_REPLY);
            let driver = driver_for(&[(EngineKind::Claude, binary)], 7_500);
            let (a, mut rx_a) = start(&driver, EngineKind::Claude, &dir, "a");
            let (b, mut rx_b) = start(&driver, EngineKind::Claude, &dir, "b");

            let mut seen_a = Vec::new();
            let mut seen_b = Vec::new();
            loop {
                let event = rx_a.recv().await.unwrap();
                let done = event.kind.is_terminated();
                seen_a.push(event);
                if done {
                    break;
                }
            }
            loop {
                let event = rx_b.recv().await.unwrap();
                let done = event.kind.is_terminated();
                seen_b.push(event);
                if done {
                    break;
                }
            }
            assert!(seen_a.iter().all(|e| e.session_id == a));
            assert!(seen_b.iter().all(|e| e.session_id == b));
        }

        #[tokio::test]
        async fn argument_and_stdin_delivery_yield_same_turns() {
            let dir = TempDir::new().unwrap();
            let binary = script(&dir, "claude", CLAUDE_REPLY);
            let driver = driver_for(&[(EngineKind::Claude, binary)], 50);

            let below = "a".repeat(49);
            let at = "b".repeat(50);
            let (short, mut rx_short) = start(&driver, EngineKind::Claude, &dir, &below);
            let (long, mut rx_long) = start(&driver, EngineKind::Claude, &dir, &at);
            next_terminated(&mut rx_short).await;
            next_terminated(&mut rx_long).await;

            let shape = |id: &SessionId| -> Vec<(Role, TurnContent)> {
                driver
                    .registry()
                    .snapshot(id)
                    .unwrap()
                    .transcript
                    .turns()
                    .iter()
                    .skip(1)
                    .map(|t| (t.role, t.content.clone()))
                    .collect()
            };
            let short_turns = shape(&short);
            assert_eq!(short_turns, shape(&long));
            assert!(short_turns.iter().any(|(_, c)| matches!(
                c,
                TurnContent::Metadata(TurnMetadata::Terminated {
                    status: SessionStatus::Completed,
                    ..
                })
            )));
        }
    }
}
