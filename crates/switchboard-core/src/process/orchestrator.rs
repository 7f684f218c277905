//! Per-session process ownership.
//!
//! The orchestrator's slot map is where a session's live process control
//! lives: at most one per session id. Starting a process for a session that
//! already has one stops the old one first (as superseded). The slot is
//! released exactly once, by whoever consumes the process's `Exit` event.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Serialize;
use tokio::sync::mpsc;

use super::spawn::{EngineProcess, ProcessEvent, PromptDelivery, SpawnConfig, SpawnError, StopKind};
use crate::config::CoreConfig;
use crate::engines::{EngineKind, EngineLocator, LaunchRequest};
use crate::error::{CoreError, Result};
use crate::logging::open_log_file;
use crate::session::SessionId;

/// Immutable facts about a started process.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessInfo {
    pub session_id: SessionId,
    pub engine: EngineKind,
    /// Distinguishes successive processes of one session.
    pub generation: u64,
    pub pid: Option<u32>,
    pub delivery: PromptDelivery,
    pub started_at: DateTime<Utc>,
}

/// What `start` hands back: process facts plus its output stream.
pub struct ProcessHandle {
    pub info: ProcessInfo,
    pub events: mpsc::UnboundedReceiver<ProcessEvent>,
}

struct Slot {
    generation: u64,
    process: EngineProcess,
}

pub struct ProcessOrchestrator {
    config: Arc<CoreConfig>,
    locator: EngineLocator,
    slots: Mutex<HashMap<SessionId, Slot>>,
    next_generation: AtomicU64,
}

impl ProcessOrchestrator {
    pub fn new(config: Arc<CoreConfig>) -> Self {
        let locator = EngineLocator::from_config(&config);
        Self::with_locator(config, locator)
    }

    pub fn with_locator(config: Arc<CoreConfig>, locator: EngineLocator) -> Self {
        Self {
            config,
            locator,
            slots: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    pub fn locator(&self) -> &EngineLocator {
        &self.locator
    }

    /// Spawn `engine` for `session_id` with `payload` as the prompt.
    ///
    /// Any process already running for the session is stopped first.
    pub fn start(
        &self,
        session_id: &SessionId,
        engine: EngineKind,
        payload: &str,
        project_root: &Path,
        resume: Option<&str>,
    ) -> Result<ProcessHandle> {
        let binary = self.locator.locate(engine)?;
        let settings = self.config.engine(engine);
        let delivery = PromptDelivery::choose(payload, self.config.arg_threshold_chars);
        let invocation = engine.invocation(&LaunchRequest {
            prompt: payload,
            delivery,
            settings: &settings,
            resume,
        });

        let spawn_config = SpawnConfig::new(binary, invocation.args)
            .working_dir(project_root)
            .shell_prefix(self.config.shell_prefix.clone())
            .stdin_payload(invocation.stdin_payload)
            .grace_period(self.config.grace_period());
        let log = open_log_file(self.config.log_dir.as_deref(), session_id.as_str());

        let prior = self.lock_slots().remove(session_id);
        if let Some(mut prior) = prior {
            info!("Stopping previous process for session {}", session_id);
            prior.process.stop(StopKind::Supersede);
        }

        let (process, events) = EngineProcess::spawn(spawn_config, log).map_err(|e| match e {
            SpawnError::Io(source) => CoreError::ProcessSpawnFailure { engine, source },
            SpawnError::Command(err) => err,
        })?;

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let info = ProcessInfo {
            session_id: session_id.clone(),
            engine,
            generation,
            pid: process.pid(),
            delivery,
            started_at: Utc::now(),
        };
        info!(
            "Started {} for session {} (pid {:?}, {:?} delivery)",
            engine, session_id, info.pid, delivery
        );
        let displaced = self
            .lock_slots()
            .insert(session_id.clone(), Slot { generation, process });
        if let Some(mut displaced) = displaced {
            // Another start for this session spawned while this one did.
            warn!("Stopping concurrently started process for session {}", session_id);
            displaced.process.stop(StopKind::Supersede);
        }

        Ok(ProcessHandle { info, events })
    }

    /// Graceful stop of the session's process. `NotRunning` if there is none.
    pub fn cancel(&self, session_id: &SessionId) -> Result<()> {
        let mut slots = self.lock_slots();
        match slots.get_mut(session_id) {
            Some(slot) if slot.process.is_running() => {
                if slot.process.stop(StopKind::Cancel) {
                    info!("Cancelling process for session {}", session_id);
                    Ok(())
                } else {
                    // Stop already requested; the exit is on its way.
                    Err(CoreError::NotRunning(session_id.clone()))
                }
            }
            _ => Err(CoreError::NotRunning(session_id.clone())),
        }
    }

    pub fn is_alive(&self, session_id: &SessionId) -> bool {
        self.lock_slots()
            .get(session_id)
            .is_some_and(|slot| slot.process.is_running())
    }

    /// Drop the slot for `generation` once its exit has been handled.
    ///
    /// Returns false when a newer process already owns the slot.
    pub fn release(&self, session_id: &SessionId, generation: u64) -> bool {
        let mut slots = self.lock_slots();
        match slots.get(session_id) {
            Some(slot) if slot.generation == generation => {
                slots.remove(session_id);
                true
            }
            _ => false,
        }
    }

    pub fn live_sessions(&self) -> Vec<SessionId> {
        self.lock_slots()
            .iter()
            .filter(|(_, slot)| slot.process.is_running())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Stop every live process (shutdown path).
    pub fn cancel_all(&self) {
        for (id, mut slot) in self.lock_slots().drain() {
            if slot.process.stop(StopKind::Cancel) {
                warn!("Cancelled process for session {} at shutdown", id);
            }
        }
    }

    fn lock_slots(&self) -> std::sync::MutexGuard<'_, HashMap<SessionId, Slot>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ExitReason;

    fn orchestrator_with(binary: &Path, shell: &str) -> ProcessOrchestrator {
        let config = CoreConfig {
            shell_prefix: Some(shell.to_string()),
            grace_period_ms: 200,
            arg_threshold_chars: 50,
            ..Default::default()
        };
        ProcessOrchestrator::with_locator(
            Arc::new(config),
            EngineLocator::new().with_override(EngineKind::Claude, binary),
        )
    }

    #[test]
    fn unknown_engine_binary_fails_before_spawn() {
        let orchestrator = ProcessOrchestrator::with_locator(
            Arc::new(CoreConfig::default()),
            EngineLocator::new().with_override(EngineKind::Gemini, "/no/such/gemini"),
        );
        let err = orchestrator
            .start(&SessionId::new(), EngineKind::Gemini, "hi", Path::new("."), None)
            .err()
            .unwrap();
        assert!(matches!(err, CoreError::EngineNotFound { .. }));
    }

    #[test]
    fn cancel_without_process_is_not_running() {
        let orchestrator = ProcessOrchestrator::new(Arc::new(CoreConfig::default()));
        let id = SessionId::new();
        assert!(matches!(orchestrator.cancel(&id), Err(CoreError::NotRunning(_))));
        assert!(!orchestrator.is_alive(&id));
    }

    #[cfg(unix)]
    mod live {
        use super::*;
        use std::os::unix::fs::PermissionsExt;
        use tempfile::TempDir;

        fn script(dir: &TempDir, body: &str) -> std::path::PathBuf {
            let path = dir.path().join("fake-engine");
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        async fn drain(handle: &mut ProcessHandle) -> Vec<ProcessEvent> {
            let mut events = Vec::new();
            while let Some(event) = handle.events.recv().await {
                events.push(event);
            }
            events
        }

        #[tokio::test]
        async fn delivery_switches_at_threshold() {
            let dir = TempDir::new().unwrap();
            let binary = script(&dir, "cat >/dev/null; echo done");
            let orchestrator = orchestrator_with(&binary, "/bin/sh -c");
            let id = SessionId::new();

            let mut short = orchestrator
                .start(&id, EngineKind::Claude, &"a".repeat(49), dir.path(), None)
                .unwrap();
            assert_eq!(short.info.delivery, PromptDelivery::Argument);
            drain(&mut short).await;
            orchestrator.release(&id, short.info.generation);

            let mut long = orchestrator
                .start(&id, EngineKind::Claude, &"a".repeat(50), dir.path(), None)
                .unwrap();
            assert_eq!(long.info.delivery, PromptDelivery::Stdin);
            let events = drain(&mut long).await;
            assert_eq!(events[0], ProcessEvent::Stdout("done".to_string()));
        }

        #[tokio::test]
        async fn cancel_stops_only_the_target_session() {
            let dir = TempDir::new().unwrap();
            let binary = script(&dir, "exec sleep 30");
            let orchestrator = orchestrator_with(&binary, "/bin/sh -c");
            let a = SessionId::new();
            let b = SessionId::new();

            let mut handle_a = orchestrator
                .start(&a, EngineKind::Claude, "x", dir.path(), None)
                .unwrap();
            let _handle_b = orchestrator
                .start(&b, EngineKind::Claude, "x", dir.path(), None)
                .unwrap();

            orchestrator.cancel(&a).unwrap();
            let events = drain(&mut handle_a).await;
            assert_eq!(events, vec![ProcessEvent::Exit(ExitReason::Cancelled)]);
            assert!(orchestrator.release(&a, handle_a.info.generation));
            assert!(!orchestrator.is_alive(&a));
            assert!(orchestrator.is_alive(&b));

            orchestrator.cancel_all();
        }

        #[tokio::test]
        async fn restart_supersedes_previous_process() {
            let dir = TempDir::new().unwrap();
            let binary = script(&dir, "exec sleep 30");
            let orchestrator = orchestrator_with(&binary, "/bin/sh -c");
            let id = SessionId::new();

            let mut first = orchestrator
                .start(&id, EngineKind::Claude, "x", dir.path(), None)
                .unwrap();
            let second = orchestrator
                .start(&id, EngineKind::Claude, "y", dir.path(), None)
                .unwrap();

            let events = drain(&mut first).await;
            assert_eq!(events, vec![ProcessEvent::Exit(ExitReason::Superseded)]);
            assert!(!orchestrator.release(&id, first.info.generation));
            assert!(orchestrator.is_alive(&id));

            orchestrator.cancel(&id).unwrap();
            drop(second);
        }

        #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
        async fn concurrent_starts_leave_one_live_process() {
            let dir = TempDir::new().unwrap();
            let binary = script(&dir, "exec sleep 30");
            let orchestrator = Arc::new(orchestrator_with(&binary, "/bin/sh -c"));
            let id = SessionId::new();

            let starts: Vec<_> = (0..2)
                .map(|_| {
                    let orchestrator = Arc::clone(&orchestrator);
                    let id = id.clone();
                    let root = dir.path().to_path_buf();
                    tokio::spawn(async move {
                        orchestrator
                            .start(&id, EngineKind::Claude, "x", &root, None)
                            .unwrap()
                    })
                })
                .collect();
            let mut handles = Vec::new();
            for start in starts {
                handles.push(start.await.unwrap());
            }
            assert_eq!(orchestrator.live_sessions(), vec![id.clone()]);

            orchestrator.cancel(&id).unwrap();
            let mut exits = Vec::new();
            for handle in &mut handles {
                exits.extend(drain(handle).await);
            }
            exits.sort_by_key(|event| format!("{event:?}"));
            assert_eq!(
                exits,
                vec![
                    ProcessEvent::Exit(ExitReason::Cancelled),
                    ProcessEvent::Exit(ExitReason::Superseded),
                ]
            );
        }
    }
}
