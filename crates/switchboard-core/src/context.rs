//! CoreContext - the shared state behind every inbound command.
//!
//! Front ends (the daemon, a desktop shell, tests) build one context and call
//! its commands; events come back through per-session listeners.
//!
//! ## Architecture
//!
//! ```text
//!                    ┌──────────────────────────┐
//!                    │       CoreContext        │
//!                    ├──────────────────────────┤
//!                    │  - SessionRegistry       │
//!                    │  - ProcessOrchestrator   │
//!                    │  - SessionDriver         │
//!                    │  - CheckpointStore       │
//!                    │  - ToolBridge            │
//!                    └────────────┬─────────────┘
//!                                 │ SessionEvent (per session)
//!                    ┌────────────┴─────────────┐
//!                    ▼                          ▼
//!             ┌─────────────┐           ┌──────────────┐
//!             │   Daemon    │           │ UI / storage │
//!             └─────────────┘           └──────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, info};
use serde_json::{Map, Value};
use tokio::sync::mpsc::UnboundedSender;

use crate::checkpoint::{Checkpoint, CheckpointId, CheckpointStore};
use crate::config::CoreConfig;
use crate::conversation::ToolResult;
use crate::driver::{PromptOutcome, SessionDriver};
use crate::engines::{EngineKind, EngineLocator};
use crate::error::Result;
use crate::paths;
use crate::persistence::{CheckpointRecord, SessionSummary};
use crate::process::ProcessOrchestrator;
use crate::session::{ListenerId, Session, SessionEvent, SessionId, SessionRegistry};
use crate::tools::builtin::{discover_user_commands, HelperTool, SubAgentTool};
use crate::tools::{ToolBridge, ToolDescriptor};

/// Configuration for building a CoreContext.
#[derive(Default)]
pub struct CoreContextBuilder {
    config: Option<CoreConfig>,
    locator: Option<EngineLocator>,
    command_roots: Vec<PathBuf>,
    home_dir: Option<PathBuf>,
    bridge: Option<Arc<ToolBridge>>,
}

impl CoreContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: CoreConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use a prepared locator instead of one built from the config.
    pub fn locator(mut self, locator: EngineLocator) -> Self {
        self.locator = Some(locator);
        self
    }

    /// Discover `.claude/commands` under this project at build time.
    pub fn command_root(mut self, project_root: PathBuf) -> Self {
        self.command_roots.push(project_root);
        self
    }

    /// Home directory for user-level commands (defaults to `$HOME`).
    pub fn home_dir(mut self, dir: PathBuf) -> Self {
        self.home_dir = Some(dir);
        self
    }

    /// Use an existing ToolBridge (for testing or custom handlers).
    pub fn bridge(mut self, bridge: Arc<ToolBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    pub fn build(self) -> CoreContext {
        let config = Arc::new(self.config.unwrap_or_default());
        let locator = self
            .locator
            .unwrap_or_else(|| EngineLocator::from_config(&config));
        let registry = Arc::new(SessionRegistry::from_config(&config));
        let orchestrator = Arc::new(ProcessOrchestrator::with_locator(
            Arc::clone(&config),
            locator,
        ));
        let bridge = self.bridge.unwrap_or_default();
        let driver = SessionDriver::new(Arc::clone(&registry), Arc::clone(&orchestrator))
            .with_bridge(Arc::clone(&bridge));
        let checkpoints = Arc::new(CheckpointStore::new(config.replay_max_chars));

        for helper in &config.helpers {
            let tool = HelperTool::new(helper.clone());
            bridge.register_tool(tool.descriptor(), Arc::new(tool));
        }
        for agent in &config.sub_agents {
            let tool = SubAgentTool::new(agent.clone());
            bridge.register_tool(tool.descriptor(), Arc::new(tool));
        }
        let home = self.home_dir.or_else(paths::home_dir);
        for root in &self.command_roots {
            for command in discover_user_commands(root, home.as_deref()) {
                debug!("Registering user command /{}", command.name);
                bridge.register_tool(command.descriptor(), Arc::new(command));
            }
        }
        info!("Core ready with {} tool(s)", bridge.len());

        CoreContext {
            config,
            registry,
            orchestrator,
            driver,
            checkpoints,
            bridge,
        }
    }
}

/// Central shared state for all execution-core commands.
///
/// All fields use `Arc`, so cloning the context just clones the pointers.
#[derive(Clone)]
pub struct CoreContext {
    pub config: Arc<CoreConfig>,
    pub registry: Arc<SessionRegistry>,
    pub orchestrator: Arc<ProcessOrchestrator>,
    pub driver: SessionDriver,
    pub checkpoints: Arc<CheckpointStore>,
    pub bridge: Arc<ToolBridge>,
}

impl CoreContext {
    pub fn builder() -> CoreContextBuilder {
        CoreContextBuilder::new()
    }

    /// Create a session and run its first prompt.
    pub fn start_session(
        &self,
        engine: EngineKind,
        project_root: PathBuf,
        prompt: &str,
    ) -> Result<SessionId> {
        self.driver.start_session(engine, project_root, prompt)
    }

    /// `start_session` with a listener that sees the session's very first event.
    pub fn start_session_with_listener(
        &self,
        engine: EngineKind,
        project_root: PathBuf,
        prompt: &str,
        listener: UnboundedSender<SessionEvent>,
    ) -> Result<(SessionId, ListenerId)> {
        self.driver
            .start_session_with_listener(engine, project_root, prompt, listener)
    }

    /// Run a prompt, queued behind the active run if there is one.
    pub fn send_prompt(&self, session_id: &SessionId, prompt: &str) -> Result<PromptOutcome> {
        self.driver.send_prompt(session_id, prompt)
    }

    pub fn cancel(&self, session_id: &SessionId) -> Result<()> {
        self.driver.cancel(session_id)
    }

    pub fn is_alive(&self, session_id: &SessionId) -> bool {
        self.driver.is_alive(session_id)
    }

    pub fn create_checkpoint(&self, session_id: &SessionId, label: &str) -> Result<CheckpointId> {
        self.checkpoints
            .create_checkpoint(&self.registry, session_id, label)
    }

    pub fn list_checkpoints(&self, session_id: &SessionId) -> Vec<Arc<Checkpoint>> {
        self.checkpoints.list_checkpoints(session_id)
    }

    /// New session seeded from the checkpoint; it idles until its first prompt.
    pub fn fork(&self, checkpoint_id: &CheckpointId) -> Result<SessionId> {
        self.checkpoints.fork_from(&self.registry, checkpoint_id)
    }

    pub fn restore(&self, checkpoint_id: &CheckpointId) -> Result<SessionId> {
        self.checkpoints.restore(&self.registry, checkpoint_id)
    }

    /// Execute a registered tool for a session, natively or simulated
    /// depending on the session's engine.
    pub async fn invoke_tool(
        &self,
        tool_name: &str,
        arguments: Map<String, Value>,
        session_id: &SessionId,
    ) -> Result<ToolResult> {
        let engine = self
            .registry
            .read(session_id, |session| session.engine_kind)?;
        self.bridge
            .execute(tool_name, arguments, session_id, engine, &self.driver)
            .await
    }

    pub fn list_tools(&self, engine: EngineKind) -> Vec<ToolDescriptor> {
        self.bridge.list_available(engine)
    }

    pub fn subscribe(
        &self,
        session_id: &SessionId,
        listener: UnboundedSender<SessionEvent>,
    ) -> Result<ListenerId> {
        self.registry.subscribe(session_id, listener)
    }

    pub fn unsubscribe(&self, session_id: &SessionId, listener: ListenerId) -> Result<bool> {
        self.registry.unsubscribe(session_id, listener)
    }

    pub fn snapshot(&self, session_id: &SessionId) -> Result<Session> {
        self.registry.snapshot(session_id)
    }

    pub fn list_sessions(&self) -> Vec<SessionId> {
        self.registry.list_sessions()
    }

    /// Drop an idle session, returning the summary for the storage layer.
    pub fn archive_session(&self, session_id: &SessionId) -> Result<SessionSummary> {
        self.driver.archive_session(session_id)
    }

    pub fn checkpoint_record(&self, checkpoint_id: &CheckpointId) -> Result<CheckpointRecord> {
        self.checkpoints.checkpoint_record(checkpoint_id)
    }

    /// Load checkpoints handed back by the storage layer.
    pub fn import_checkpoints(&self, records: impl IntoIterator<Item = CheckpointRecord>) -> usize {
        records
            .into_iter()
            .map(|record| self.checkpoints.import(record))
            .filter(|imported| *imported)
            .count()
    }

    /// Cancel every live process.
    pub fn shutdown(&self) {
        self.driver.shutdown();
    }
}

impl Default for CoreContext {
    fn default() -> Self {
        Self::builder().build()
    }
}
