//! Tool registry and the per-call driver.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde_json::{Map, Value};

use super::adapter::{advance, EngineAdapter, NativeAdapter, SimulatedAdapter};
use super::call::{CallState, ToolCall};
use super::{ExecutionMode, ToolContext, ToolDescriptor, ToolHandler, ToolOutput};
use crate::conversation::{Role, ToolInvocation, ToolResult, Turn, TurnContent};
use crate::engines::EngineKind;
use crate::error::{CoreError, Result};
use crate::session::SessionId;

/// Bridge overhead above this is logged as a warning.
const OVERHEAD_BUDGET: Duration = Duration::from_millis(100);

pub type PromptFuture<'a> = Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;

/// The bridge's view of a session.
pub trait SessionPort: Send + Sync {
    fn append_turn(&self, session_id: &SessionId, role: Role, content: TurnContent) -> Result<Turn>;

    /// Record the assistant-side invocation of a call the bridge started.
    fn record_invocation(&self, session_id: &SessionId, invocation: ToolInvocation) -> Result<()>;

    /// Pair a standardized result with its invocation.
    fn record_result(&self, session_id: &SessionId, result: ToolResult) -> Result<()>;

    /// Publish the call's current state on the session's event stream.
    fn publish_call(&self, session_id: &SessionId, call: &ToolCall) -> Result<()>;

    /// Queue text for the engine to see with the next prompt.
    fn inject(&self, session_id: &SessionId, text: &str) -> Result<()>;

    fn project_root(&self, session_id: &SessionId) -> Result<PathBuf>;

    /// Send `prompt` (queued behind a busy run) and resolve with the run's
    /// assistant text once its process exits.
    fn prompt_and_collect<'a>(
        &'a self,
        session_id: &'a SessionId,
        prompt: String,
    ) -> PromptFuture<'a>;
}

struct RegisteredTool {
    descriptor: ToolDescriptor,
    handler: Arc<dyn ToolHandler>,
}

pub struct ToolBridge {
    tools: RwLock<HashMap<String, Arc<RegisteredTool>>>,
    adapters: HashMap<EngineKind, Arc<dyn EngineAdapter>>,
}

impl ToolBridge {
    pub fn new() -> Self {
        let adapters = EngineKind::ALL
            .iter()
            .map(|kind| {
                let adapter: Arc<dyn EngineAdapter> = if kind.capabilities().native_tools {
                    Arc::new(NativeAdapter::new(*kind))
                } else {
                    Arc::new(SimulatedAdapter::new(*kind))
                };
                (*kind, adapter)
            })
            .collect();
        Self {
            tools: RwLock::new(HashMap::new()),
            adapters,
        }
    }

    /// Add or replace a tool. Active sessions see it on their next call.
    pub fn register_tool(&self, descriptor: ToolDescriptor, handler: Arc<dyn ToolHandler>) {
        let name = descriptor.name.clone();
        let replaced = self
            .tools
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(name.clone(), Arc::new(RegisteredTool { descriptor, handler }))
            .is_some();
        if replaced {
            info!("Replaced tool {}", name);
        } else {
            debug!("Registered tool {}", name);
        }
    }

    pub fn descriptor(&self, tool_name: &str) -> Option<ToolDescriptor> {
        self.lookup(tool_name).map(|tool| tool.descriptor.clone())
    }

    pub fn is_registered(&self, tool_name: &str) -> bool {
        self.read_tools().contains_key(tool_name)
    }

    pub fn len(&self) -> usize {
        self.read_tools().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_tools().is_empty()
    }

    /// Tools usable on `engine`, sorted by name.
    pub fn list_available(&self, engine: EngineKind) -> Vec<ToolDescriptor> {
        let mut registered: Vec<ToolDescriptor> = self
            .read_tools()
            .values()
            .map(|tool| tool.descriptor.clone())
            .collect();
        registered.sort_by(|a, b| a.name.cmp(&b.name));
        self.adapter(engine).list_available(&registered)
    }

    pub fn adapter(&self, engine: EngineKind) -> Arc<dyn EngineAdapter> {
        match self.adapters.get(&engine) {
            Some(adapter) => Arc::clone(adapter),
            None => Arc::new(SimulatedAdapter::new(engine)),
        }
    }

    /// Run `tool_name` for a session and deliver its standardized result.
    pub async fn execute(
        &self,
        tool_name: &str,
        arguments: Map<String, Value>,
        session_id: &SessionId,
        engine_kind: EngineKind,
        port: &dyn SessionPort,
    ) -> Result<ToolResult> {
        let mut call = ToolCall::new(tool_name, arguments);
        self.settle(&mut call, session_id, engine_kind, port).await
    }

    /// Carry out an invocation the engine emitted in its own stream. The
    /// invocation turn is already recorded under the engine's id.
    pub async fn dispatch(
        &self,
        invocation: ToolInvocation,
        session_id: &SessionId,
        engine_kind: EngineKind,
        port: &dyn SessionPort,
    ) -> Result<ToolResult> {
        let mut call = ToolCall::from_engine(invocation);
        self.settle(&mut call, session_id, engine_kind, port).await
    }

    /// Run the call; a recorded invocation whose call fails before delivery
    /// is paired with an error result.
    async fn settle(
        &self,
        call: &mut ToolCall,
        session_id: &SessionId,
        engine_kind: EngineKind,
        port: &dyn SessionPort,
    ) -> Result<ToolResult> {
        let outcome = self.run(call, session_id, engine_kind, port).await;
        if let Err(e) = &outcome {
            let delivered = matches!(call.state, CallState::Standardized | CallState::Delivered);
            if call.recorded && !delivered {
                warn!("{} call {} failed: {}", call.tool_name, call.invocation_id, e);
                port.record_result(
                    session_id,
                    ToolResult {
                        invocation_id: call.invocation_id.clone(),
                        output: e.to_string(),
                        is_error: true,
                    },
                )?;
            }
        }
        outcome
    }

    async fn run(
        &self,
        call: &mut ToolCall,
        session_id: &SessionId,
        engine_kind: EngineKind,
        port: &dyn SessionPort,
    ) -> Result<ToolResult> {
        let tool = self
            .lookup(&call.tool_name)
            .ok_or_else(|| CoreError::ToolNotFound(call.tool_name.clone()))?;
        if !tool.descriptor.is_available_on(engine_kind) {
            return Err(CoreError::ToolUnavailable {
                tool: call.tool_name.clone(),
                engine: engine_kind,
            });
        }
        let ctx = ToolContext {
            session_id: session_id.clone(),
            engine_kind,
            project_root: port.project_root(session_id)?,
        };

        let started = Instant::now();
        port.publish_call(session_id, call)?;
        advance(call, CallState::Dispatched, &ctx, port)?;

        let working = Instant::now();
        let output = tool.handler.invoke(&call.arguments, &ctx).await;
        call.waited += working.elapsed();

        let adapter: Arc<dyn EngineAdapter> = match tool.descriptor.execution_mode(engine_kind) {
            ExecutionMode::Native => self.adapter(engine_kind),
            ExecutionMode::Simulated => Arc::new(SimulatedAdapter::new(engine_kind)),
        };
        debug!(
            "Dispatching {} call {} on {} ({:?})",
            call.tool_name,
            call.invocation_id,
            engine_kind,
            adapter.mode()
        );

        let outcome = self
            .finish_call(adapter.as_ref(), &ctx, &tool.descriptor, call, output, port)
            .await;
        log_overhead(call, started.elapsed());
        outcome
    }

    async fn finish_call(
        &self,
        adapter: &dyn EngineAdapter,
        ctx: &ToolContext,
        descriptor: &ToolDescriptor,
        call: &mut ToolCall,
        output: ToolOutput,
        port: &dyn SessionPort,
    ) -> Result<ToolResult> {
        let result = adapter.execute(ctx, descriptor, call, output, port).await?;
        advance(call, CallState::Standardized, ctx, port)?;
        adapter.deliver(ctx, call, &result, port)?;
        advance(call, CallState::Delivered, ctx, port)?;
        Ok(result)
    }

    fn lookup(&self, tool_name: &str) -> Option<Arc<RegisteredTool>> {
        self.read_tools().get(tool_name).cloned()
    }

    fn read_tools(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<RegisteredTool>>> {
        self.tools.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for ToolBridge {
    fn default() -> Self {
        Self::new()
    }
}

fn log_overhead(call: &ToolCall, total: Duration) {
    let overhead = total.saturating_sub(call.waited);
    if overhead > OVERHEAD_BUDGET {
        warn!(
            "Bridge overhead for {} call {} was {}ms",
            call.tool_name,
            call.invocation_id,
            overhead.as_millis()
        );
    } else {
        debug!(
            "Bridge overhead for {} call {}: {}us",
            call.tool_name,
            call.invocation_id,
            overhead.as_micros()
        );
    }
}
