//! One adapter per engine kind, picked from its static capabilities.

use std::future::Future;
use std::pin::Pin;
use std::time::Instant;

use log::{debug, warn};

use super::bridge::SessionPort;
use super::call::{CallState, ToolCall};
use super::simulate::{extract_result, rewrite_prompt};
use super::{ExecutionMode, ToolContext, ToolDescriptor, ToolOutput};
use crate::conversation::{DiagnosticKind, Role, ToolResult, TurnContent};
use crate::engines::EngineKind;
use crate::error::{CoreError, Result};

pub type AdapterFuture<'a> = Pin<Box<dyn Future<Output = Result<ToolResult>> + Send + 'a>>;

/// Carries a dispatched call to an executed, standardized result.
pub trait EngineAdapter: Send + Sync {
    fn engine(&self) -> EngineKind;

    fn mode(&self) -> ExecutionMode;

    /// Tools from `registered` this engine can use.
    fn list_available(&self, registered: &[ToolDescriptor]) -> Vec<ToolDescriptor> {
        registered
            .iter()
            .filter(|d| d.is_available_on(self.engine()))
            .cloned()
            .collect()
    }

    /// Run the dispatched call with the handler's `output`. Leaves the call executed.
    fn execute<'a>(
        &'a self,
        ctx: &'a ToolContext,
        descriptor: &'a ToolDescriptor,
        call: &'a mut ToolCall,
        output: ToolOutput,
        port: &'a dyn SessionPort,
    ) -> AdapterFuture<'a>;

    /// Hand the standardized result to the session.
    fn deliver(
        &self,
        ctx: &ToolContext,
        call: &ToolCall,
        result: &ToolResult,
        port: &dyn SessionPort,
    ) -> Result<()>;
}

pub(super) fn advance(
    call: &mut ToolCall,
    next: CallState,
    ctx: &ToolContext,
    port: &dyn SessionPort,
) -> Result<()> {
    call.advance(next)?;
    port.publish_call(&ctx.session_id, call)
}

fn record_invocation(ctx: &ToolContext, call: &mut ToolCall, port: &dyn SessionPort) -> Result<()> {
    if call.recorded {
        return Ok(());
    }
    port.record_invocation(&ctx.session_id, call.invocation())?;
    call.recorded = true;
    Ok(())
}

fn record_result(ctx: &ToolContext, result: &ToolResult, port: &dyn SessionPort) -> Result<()> {
    port.record_result(&ctx.session_id, result.clone())
}

/// Engines that speak structured tool calls. Results pass through unchanged.
#[derive(Debug, Clone, Copy)]
pub struct NativeAdapter {
    engine: EngineKind,
}

impl NativeAdapter {
    pub fn new(engine: EngineKind) -> Self {
        Self { engine }
    }
}

impl EngineAdapter for NativeAdapter {
    fn engine(&self) -> EngineKind {
        self.engine
    }

    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Native
    }

    fn execute<'a>(
        &'a self,
        ctx: &'a ToolContext,
        _descriptor: &'a ToolDescriptor,
        call: &'a mut ToolCall,
        output: ToolOutput,
        port: &'a dyn SessionPort,
    ) -> AdapterFuture<'a> {
        Box::pin(async move {
            record_invocation(ctx, call, port)?;
            advance(call, CallState::NativeExecuted, ctx, port)?;
            Ok(ToolResult {
                invocation_id: call.invocation_id.clone(),
                output: output.text,
                is_error: output.is_error,
            })
        })
    }

    fn deliver(
        &self,
        ctx: &ToolContext,
        call: &ToolCall,
        result: &ToolResult,
        port: &dyn SessionPort,
    ) -> Result<()> {
        record_result(ctx, result, port)?;
        // The engine's stdin is closed once a run starts, so the result rides
        // along with the next prompt on the resumed conversation.
        let label = if result.is_error { "failed" } else { "returned" };
        port.inject(
            &ctx.session_id,
            &format!(
                "Tool `{}` (call {}) {}:\n{}",
                call.tool_name, call.invocation_id, label, result.output
            ),
        )
    }
}

/// Engines without structured tool calls: prompt rewriting plus reply scanning.
#[derive(Debug, Clone, Copy)]
pub struct SimulatedAdapter {
    engine: EngineKind,
}

impl SimulatedAdapter {
    pub fn new(engine: EngineKind) -> Self {
        Self { engine }
    }
}

impl EngineAdapter for SimulatedAdapter {
    fn engine(&self) -> EngineKind {
        self.engine
    }

    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Simulated
    }

    fn execute<'a>(
        &'a self,
        ctx: &'a ToolContext,
        descriptor: &'a ToolDescriptor,
        call: &'a mut ToolCall,
        output: ToolOutput,
        port: &'a dyn SessionPort,
    ) -> AdapterFuture<'a> {
        Box::pin(async move {
            record_invocation(ctx, call, port)?;
            let prompt = rewrite_prompt(descriptor, call, &output);

            let waiting = Instant::now();
            let reply = port.prompt_and_collect(&ctx.session_id, prompt).await?;
            call.waited += waiting.elapsed();
            advance(call, CallState::SimulatedExecuted, ctx, port)?;

            match extract_result(&reply, &call.invocation_id) {
                Some(text) => {
                    debug!("Extracted simulated result for {}", call.invocation_id);
                    Ok(ToolResult {
                        invocation_id: call.invocation_id.clone(),
                        output: text,
                        is_error: output.is_error,
                    })
                }
                None => {
                    warn!(
                        "No delimited result for {} call {} in {} reply",
                        call.tool_name, call.invocation_id, self.engine
                    );
                    port.append_turn(
                        &ctx.session_id,
                        Role::System,
                        TurnContent::diagnostic(
                            DiagnosticKind::SimulationParseError,
                            format!(
                                "no delimited result for {} call {}; reply kept as plain text",
                                call.tool_name, call.invocation_id
                            ),
                            Some(reply),
                        ),
                    )?;
                    Err(CoreError::SimulationParse {
                        tool_name: call.tool_name.clone(),
                        invocation_id: call.invocation_id.clone(),
                    })
                }
            }
        })
    }

    fn deliver(
        &self,
        ctx: &ToolContext,
        _call: &ToolCall,
        result: &ToolResult,
        port: &dyn SessionPort,
    ) -> Result<()> {
        // The engine already saw the output in the rewritten prompt.
        record_result(ctx, result, port)
    }
}
