//! Universal tool bridge.
//!
//! Tools are registered once with a [`ToolDescriptor`] and a [`ToolHandler`].
//! A call runs natively on engines with structured tool calling and is
//! simulated through prompt rewriting everywhere else; either way the caller
//! gets the same [`ToolResult`](crate::conversation::ToolResult) back.

mod adapter;
mod bridge;
pub mod builtin;
mod call;
mod simulate;

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::engines::EngineKind;
use crate::session::SessionId;

pub use adapter::{EngineAdapter, NativeAdapter, SimulatedAdapter};
pub use bridge::{PromptFuture, SessionPort, ToolBridge};
pub use call::{CallState, ToolCall};
pub use simulate::{
    advertise_tools, extract_result, parse_tool_requests, rewrite_prompt, ToolRequest,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    Helper,
    SubAgent,
    UserCommand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityFlag {
    ReadOnly,
    WritesFiles,
    Network,
    /// Only usable where the engine executes tools natively.
    RequiresNative,
}

/// How a call is carried out on a given engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Native,
    Simulated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    pub kind: ToolKind,
    #[serde(default)]
    pub description: String,
    /// JSON schema of the arguments, embedded into simulated prompts.
    #[serde(default = "empty_schema")]
    pub schema: Value,
    #[serde(default)]
    pub capability_flags: BTreeSet<CapabilityFlag>,
    /// Per-engine override; a missing entry follows the engine's capability.
    #[serde(default)]
    pub native_support: HashMap<EngineKind, bool>,
}

fn empty_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, kind: ToolKind) -> Self {
        Self {
            name: name.into(),
            kind,
            description: String::new(),
            schema: empty_schema(),
            capability_flags: BTreeSet::new(),
            native_support: HashMap::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_flag(mut self, flag: CapabilityFlag) -> Self {
        self.capability_flags.insert(flag);
        self
    }

    pub fn with_native_support(mut self, engine: EngineKind, native: bool) -> Self {
        self.native_support.insert(engine, native);
        self
    }

    pub fn has_flag(&self, flag: CapabilityFlag) -> bool {
        self.capability_flags.contains(&flag)
    }

    /// Static lookup: engine capability, narrowed by the descriptor's override.
    pub fn execution_mode(&self, engine: EngineKind) -> ExecutionMode {
        let native = engine.capabilities().native_tools
            && self.native_support.get(&engine).copied().unwrap_or(true);
        if native {
            ExecutionMode::Native
        } else {
            ExecutionMode::Simulated
        }
    }

    pub fn is_available_on(&self, engine: EngineKind) -> bool {
        !(self.has_flag(CapabilityFlag::RequiresNative)
            && self.execution_mode(engine) == ExecutionMode::Simulated)
    }
}

/// What a handler produced, before standardization.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub text: String,
    pub is_error: bool,
    pub structured: Option<Value>,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
            structured: None,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: true,
            structured: None,
        }
    }

    pub fn structured(value: Value) -> Self {
        Self {
            text: value.to_string(),
            is_error: false,
            structured: Some(value),
        }
    }
}

/// Where a call is running.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub session_id: SessionId,
    pub engine_kind: EngineKind,
    pub project_root: PathBuf,
}

pub type ToolFuture<'a> = Pin<Box<dyn Future<Output = ToolOutput> + Send + 'a>>;

/// The tool's own work. Failures are reported as `ToolOutput::error`.
pub trait ToolHandler: Send + Sync {
    fn invoke<'a>(
        &'a self,
        arguments: &'a Map<String, Value>,
        ctx: &'a ToolContext,
    ) -> ToolFuture<'a>;
}
