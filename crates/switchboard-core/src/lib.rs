//! # switchboard-core
//!
//! Execution core for a desktop assistant that drives command-line AI
//! engines (Claude Code, Gemini CLI).
//!
//! This crate is framework-agnostic and can be used by:
//! - the `switchboard-daemon` command-line front end
//! - a desktop shell (via commands on [`CoreContext`])
//! - tests, with fake engine scripts
//!
//! ## Key Concepts
//!
//! - **Session**: a conversation with one engine, at most one live process at a time
//! - **Turn**: one entry in a session's transcript (text, tool call, tool result, metadata)
//! - **Checkpoint**: an immutable transcript snapshot that new sessions fork from
//! - **Tool**: a helper, sub-agent or user command, run natively or simulated per engine
//! - **SessionEvent**: what listeners of one session receive

pub mod checkpoint;
pub mod config;
pub mod context;
pub mod conversation;
pub mod driver;
pub mod engines;
pub mod error;
pub mod logging;
pub mod paths;
pub mod persistence;
pub mod process;
pub mod session;
pub mod shell;
pub mod tools;

// Re-export commonly used types
pub use checkpoint::{Checkpoint, CheckpointId};
pub use config::CoreConfig;
pub use context::{CoreContext, CoreContextBuilder};
pub use conversation::{Role, Turn, TurnContent};
pub use driver::{PromptOutcome, SessionDriver};
pub use engines::EngineKind;
pub use error::{CoreError, Result};
pub use session::{Session, SessionEvent, SessionEventKind, SessionId, SessionStatus};
pub use tools::{ToolBridge, ToolDescriptor};
