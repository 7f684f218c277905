//! Engine subprocess management.

mod orchestrator;
mod spawn;

pub use orchestrator::{ProcessHandle, ProcessInfo, ProcessOrchestrator};
pub use spawn::{
    EngineProcess, ExitReason, ProcessEvent, PromptDelivery, SpawnConfig, SpawnError, StopKind,
};
