//! Per-call lifecycle.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::conversation::ToolInvocation;
use crate::error::{CoreError, Result};

/// `requested → dispatched → {native_executed | simulated_executed} → standardized → delivered`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    Requested,
    Dispatched,
    NativeExecuted,
    SimulatedExecuted,
    Standardized,
    Delivered,
}

impl CallState {
    pub fn can_advance_to(&self, next: CallState) -> bool {
        use CallState::*;
        matches!(
            (self, next),
            (Requested, Dispatched)
                | (Dispatched, NativeExecuted)
                | (Dispatched, SimulatedExecuted)
                | (NativeExecuted, Standardized)
                | (SimulatedExecuted, Standardized)
                | (Standardized, Delivered)
        )
    }
}

/// One tool call moving through the bridge.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub invocation_id: String,
    pub tool_name: String,
    pub arguments: Map<String, Value>,
    pub state: CallState,
    /// Time spent waiting on the handler or the engine, excluded from bridge overhead.
    pub waited: Duration,
    /// The invocation turn is in the transcript. Engine-requested calls start out recorded.
    pub recorded: bool,
}

impl ToolCall {
    pub fn new(tool_name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            invocation_id: format!("call_{}", Uuid::new_v4().simple()),
            tool_name: tool_name.into(),
            arguments,
            state: CallState::Requested,
            waited: Duration::ZERO,
            recorded: false,
        }
    }

    /// A call the engine requested, keeping the engine's invocation id.
    pub fn from_engine(invocation: ToolInvocation) -> Self {
        Self {
            invocation_id: invocation.invocation_id,
            tool_name: invocation.tool_name,
            arguments: invocation.arguments,
            state: CallState::Requested,
            waited: Duration::ZERO,
            recorded: true,
        }
    }

    pub fn advance(&mut self, next: CallState) -> Result<()> {
        if !self.state.can_advance_to(next) {
            return Err(CoreError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    pub fn invocation(&self) -> ToolInvocation {
        ToolInvocation {
            tool_name: self.tool_name.clone(),
            arguments: self.arguments.clone(),
            invocation_id: self.invocation_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_path_is_legal() {
        let mut call = ToolCall::new("lint", Map::new());
        for next in [
            CallState::Dispatched,
            CallState::NativeExecuted,
            CallState::Standardized,
            CallState::Delivered,
        ] {
            call.advance(next).unwrap();
        }
        assert_eq!(call.state, CallState::Delivered);
    }

    #[test]
    fn skipping_a_state_is_rejected() {
        let mut call = ToolCall::new("lint", Map::new());
        let err = call.advance(CallState::Standardized).unwrap_err();
        assert!(matches!(
            err,
            CoreError::InvalidTransition {
                from: CallState::Requested,
                to: CallState::Standardized
            }
        ));
        assert_eq!(call.state, CallState::Requested);
    }

    #[test]
    fn cannot_execute_both_ways() {
        let mut call = ToolCall::new("lint", Map::new());
        call.advance(CallState::Dispatched).unwrap();
        call.advance(CallState::SimulatedExecuted).unwrap();
        assert!(call.advance(CallState::NativeExecuted).is_err());
    }

    #[test]
    fn engine_requested_call_keeps_engine_id() {
        let call = ToolCall::from_engine(ToolInvocation {
            tool_name: "reviewer".to_string(),
            arguments: Map::new(),
            invocation_id: "toolu_01".to_string(),
        });
        assert!(call.recorded);
        assert_eq!(call.invocation().invocation_id, "toolu_01");
        assert_eq!(call.state, CallState::Requested);
    }

    #[test]
    fn invocation_ids_fit_the_result_delimiter() {
        let call = ToolCall::new("lint", Map::new());
        assert!(call
            .invocation_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'));
    }
}
