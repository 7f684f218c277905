//! Conversation model and stream parsing.
//!
//! Engine stdout is decoded per dialect into [`StreamRecord`]s, then fed
//! through a [`StreamParser`] that appends [`Turn`]s to a [`Transcript`].

mod parser;
pub(crate) mod record;
mod transcript;
mod turn;

pub use parser::{ParsedEvent, StreamParser};
pub use record::{ContentBlock, DecodeError, StreamRecord};
pub use transcript::Transcript;
pub use turn::{
    DiagnosticKind, Role, TokenUsage, ToolInvocation, ToolResult, Turn, TurnContent, TurnMetadata,
    UsageTotals,
};
