//! Gemini CLI (`gemini --output-format stream-json`).
//!
//! One process per prompt; tool calls for bridge tools go through the
//! simulated path because the CLI has no structured tool-result input.

mod decode;
mod spawn;
pub mod types;

pub use decode::decode_line;
pub use spawn::build_invocation;
