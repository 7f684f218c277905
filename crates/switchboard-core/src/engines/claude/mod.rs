//! Claude Code CLI (`claude -p --output-format stream-json`).

mod decode;
mod spawn;
pub mod types;

pub use decode::decode_line;
pub use spawn::build_invocation;
