//! Sessions and their isolated event streams.
//!
//! Every event a session produces is delivered only to listeners subscribed
//! to that session's id.

mod dedup;
mod event;
mod registry;
mod state;

pub use dedup::DedupWindow;
pub use event::{SessionEvent, SessionEventKind};
pub use registry::{ListenerId, RunPlan, SessionRegistry};
pub use state::{Session, SessionId, SessionStatus};
