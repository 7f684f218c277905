//! Reference storage for session summaries and checkpoint records.
//!
//! The core never requires this module; a storage layer can hand the flat
//! records to any backend. These helpers write one JSON file per record
//! using write-then-rename.

mod records;
mod store;

pub use records::{CheckpointRecord, SessionSummary};
pub use store::{
    load_checkpoint_record, load_checkpoint_records, load_session_summary,
    save_checkpoint_record, save_session_summary, PersistenceError,
};
