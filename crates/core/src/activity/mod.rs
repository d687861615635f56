//! # Activity
//!
//! The audit ledger of a pipeline run: every stage and search transition,
//! ordered by a sequence number assigned at append time.

pub mod log;
pub mod recorder;

pub use log::{ActivityLog, LogEntry, LogKind, LogSnapshot, NewLogEntry, Sequence};
pub use recorder::SessionRecorder;
