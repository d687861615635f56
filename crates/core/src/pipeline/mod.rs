//! # Pipeline
//!
//! Session lifecycle and the machinery that drives it:
//!
//! - `session` - state machine, request and per-stage results
//! - `stage_runner` - one stage under its time limit
//! - `orchestrator` - the sequential stage chain plus deployment
//! - `events` - progress stream for front-ends
//! - `summary` - read-only digest for display and archiving

pub mod events;
pub mod orchestrator;
pub mod session;
pub mod stage_runner;
pub mod summary;


pub use events::{ProgressEvent, ProgressKind};
pub use orchestrator::{Orchestrator, DEFAULT_PROJECT_TYPE};
pub use session::{
    FailedAt, FailureReason, ProjectRequest, Session, SessionId, SessionState, StageResult, TransitionError,
};
pub use stage_runner::StageRunner;
pub use summary::{SearchCounts, SessionSummary, StageSummary};
