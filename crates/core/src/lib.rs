//! # Guild Core
//!
//! The pipeline engine behind Guild: a fixed roster of roles (product
//! manager, architect, project manager, engineer, QA, deployer) turns a
//! one-line project request into a packaged project. Each role grounds its
//! work in web searches, and every search and stage transition lands in an
//! append-only activity log.
//!
//! ## Architecture
//!
//! - `pipeline/` - Session state machine, stage runner and orchestrator
//! - `roles/` - Roster, stage specs and the per-stage role task
//! - `search/` - Search providers and the logging `SearchClient`
//! - `activity/` - The ordered activity log
//! - `generation/` - LLM generation behind the `Generator` trait
//! - `deploy/` - Artifact extraction, project-type builders and the local preview server
//! - `archive` - SQLite history of finished sessions
//! - `config` / `models` - Pipeline and provider configuration
//!
//! ## Usage
//!
//! ```rust,ignore
//! use guild_core::config::PipelineConfig;
//! use guild_core::pipeline::{Orchestrator, ProjectRequest};
//!
//! let config = PipelineConfig::default();
//! let orchestrator = Orchestrator::from_config(&config)?;
//! let session = orchestrator.run(ProjectRequest::new("todo list")?).await;
//! println!("{}", orchestrator.summarize(&session).render());
//! ```

pub mod activity;
pub mod archive;
pub mod config;
pub mod deploy;
pub mod error;
pub mod generation;
pub mod models;
pub mod pipeline;
pub mod roles;
pub mod search;

#[cfg(test)]
pub(crate) mod test_support;

pub use activity::{ActivityLog, LogEntry, LogKind};
pub use archive::SessionArchive;
pub use config::PipelineConfig;
pub use pipeline::{Orchestrator, ProgressEvent, ProjectRequest, Session, SessionId, SessionSummary};
