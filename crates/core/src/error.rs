//! # Error Taxonomy
//!
//! Typed failures for every layer of the pipeline. Each kind renders its
//! name verbatim so a terminal `session_failed` event can tell a grounding
//! problem from a generation or packaging problem.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Kind of a failed search call. Never fatal to a stage on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Error)]
pub enum SearchErrorKind {
    #[error("ProviderUnavailable")]
    ProviderUnavailable,
    #[error("RateLimited")]
    RateLimited,
    #[error("InvalidQuery")]
    InvalidQuery,
    #[error("Timeout")]
    Timeout,
    /// Cut short by session cancellation or a stage timeout
    #[error("Cancelled")]
    Cancelled,
}

/// A failed search call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct SearchError {
    pub kind: SearchErrorKind,
    pub message: String,
}

impl SearchError {
    pub fn new(kind: SearchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(SearchErrorKind::ProviderUnavailable, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(SearchErrorKind::RateLimited, message)
    }

    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::new(SearchErrorKind::InvalidQuery, message)
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            SearchErrorKind::Timeout,
            format!("no response within {}ms", after.as_millis()),
        )
    }

    pub fn cancelled() -> Self {
        Self::new(SearchErrorKind::Cancelled, "search cancelled")
    }
}

/// Failure of the external generation collaborator
#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    #[error("missing credentials: {0} is not set")]
    MissingCredentials(String),
    #[error("provider request failed: {0}")]
    Provider(String),
    #[error("provider returned an empty response")]
    EmptyResponse,
}

/// Failure of one role's unit of work. Always fatal to its stage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoleTaskError {
    #[error("GenerationFailed: {0}")]
    GenerationFailed(String),
    #[error("InvalidInput: missing output of {}", missing.join(", "))]
    InvalidInput { missing: Vec<String> },
    #[error("GroundingUnavailable: all {attempted} searches failed")]
    GroundingUnavailable { attempted: usize },
    #[error("Cancelled")]
    Cancelled,
}

impl From<GenerationError> for RoleTaskError {
    fn from(err: GenerationError) -> Self {
        RoleTaskError::GenerationFailed(err.to_string())
    }
}

/// Failure of a stage as seen by the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
    #[error(transparent)]
    Task(#[from] RoleTaskError),
    #[error("StageTimeout: no result within {}ms", after.as_millis())]
    Timeout { after: Duration },
}

impl StageError {
    pub fn kind(&self) -> FailureKind {
        match self {
            StageError::Task(RoleTaskError::GenerationFailed(_)) => FailureKind::GenerationFailed,
            StageError::Task(RoleTaskError::InvalidInput { .. }) => FailureKind::InvalidInput,
            StageError::Task(RoleTaskError::GroundingUnavailable { .. }) => {
                FailureKind::GroundingUnavailable
            }
            StageError::Task(RoleTaskError::Cancelled) => FailureKind::Cancelled,
            StageError::Timeout { .. } => FailureKind::StageTimeout,
        }
    }
}

/// Failure of the terminal packaging step. Fatal to the session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("UnsupportedProjectType: {0}")]
    UnsupportedProjectType(String),
    #[error("PackagingFailed: {0}")]
    PackagingFailed(String),
}

impl BuildError {
    pub fn kind(&self) -> FailureKind {
        match self {
            BuildError::UnsupportedProjectType(_) => FailureKind::UnsupportedProjectType,
            BuildError::PackagingFailed(_) => FailureKind::PackagingFailed,
        }
    }
}

/// Every kind that can terminate a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Error)]
pub enum FailureKind {
    #[error("GenerationFailed")]
    GenerationFailed,
    #[error("InvalidInput")]
    InvalidInput,
    #[error("GroundingUnavailable")]
    GroundingUnavailable,
    #[error("StageTimeout")]
    StageTimeout,
    #[error("Cancelled")]
    Cancelled,
    #[error("UnsupportedProjectType")]
    UnsupportedProjectType,
    #[error("PackagingFailed")]
    PackagingFailed,
}

/// Invalid pipeline configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("roster is empty")]
    EmptyRoster,
    #[error("role '{0}' appears more than once")]
    DuplicateRole(String),
    #[error("role '{role}' requires '{requires}', which does not run before it")]
    UnorderedDependency { role: String, requires: String },
    #[error("unknown search provider '{0}'")]
    UnknownSearchProvider(String),
    #[error("{0} must be greater than zero")]
    ZeroTimeout(String),
}

/// A log kind name that is not one of `LogKind`'s
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown log kind '{0}'")]
pub struct UnknownLogKind(pub String);

/// Rejected inbound request
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("project request must not be empty")]
    Empty,
}

/// A session that cannot be resumed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResumeError {
    #[error("only failed sessions can be resumed (session is {0})")]
    NotFailed(&'static str),
    #[error("stage {index} ran as '{found}' but the roster expects '{expected}' there")]
    RosterMismatch {
        index: usize,
        expected: String,
        found: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_render_verbatim() {
        assert_eq!(SearchErrorKind::ProviderUnavailable.to_string(), "ProviderUnavailable");
        assert_eq!(FailureKind::StageTimeout.to_string(), "StageTimeout");
        assert_eq!(
            serde_json::to_string(&FailureKind::UnsupportedProjectType).unwrap(),
            "\"UnsupportedProjectType\""
        );
    }

    #[test]
    fn test_stage_error_kind_mapping() {
        let err: StageError = RoleTaskError::GroundingUnavailable { attempted: 2 }.into();
        assert_eq!(err.kind(), FailureKind::GroundingUnavailable);

        let err = StageError::Timeout {
            after: Duration::from_millis(50),
        };
        assert_eq!(err.kind(), FailureKind::StageTimeout);
        assert!(err.to_string().starts_with("StageTimeout"));
    }

    #[test]
    fn test_generation_error_becomes_generation_failed() {
        let err: RoleTaskError = GenerationError::MissingCredentials("OPENAI_API_KEY".into()).into();
        assert!(matches!(err, RoleTaskError::GenerationFailed(ref m) if m.contains("OPENAI_API_KEY")));
    }
}
