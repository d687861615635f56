//! # Session State
//!
//! One end-to-end run of the pipeline for one project request.
//!
//! ```text
//! Created → Researching(0) → … → Researching(N-1) → Deploying → Completed
//!                  └──────────────┴────────────────────┴──────→ Failed
//! ```
//!
//! A session never leaves `Completed` or `Failed`. A failed session can be
//! resumed into a new session; it is never retried in place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::activity::Sequence;
use crate::deploy::PackagedOutput;
use crate::error::{FailureKind, RequestError};
use crate::roles::RoleId;
use crate::search::SearchQuery;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First eight hex digits, for compact display
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Natural-language description of the software to produce
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProjectRequest(String);

impl ProjectRequest {
    pub fn new(text: impl Into<String>) -> Result<Self, RequestError> {
        let text = text.into();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(RequestError::Empty);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ProjectRequest {
    type Error = RequestError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ProjectRequest> for String {
    fn from(value: ProjectRequest) -> Self {
        value.0
    }
}

impl fmt::Display for ProjectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a stage or session failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
    pub kind: FailureKind,
    pub message: String,
}

impl FailureReason {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = self.kind.to_string();
        if self.message.starts_with(&kind) {
            f.write_str(&self.message)
        } else {
            write!(f, "{}: {}", kind, self.message)
        }
    }
}

/// Outcome of one stage, committed to the session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub role: RoleId,
    /// Generated output; present iff `success`
    pub output: Option<String>,
    pub queries: Vec<SearchQuery>,
    /// Sequences of this stage's log entries, ascending
    pub log_refs: Vec<Sequence>,
    pub success: bool,
    pub error: Option<FailureReason>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Session that produced this result when it was carried over by a
    /// resume; `log_refs` then point into that session's entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<SessionId>,
}

/// Where a failed session stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "at", rename_all = "snake_case")]
pub enum FailedAt {
    Stage { index: usize, role: RoleId },
    Deploying,
}

impl fmt::Display for FailedAt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailedAt::Stage { role, .. } => write!(f, "{}", role),
            FailedAt::Deploying => f.write_str("deploying"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    Created,
    Researching { index: usize, role: RoleId },
    Deploying,
    Completed { package: PackagedOutput },
    Failed { at: FailedAt, reason: FailureReason },
}

impl SessionState {
    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Created => "created",
            SessionState::Researching { .. } => "researching",
            SessionState::Deploying => "deploying",
            SessionState::Completed { .. } => "completed",
            SessionState::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Completed { .. } | SessionState::Failed { .. })
    }
}

/// A transition the state machine does not allow
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("session is already {0}")]
    Terminal(&'static str),
    #[error("cannot enter stage {requested} from {from}")]
    OutOfOrder { requested: usize, from: String },
    #[error("stage {index} must be committed by {expected}, not {got}")]
    WrongRole {
        index: usize,
        expected: RoleId,
        got: RoleId,
    },
    #[error("cannot {action} while {state}")]
    NotAllowed { action: &'static str, state: &'static str },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub request: ProjectRequest,
    pub state: SessionState,
    /// Committed results in stage order
    results: Vec<StageResult>,
    /// The failed session this one continues
    pub resumed_from: Option<SessionId>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(request: ProjectRequest) -> Self {
        Self {
            id: SessionId::new(),
            request,
            state: SessionState::Created,
            results: Vec::new(),
            resumed_from: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// A fresh session that starts with results carried over from `previous`
    pub(crate) fn resumed(previous: &Session, carried: Vec<StageResult>) -> Self {
        let carried = carried
            .into_iter()
            .map(|mut result| {
                result.origin = result.origin.or(Some(previous.id));
                result
            })
            .collect();
        Self {
            results: carried,
            resumed_from: Some(previous.id),
            ..Self::new(previous.request.clone())
        }
    }

    pub fn results(&self) -> &[StageResult] {
        &self.results
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.state, SessionState::Completed { .. })
    }

    pub fn package(&self) -> Option<&PackagedOutput> {
        match &self.state {
            SessionState::Completed { package } => Some(package),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<(&FailedAt, &FailureReason)> {
        match &self.state {
            SessionState::Failed { at, reason } => Some((at, reason)),
            _ => None,
        }
    }

    /// Enter stage `index`. Every earlier stage must be committed successfully.
    pub(crate) fn enter_stage(&mut self, index: usize, role: &RoleId) -> Result<(), TransitionError> {
        self.guard_live()?;
        let ready = matches!(self.state, SessionState::Created | SessionState::Researching { .. })
            && self.results.len() == index
            && self.results.iter().all(|r| r.success);
        if !ready {
            return Err(TransitionError::OutOfOrder {
                requested: index,
                from: format!("{} with {} results", self.state.label(), self.results.len()),
            });
        }
        self.state = SessionState::Researching {
            index,
            role: role.clone(),
        };
        Ok(())
    }

    /// Commit the current stage's result; a failed result fails the session
    pub(crate) fn commit(&mut self, result: StageResult) -> Result<(), TransitionError> {
        self.guard_live()?;
        let (index, role) = match &self.state {
            SessionState::Researching { index, role } => (*index, role.clone()),
            other => {
                return Err(TransitionError::NotAllowed {
                    action: "commit a stage",
                    state: other.label(),
                })
            }
        };
        if result.role != role || self.results.len() != index {
            return Err(TransitionError::WrongRole {
                index,
                expected: role,
                got: result.role,
            });
        }

        let failure = result.error.clone().filter(|_| !result.success);
        self.results.push(result);
        if let Some(reason) = failure {
            self.fail(FailedAt::Stage { index, role }, reason)?;
        }
        Ok(())
    }

    /// Enter deployment once all `stage_count` stages succeeded
    pub(crate) fn enter_deploying(&mut self, stage_count: usize) -> Result<(), TransitionError> {
        self.guard_live()?;
        if self.results.len() != stage_count || !self.results.iter().all(|r| r.success) {
            return Err(TransitionError::OutOfOrder {
                requested: stage_count,
                from: format!("{} with {} results", self.state.label(), self.results.len()),
            });
        }
        self.state = SessionState::Deploying;
        Ok(())
    }

    pub(crate) fn complete(&mut self, package: PackagedOutput) -> Result<(), TransitionError> {
        if self.state != SessionState::Deploying {
            return Err(TransitionError::NotAllowed {
                action: "complete",
                state: self.state.label(),
            });
        }
        self.state = SessionState::Completed { package };
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub(crate) fn fail(&mut self, at: FailedAt, reason: FailureReason) -> Result<(), TransitionError> {
        self.guard_live()?;
        self.state = SessionState::Failed { at, reason };
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    fn guard_live(&self) -> Result<(), TransitionError> {
        if self.state.is_terminal() {
            return Err(TransitionError::Terminal(self.state.label()));
        }
        Ok(())
    }
}
