//! # Progress Events
//!
//! Events streamed to the front-end while a session runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FailureKind, SearchErrorKind};
use crate::roles::RoleId;

use super::SessionId;

/// What happened
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressKind {
    StageStarted {
        role: RoleId,
    },
    SearchStarted {
        role: RoleId,
        query: String,
    },
    SearchCompleted {
        role: RoleId,
        query: String,
        result_count: usize,
    },
    SearchFailed {
        role: RoleId,
        query: String,
        error_kind: SearchErrorKind,
    },
    StageCompleted {
        role: RoleId,
    },
    StageFailed {
        role: RoleId,
        error_kind: FailureKind,
    },
    SessionCompleted {
        package_ref: String,
    },
    SessionFailed {
        /// Failing role, or `deploying`
        stage: String,
        kind: FailureKind,
        reason: String,
    },
}

/// A progress event for one session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub session_id: SessionId,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: ProgressKind,
}

impl ProgressEvent {
    pub fn new(session_id: SessionId, kind: ProgressKind) -> Self {
        Self {
            session_id,
            timestamp: Utc::now(),
            kind,
        }
    }

    /// Whether this is the last event a session emits
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            ProgressKind::SessionCompleted { .. } | ProgressKind::SessionFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = ProgressEvent::new(
            SessionId::new(),
            ProgressKind::SearchFailed {
                role: RoleId::new("architect"),
                query: "rust web frameworks".to_string(),
                error_kind: SearchErrorKind::ProviderUnavailable,
            },
        );
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"search_failed\""));
        assert!(json.contains("\"error_kind\":\"ProviderUnavailable\""));
        assert!(!event.is_terminal());
    }

    #[test]
    fn test_session_failed_names_stage_and_kind() {
        let event = ProgressEvent::new(
            SessionId::new(),
            ProgressKind::SessionFailed {
                stage: "engineer".to_string(),
                kind: FailureKind::StageTimeout,
                reason: "engineer: StageTimeout".to_string(),
            },
        );
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"stage\":\"engineer\""));
        assert!(json.contains("\"kind\":\"StageTimeout\""));
        assert!(event.is_terminal());
    }
}
