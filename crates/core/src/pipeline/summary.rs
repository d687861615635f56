//! Read-only digest of a session: state, per-stage search counts and the
//! full activity trail, in a shape a front-end can render directly.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Write;

use crate::activity::{LogEntry, LogKind, LogSnapshot};
use crate::error::FailureKind;
use crate::roles::RoleId;

use super::session::{Session, SessionId};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchCounts {
    pub started: usize,
    pub completed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSummary {
    pub role: RoleId,
    pub success: bool,
    pub searches: SearchCounts,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub request: String,
    /// `completed`, `failed`, ...
    pub state: String,
    pub failed_at: Option<String>,
    pub failure_kind: Option<FailureKind>,
    pub failure_reason: Option<String>,
    pub package_ref: Option<String>,
    pub stages: Vec<StageSummary>,
    pub searches: SearchCounts,
    pub entries: Vec<LogEntry>,
}

fn count(entries: &[LogEntry], role: Option<&RoleId>) -> SearchCounts {
    let mut counts = SearchCounts::default();
    for entry in entries.iter().filter(|e| role.map_or(true, |r| &e.role == r)) {
        match entry.kind {
            LogKind::SearchStarted => counts.started += 1,
            LogKind::SearchCompleted => counts.completed += 1,
            LogKind::SearchFailed => counts.failed += 1,
            _ => {}
        }
    }
    counts
}

impl SessionSummary {
    /// Summary from this session's own entries only
    pub fn build(session: &Session, snapshot: &LogSnapshot) -> Self {
        Self::build_with_origins(session, snapshot, &HashMap::new())
    }

    /// Summary of a session whose carried results point into other
    /// sessions' logs. `origins` maps each origin session to its entries;
    /// a carried stage whose origin is missing reports no searches.
    pub fn build_with_origins(
        session: &Session,
        snapshot: &LogSnapshot,
        origins: &HashMap<SessionId, LogSnapshot>,
    ) -> Self {
        let entries = snapshot.to_vec();
        let mut searches = count(&entries, None);

        let stages = session
            .results()
            .iter()
            .map(|result| {
                let source = match result.origin {
                    Some(origin) if origin != session.id => origins.get(&origin),
                    _ => Some(snapshot),
                };
                let own: Vec<LogEntry> = source
                    .map(|s| s.iter().filter(|e| result.log_refs.contains(&e.sequence)).cloned().collect())
                    .unwrap_or_default();
                let stage_searches = count(&own, Some(&result.role));
                if result.origin.is_some_and(|o| o != session.id) {
                    searches.started += stage_searches.started;
                    searches.completed += stage_searches.completed;
                    searches.failed += stage_searches.failed;
                }
                StageSummary {
                    role: result.role.clone(),
                    success: result.success,
                    searches: stage_searches,
                    error: result.error.as_ref().map(|e| e.to_string()),
                }
            })
            .collect();

        let (failed_at, failure_kind, failure_reason) = match session.failure() {
            Some((at, reason)) => (Some(at.to_string()), Some(reason.kind), Some(reason.to_string())),
            None => (None, None, None),
        };

        Self {
            session_id: session.id,
            request: session.request.to_string(),
            state: session.state.label().to_string(),
            failed_at,
            failure_kind,
            failure_reason,
            package_ref: session.package().map(|p| p.package_ref.clone()),
            stages,
            searches,
            entries,
        }
    }

    /// Origin sessions whose entries `build_with_origins` needs
    pub fn origins_of(session: &Session) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = session
            .results()
            .iter()
            .filter_map(|r| r.origin)
            .filter(|o| *o != session.id)
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    pub fn is_completed(&self) -> bool {
        self.state == "completed"
    }

    /// Plain-text report for terminals
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Session {} [{}]", self.session_id, self.state);
        let _ = writeln!(out, "Request: {}", self.request);
        let _ = writeln!(out);

        for stage in &self.stages {
            let mark = if stage.success { "ok" } else { "FAILED" };
            let _ = writeln!(
                out,
                "  {:<16} {:<6} searches: {} ok, {} failed",
                stage.role.as_str(),
                mark,
                stage.searches.completed,
                stage.searches.failed
            );
            if let Some(error) = &stage.error {
                let _ = writeln!(out, "  {:<16} {}", "", error);
            }
        }

        let _ = writeln!(out);
        match (&self.package_ref, &self.failure_reason) {
            (Some(package), _) => {
                let _ = writeln!(out, "Package: {}", package);
            }
            (None, Some(reason)) => {
                let at = self.failed_at.as_deref().unwrap_or("unknown");
                let _ = writeln!(out, "Failed at {}: {}", at, reason);
            }
            (None, None) => {
                let _ = writeln!(out, "Not finished");
            }
        }
        out
    }
}
