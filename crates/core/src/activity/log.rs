//! # Activity Log
//!
//! Append-only ledger of stage and search events shared by every session.
//! Sequence numbers are assigned under the write lock, so concurrent appends
//! never interleave and never lose an entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::UnknownLogKind;
use crate::pipeline::SessionId;
use crate::roles::RoleId;
use crate::search::QueryId;

/// Monotonic position of an entry in the log. Starts at 1, never reused.
pub type Sequence = u64;

/// Kind of a logged event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    SearchStarted,
    SearchCompleted,
    SearchFailed,
    StageStarted,
    StageCompleted,
    StageFailed,
}

impl LogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SearchStarted => "search_started",
            Self::SearchCompleted => "search_completed",
            Self::SearchFailed => "search_failed",
            Self::StageStarted => "stage_started",
            Self::StageCompleted => "stage_completed",
            Self::StageFailed => "stage_failed",
        }
    }

    /// Whether this entry closes out a started search
    pub fn is_search_terminal(&self) -> bool {
        matches!(self, Self::SearchCompleted | Self::SearchFailed)
    }
}

impl FromStr for LogKind {
    type Err = UnknownLogKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "search_started" => Ok(Self::SearchStarted),
            "search_completed" => Ok(Self::SearchCompleted),
            "search_failed" => Ok(Self::SearchFailed),
            "stage_started" => Ok(Self::StageStarted),
            "stage_completed" => Ok(Self::StageCompleted),
            "stage_failed" => Ok(Self::StageFailed),
            other => Err(UnknownLogKind(other.to_string())),
        }
    }
}

/// An entry waiting to be appended
#[derive(Debug, Clone)]
pub struct NewLogEntry {
    pub session_id: SessionId,
    pub role: RoleId,
    pub kind: LogKind,
    pub detail: String,
    pub query_id: Option<QueryId>,
}

impl NewLogEntry {
    pub fn new(session_id: SessionId, role: RoleId, kind: LogKind, detail: impl Into<String>) -> Self {
        Self {
            session_id,
            role,
            kind,
            detail: detail.into(),
            query_id: None,
        }
    }

    /// Tie the entry to a search query
    pub fn with_query(mut self, query_id: QueryId) -> Self {
        self.query_id = Some(query_id);
        self
    }
}

/// A committed entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub sequence: Sequence,
    pub timestamp: DateTime<Utc>,
    pub session_id: SessionId,
    pub role: RoleId,
    pub kind: LogKind,
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_id: Option<QueryId>,
}

#[derive(Default)]
struct LogInner {
    last: Sequence,
    entries: Vec<Arc<LogEntry>>,
    by_session: HashMap<SessionId, Vec<usize>>,
}

/// Process-wide activity ledger, injected wherever events are recorded
#[derive(Default)]
pub struct ActivityLog {
    inner: RwLock<LogInner>,
}

impl ActivityLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry and return its sequence number
    pub fn append(&self, entry: NewLogEntry) -> Sequence {
        // Entries are only ever pushed, so a poisoned lock still guards valid data
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.last += 1;
        let sequence = inner.last;
        let committed = Arc::new(LogEntry {
            sequence,
            timestamp: Utc::now(),
            session_id: entry.session_id,
            role: entry.role,
            kind: entry.kind,
            detail: entry.detail,
            query_id: entry.query_id,
        });
        let index = inner.entries.len();
        inner.entries.push(committed);
        inner.by_session.entry(entry.session_id).or_default().push(index);
        sequence
    }

    /// Snapshot of one session's entries in sequence order.
    ///
    /// Appends made after this call are not visible through the snapshot.
    pub fn entries_for(&self, session_id: SessionId) -> LogSnapshot {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let entries: Vec<Arc<LogEntry>> = inner
            .by_session
            .get(&session_id)
            .map(|indices| indices.iter().map(|&i| Arc::clone(&inner.entries[i])).collect())
            .unwrap_or_default();
        LogSnapshot {
            entries: entries.into(),
        }
    }

    /// Total number of entries across all sessions
    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sequence number of the most recent append (0 when empty)
    pub fn last_sequence(&self) -> Sequence {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).last
    }
}

/// Immutable, restartable view of a session's entries
#[derive(Debug, Clone)]
pub struct LogSnapshot {
    entries: Arc<[Arc<LogEntry>]>,
}

impl LogSnapshot {
    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> + '_ {
        self.entries.iter().map(|e| e.as_ref())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries with sequence numbers in `from..=to`
    pub fn between(&self, from: Sequence, to: Sequence) -> impl Iterator<Item = &LogEntry> + '_ {
        self.iter().filter(move |e| e.sequence >= from && e.sequence <= to)
    }

    pub fn to_vec(&self) -> Vec<LogEntry> {
        self.iter().cloned().collect()
    }
}

impl PartialEq for LogSnapshot {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().zip(other.iter()).all(|(a, b)| a == b)
    }
}

/// Rebuild a snapshot from stored entries, e.g. from the archive
impl From<Vec<LogEntry>> for LogSnapshot {
    fn from(mut entries: Vec<LogEntry>) -> Self {
        entries.sort_by_key(|e| e.sequence);
        Self {
            entries: entries.into_iter().map(Arc::new).collect(),
        }
    }
}

impl<'a> IntoIterator for &'a LogSnapshot {
    type Item = &'a LogEntry;
    type IntoIter = Box<dyn Iterator<Item = &'a LogEntry> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}
