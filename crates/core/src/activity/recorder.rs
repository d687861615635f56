//! Session-bound recording: one call appends to the ActivityLog and streams
//! the matching progress event.

use std::sync::Arc;
use tokio::sync::mpsc;

use crate::pipeline::{ProgressEvent, ProgressKind, SessionId};
use crate::roles::RoleId;
use crate::search::QueryId;

use super::log::{ActivityLog, LogKind, LogSnapshot, NewLogEntry, Sequence};

/// Handle shared by everything that records on behalf of one session
#[derive(Clone)]
pub struct SessionRecorder {
    session_id: SessionId,
    log: Arc<ActivityLog>,
    event_tx: Option<mpsc::Sender<ProgressEvent>>,
}

impl SessionRecorder {
    pub fn new(
        session_id: SessionId,
        log: Arc<ActivityLog>,
        event_tx: Option<mpsc::Sender<ProgressEvent>>,
    ) -> Self {
        Self {
            session_id,
            log,
            event_tx,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn log(&self) -> &Arc<ActivityLog> {
        &self.log
    }

    /// Append a log entry, then emit its progress event
    pub async fn record(
        &self,
        role: &RoleId,
        kind: LogKind,
        detail: impl Into<String>,
        query_id: Option<QueryId>,
        progress: ProgressKind,
    ) -> Sequence {
        let mut entry = NewLogEntry::new(self.session_id, role.clone(), kind, detail);
        if let Some(id) = query_id {
            entry = entry.with_query(id);
        }
        let sequence = self.log.append(entry);
        self.emit(progress).await;
        sequence
    }

    /// Emit a progress event without logging it
    pub async fn emit(&self, kind: ProgressKind) {
        if let Some(tx) = &self.event_tx {
            // A closed channel means nobody is watching; the session carries on
            let _ = tx.send(ProgressEvent::new(self.session_id, kind)).await;
        }
    }

    pub fn snapshot(&self) -> LogSnapshot {
        self.log.entries_for(self.session_id)
    }
}
