//! # Session Archive
//!
//! SQLite history of finished sessions at `.guild/history.db`: the session
//! itself (as JSON, so a failed one can be resumed later), one row per
//! stage result, and the session's activity log entries.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::activity::{LogEntry, LogKind, LogSnapshot};
use crate::pipeline::{Session, SessionId, SessionSummary};
use crate::roles::RoleId;

/// Schema version for migrations
const SCHEMA_VERSION: i32 = 1;

/// One row of `guild history`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchivedSession {
    pub id: SessionId,
    pub request: String,
    pub state: String,
    pub failed_at: Option<String>,
    pub failure_kind: Option<String>,
    pub package_ref: Option<String>,
    pub resumed_from: Option<SessionId>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

pub struct SessionArchive {
    conn: Arc<Mutex<Connection>>,
}

fn parse_time(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

fn parse_column<T: std::str::FromStr>(raw: &str, column: usize) -> rusqlite::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e)))
}

impl SessionArchive {
    /// Open or create the archive at `path`
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path.as_ref()).context("Failed to open session archive")?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let archive = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        archive.run_migrations()?;
        Ok(archive)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
            [],
        )?;
        let current_version: i32 = conn
            .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |row| {
                row.get(0)
            })
            .unwrap_or(0);

        if current_version < 1 {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS sessions (
                    id TEXT PRIMARY KEY,
                    request TEXT NOT NULL,
                    state TEXT NOT NULL,
                    failed_at TEXT,
                    failure_kind TEXT,
                    package_ref TEXT,
                    resumed_from TEXT,
                    created_at TEXT NOT NULL,
                    completed_at TEXT,
                    data TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS stage_results (
                    session_id TEXT NOT NULL,
                    position INTEGER NOT NULL,
                    role TEXT NOT NULL,
                    success INTEGER NOT NULL,
                    output TEXT,
                    error TEXT,
                    PRIMARY KEY (session_id, position)
                );
                CREATE TABLE IF NOT EXISTS log_entries (
                    session_id TEXT NOT NULL,
                    sequence INTEGER NOT NULL,
                    timestamp TEXT NOT NULL,
                    role TEXT NOT NULL,
                    kind TEXT NOT NULL,
                    detail TEXT NOT NULL,
                    query_id TEXT,
                    PRIMARY KEY (session_id, sequence)
                );
                CREATE INDEX IF NOT EXISTS idx_sessions_created ON sessions(created_at);
                "#,
            )?;
            conn.execute("INSERT OR REPLACE INTO schema_version (version) VALUES (?1)", [1])?;
            tracing::info!("Session archive initialized with schema version {}", SCHEMA_VERSION);
        }
        Ok(())
    }

    /// Store a session with its log entries, replacing any earlier copy
    pub fn save(&self, session: &Session, entries: &LogSnapshot) -> Result<()> {
        let data = serde_json::to_string(session)?;
        let id = session.id.to_string();
        let failure = session.failure();

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            r#"
            INSERT OR REPLACE INTO sessions
                (id, request, state, failed_at, failure_kind, package_ref, resumed_from, created_at, completed_at, data)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                id,
                session.request.as_str(),
                session.state.label(),
                failure.map(|(at, _)| at.to_string()),
                failure.map(|(_, reason)| reason.kind.to_string()),
                session.package().map(|p| p.package_ref.clone()),
                session.resumed_from.map(|s| s.to_string()),
                session.created_at.to_rfc3339(),
                session.completed_at.map(|t| t.to_rfc3339()),
                data,
            ],
        )?;

        tx.execute("DELETE FROM stage_results WHERE session_id = ?1", params![id])?;
        for (position, result) in session.results().iter().enumerate() {
            tx.execute(
                "INSERT INTO stage_results (session_id, position, role, success, output, error) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    id,
                    position as i64,
                    result.role.as_str(),
                    result.success,
                    result.output,
                    result.error.as_ref().map(|e| e.to_string()),
                ],
            )?;
        }

        tx.execute("DELETE FROM log_entries WHERE session_id = ?1", params![id])?;
        for entry in entries {
            tx.execute(
                "INSERT INTO log_entries (session_id, sequence, timestamp, role, kind, detail, query_id) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    id,
                    entry.sequence as i64,
                    entry.timestamp.to_rfc3339(),
                    entry.role.as_str(),
                    entry.kind.as_str(),
                    entry.detail,
                    entry.query_id.map(|q| q.to_string()),
                ],
            )?;
        }
        tx.commit()?;

        tracing::debug!(session = %session.id, entries = entries.len(), "Session archived");
        Ok(())
    }

    /// Most recent sessions first
    pub fn list_sessions(&self, limit: usize) -> Result<Vec<ArchivedSession>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, request, state, failed_at, failure_kind, package_ref, resumed_from, created_at, completed_at
            FROM sessions ORDER BY created_at DESC LIMIT ?1
            "#,
        )?;
        let rows = stmt.query_map(params![limit as i64], Self::row_to_archived)?;

        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row?);
        }
        Ok(sessions)
    }

    fn row_to_archived(row: &Row<'_>) -> rusqlite::Result<ArchivedSession> {
        let id: String = row.get(0)?;
        let resumed_from: Option<String> = row.get(6)?;
        let created_at: String = row.get(7)?;
        let completed_at: Option<String> = row.get(8)?;
        Ok(ArchivedSession {
            id: parse_column(&id, 0)?,
            request: row.get(1)?,
            state: row.get(2)?,
            failed_at: row.get(3)?,
            failure_kind: row.get(4)?,
            package_ref: row.get(5)?,
            resumed_from: resumed_from.map(|s| parse_column(&s, 6)).transpose()?,
            created_at: parse_time(&created_at)?,
            completed_at: completed_at.map(|t| parse_time(&t)).transpose()?,
        })
    }

    /// Full session, e.g. to resume it
    pub fn load_session(&self, id: SessionId) -> Result<Option<Session>> {
        let conn = self.lock()?;
        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM sessions WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        data.map(|d| serde_json::from_str(&d).with_context(|| format!("Corrupt archive entry for {}", id)))
            .transpose()
    }

    /// Find a session by full id or unique prefix
    pub fn resolve_id(&self, prefix: &str) -> Result<Option<SessionId>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id FROM sessions WHERE substr(id, 1, length(?1)) = ?1 LIMIT 2")?;
        let ids: Vec<String> = stmt
            .query_map(params![prefix.trim()], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?;
        match ids.as_slice() {
            [only] => Ok(Some(only.parse().with_context(|| format!("Bad session id {}", only))?)),
            [] => Ok(None),
            _ => anyhow::bail!("Session prefix '{}' is ambiguous", prefix),
        }
    }

    /// Summary of an archived session. Results carried over by a resume
    /// are counted against their origin session's archived entries.
    pub fn summarize(&self, id: SessionId) -> Result<Option<SessionSummary>> {
        let Some(session) = self.load_session(id)? else {
            return Ok(None);
        };
        let entries = LogSnapshot::from(self.load_entries(id)?);
        let mut origins = HashMap::new();
        for origin in SessionSummary::origins_of(&session) {
            origins.insert(origin, LogSnapshot::from(self.load_entries(origin)?));
        }
        Ok(Some(SessionSummary::build_with_origins(&session, &entries, &origins)))
    }

    pub fn load_entries(&self, id: SessionId) -> Result<Vec<LogEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT sequence, timestamp, role, kind, detail, query_id
            FROM log_entries WHERE session_id = ?1 ORDER BY sequence
            "#,
        )?;
        let rows = stmt.query_map(params![id.to_string()], |row| {
            let sequence: i64 = row.get(0)?;
            let timestamp: String = row.get(1)?;
            let role: String = row.get(2)?;
            let kind: String = row.get(3)?;
            let query_id: Option<String> = row.get(5)?;
            Ok(LogEntry {
                sequence: sequence as u64,
                timestamp: parse_time(&timestamp)?,
                session_id: id,
                role: RoleId::new(role),
                kind: parse_column::<LogKind>(&kind, 3)?,
                detail: row.get(4)?,
                query_id: query_id.map(|q| parse_column(&q, 5)).transpose()?,
            })
        })?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }
}
