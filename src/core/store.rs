//! SQLite persistence for the ledger.
//!
//! # Schema Design
//!
//! The database uses WAL mode so several ledgers (worker processes) can share
//! one file. All timestamps are epoch milliseconds (i64). JSON columns are
//! stored as TEXT. Uniqueness constraints are the source of truth for
//! replay deduplication:
//!
//! - `workflow_run_steps`: `UNIQUE(run_id, external_step_key)`
//! - `workflow_events`: unique `(run_id, external_step_key, event_type)` when
//!   a key is present
//!
//! Children reference their run with `ON DELETE CASCADE`.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::types::Type;
use rusqlite::{ffi, params, Connection, ErrorCode, Row};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::error::{LedgerError, Result};

/// Current schema version for migration tracking
pub const SCHEMA_VERSION: i32 = 1;

/// Schema initialization SQL
pub const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL,
    applied_at INTEGER NOT NULL       -- epoch ms
);

-- Projects: minimal mirror of the owning application's projects
CREATE TABLE IF NOT EXISTS projects (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    root_path TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS workflow_runs (
    id TEXT PRIMARY KEY,
    workflow_definition_id TEXT NOT NULL,
    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    user_id TEXT NOT NULL,
    args TEXT NOT NULL,               -- JSON
    status TEXT NOT NULL,
    current_phase TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_runs_project ON workflow_runs(project_id, created_at);

CREATE TABLE IF NOT EXISTS workflow_run_steps (
    id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL REFERENCES workflow_runs(id) ON DELETE CASCADE,
    external_step_key TEXT NOT NULL,
    name TEXT NOT NULL,
    phase TEXT,
    status TEXT NOT NULL,
    error_message TEXT,
    started_at INTEGER,
    completed_at INTEGER,
    session_id TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    UNIQUE(run_id, external_step_key)
);

CREATE TABLE IF NOT EXISTS workflow_events (
    id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL REFERENCES workflow_runs(id) ON DELETE CASCADE,
    step_id TEXT REFERENCES workflow_run_steps(id) ON DELETE CASCADE,
    external_step_key TEXT,
    event_type TEXT NOT NULL,
    event_data TEXT NOT NULL,         -- JSON, tagged by event_type
    phase TEXT,
    created_by TEXT,
    created_at INTEGER NOT NULL
);

-- Keyless events never dedup
CREATE UNIQUE INDEX IF NOT EXISTS idx_events_step_key
    ON workflow_events(run_id, external_step_key, event_type)
    WHERE external_step_key IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_events_run_created ON workflow_events(run_id, created_at);

CREATE TABLE IF NOT EXISTS workflow_artifacts (
    id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL REFERENCES workflow_runs(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    file_type TEXT NOT NULL,
    file_path TEXT NOT NULL,          -- relative to the project root
    mime_type TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    phase TEXT,
    step_id TEXT REFERENCES workflow_run_steps(id) ON DELETE SET NULL,
    event_id TEXT REFERENCES workflow_events(id) ON DELETE SET NULL,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_artifacts_run ON workflow_artifacts(run_id, created_at);
"#;

/// One SQLite connection, shared by the tasks of a single ledger.
///
/// Blocking SQLite calls run on tokio's blocking pool.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl Database {
    /// Open (creating if needed) a database file
    pub async fn open(path: &Path, busy_timeout: Duration) -> Result<Self> {
        let db_path = path.to_path_buf();
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection> {
            let conn = Connection::open(&db_path)?;
            conn.busy_timeout(busy_timeout)?;
            initialize(&conn)?;
            Ok(conn)
        })
        .await??;

        debug!(path = %path.display(), "Opened ledger database");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path.to_path_buf()),
        })
    }

    /// Open a private in-memory database
    pub async fn open_in_memory() -> Result<Self> {
        let conn = tokio::task::spawn_blocking(|| -> Result<Connection> {
            let conn = Connection::open_in_memory()?;
            initialize(&conn)?;
            Ok(conn)
        })
        .await??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    /// Database file path, `None` when in memory
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `f` against the connection on the blocking pool
    pub async fn call<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| LedgerError::LockPoisoned)?;
            f(&mut guard)
        })
        .await?
    }
}

fn initialize(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT INTO schema_version (version, applied_at)
         SELECT ?1, ?2 WHERE NOT EXISTS (SELECT 1 FROM schema_version)",
        params![SCHEMA_VERSION, to_millis(now())],
    )?;
    Ok(())
}

// =============================================================================
// Constraint classification
// =============================================================================

/// Unique or primary-key violation: a concurrent or replayed insert won
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == ErrorCode::ConstraintViolation
                && (e.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
                    || e.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
    )
}

/// Insert referenced a parent row that does not exist
pub(crate) fn is_foreign_key_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == ErrorCode::ConstraintViolation
                && e.extended_code == ffi::SQLITE_CONSTRAINT_FOREIGNKEY
    )
}

// =============================================================================
// Time and column helpers
// =============================================================================

/// Current time truncated to the stored precision
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

pub(crate) fn to_millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

pub(crate) fn opt_millis(time: Option<DateTime<Utc>>) -> Option<i64> {
    time.map(to_millis)
}

fn conversion_error<E>(idx: usize, ty: Type, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, ty, Box::new(err))
}

#[derive(Debug, thiserror::Error)]
#[error("timestamp out of range: {0}")]
struct TimestampOutOfRange(i64);

fn millis_to_time(idx: usize, millis: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| conversion_error(idx, Type::Integer, TimestampOutOfRange(millis)))
}

pub(crate) fn time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    millis_to_time(idx, row.get(idx)?)
}

pub(crate) fn opt_time_column(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    row.get::<_, Option<i64>>(idx)?
        .map(|millis| millis_to_time(idx, millis))
        .transpose()
}

/// Parse a TEXT column through `FromStr` (uuids, status labels)
pub(crate) fn parsed_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|err| conversion_error(idx, Type::Text, err))
}

pub(crate) fn opt_parsed_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    row.get::<_, Option<String>>(idx)?
        .map(|raw| raw.parse().map_err(|err| conversion_error(idx, Type::Text, err)))
        .transpose()
}

pub(crate) fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|err| conversion_error(idx, Type::Text, err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_schema_initializes_once() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("ledger.db");

        let first = Database::open(&path, Duration::from_secs(1)).await.unwrap();
        drop(first);
        let db = Database::open(&path, Duration::from_secs(1)).await.unwrap();

        let versions: i64 = db
            .call(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))?)
            })
            .await
            .unwrap();
        assert_eq!(versions, 1);
        assert_eq!(db.path(), Some(path.as_path()));
    }

    #[tokio::test]
    async fn test_foreign_keys_enabled() {
        let db = Database::open_in_memory().await.unwrap();
        let enabled: i64 = db
            .call(|conn| Ok(conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0))?))
            .await
            .unwrap();
        assert_eq!(enabled, 1);
    }

    #[tokio::test]
    async fn test_constraint_classification() {
        let db = Database::open_in_memory().await.unwrap();
        let (unique, foreign) = db
            .call(|conn| {
                conn.execute(
                    "INSERT INTO projects (id, name, root_path, created_at)
                     VALUES ('p1', 'P', '/p', 0)",
                    [],
                )?;
                let unique = conn
                    .execute(
                        "INSERT INTO projects (id, name, root_path, created_at)
                         VALUES ('p1', 'P', '/p', 0)",
                        [],
                    )
                    .unwrap_err();
                let foreign = conn
                    .execute(
                        "INSERT INTO workflow_runs
                         (id, workflow_definition_id, project_id, user_id, args, status,
                          created_at, updated_at)
                         VALUES ('r1', 'wf', 'missing', 'u', 'null', 'pending', 0, 0)",
                        [],
                    )
                    .unwrap_err();
                Ok((unique, foreign))
            })
            .await
            .unwrap();

        assert!(is_unique_violation(&unique));
        assert!(!is_foreign_key_violation(&unique));
        assert!(is_foreign_key_violation(&foreign));
        assert!(!is_unique_violation(&foreign));
    }

    #[test]
    fn test_now_round_trips_through_millis() {
        let time = now();
        assert_eq!(millis_to_time(0, to_millis(time)).unwrap(), time);
    }
}
