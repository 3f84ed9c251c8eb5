//! `SQLite`-backed implementation of [`StateBackend`].
//!
//! Uses a single `Mutex<Connection>` for thread safety.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use planwise_types::checkpoint::{Checkpoint, ConfigFingerprint, SnapshotRef};
use planwise_types::history::{YearRunRecord, YearRunStats};
use planwise_types::metrics::EventGenerationMode;
use planwise_types::run::{RunId, YearStatus};
use planwise_types::stage::WorkflowStage;
use rusqlite::{Connection, OptionalExtension};

use crate::backend::StateBackend;
use crate::error::{self, StateError};

/// Stored datetime format (UTC, microsecond precision, no timezone suffix).
const SQLITE_DATETIME_FMT: &str = "%Y-%m-%d %H:%M:%S%.6f";
/// Parse format; accepts both `datetime('now')` output and [`SQLITE_DATETIME_FMT`].
const SQLITE_DATETIME_PARSE_FMT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Idempotent DDL for state tables.
const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS stage_checkpoints (
    run_id TEXT NOT NULL,
    year INTEGER NOT NULL,
    stage TEXT NOT NULL,
    stage_order INTEGER NOT NULL,
    completed_at TEXT NOT NULL,
    snapshot_ref TEXT NOT NULL,
    config_fingerprint TEXT NOT NULL,
    PRIMARY KEY (run_id, year, stage)
);

CREATE TABLE IF NOT EXISTS snapshots (
    key TEXT PRIMARY KEY,
    value BLOB NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS year_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL,
    year INTEGER NOT NULL,
    status TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    event_mode TEXT,
    total_events INTEGER DEFAULT 0,
    duration_secs REAL DEFAULT 0,
    error_message TEXT
);

CREATE INDEX IF NOT EXISTS idx_year_runs_run_year ON year_runs (run_id, year);
";

/// Raw checkpoint row before decoding into model types.
struct CheckpointRow {
    run_id: String,
    year: i32,
    stage: String,
    completed_at: String,
    snapshot_ref: String,
    config_fingerprint: String,
}

impl CheckpointRow {
    const COLUMNS: &'static str =
        "run_id, year, stage, completed_at, snapshot_ref, config_fingerprint";

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            run_id: row.get(0)?,
            year: row.get(1)?,
            stage: row.get(2)?,
            completed_at: row.get(3)?,
            snapshot_ref: row.get(4)?,
            config_fingerprint: row.get(5)?,
        })
    }

    fn decode(self) -> error::Result<Checkpoint> {
        let stage = self
            .stage
            .parse::<WorkflowStage>()
            .map_err(|e| StateError::Corrupt(e.to_string()))?;
        Ok(Checkpoint {
            run_id: RunId::new(self.run_id),
            year: self.year,
            stage,
            completed_at: SqliteStateBackend::parse_datetime(&self.completed_at)?,
            snapshot_ref: SnapshotRef::new(self.snapshot_ref),
            config_fingerprint: ConfigFingerprint::new(self.config_fingerprint),
        })
    }
}

/// `SQLite`-backed state storage.
///
/// Create with [`SqliteStateBackend::open`] for file-backed persistence
/// or [`SqliteStateBackend::in_memory`] for tests.
pub struct SqliteStateBackend {
    conn: Mutex<Connection>,
}

impl SqliteStateBackend {
    /// Open or create a `SQLite` state database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if the directory can't be created,
    /// or [`StateError::Backend`] if the database can't be opened.
    pub fn open(path: &Path) -> error::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn =
            Connection::open(path).map_err(|e| StateError::backend_context("open", e))?;
        Self::init(conn)
    }

    /// Create an in-memory `SQLite` backend (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Backend`] if the in-memory database can't
    /// be initialized.
    pub fn in_memory() -> error::Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StateError::backend_context("open_in_memory", e))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> error::Result<Self> {
        conn.execute_batch(CREATE_TABLES)
            .map_err(|e| StateError::backend_context("create tables", e))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the connection lock.
    fn lock_conn(&self) -> error::Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StateError::LockPoisoned)
    }

    fn format_datetime(ts: &DateTime<Utc>) -> String {
        ts.format(SQLITE_DATETIME_FMT).to_string()
    }

    fn now_sqlite() -> String {
        Self::format_datetime(&Utc::now())
    }

    fn parse_datetime(raw: &str) -> error::Result<DateTime<Utc>> {
        NaiveDateTime::parse_from_str(raw, SQLITE_DATETIME_PARSE_FMT)
            .map(|ndt| Utc.from_utc_datetime(&ndt))
            .map_err(|e| StateError::Corrupt(format!("bad timestamp '{raw}': {e}")))
    }

    fn stage_order(stage: WorkflowStage) -> i64 {
        WorkflowStage::ALL
            .iter()
            .position(|s| *s == stage)
            .and_then(|i| i64::try_from(i).ok())
            .unwrap_or(i64::MAX)
    }

    #[cfg(test)]
    fn count_checkpoint_rows(&self, run_id: &RunId) -> error::Result<i64> {
        let conn = self.lock_conn()?;
        conn.query_row(
            "SELECT COUNT(*) FROM stage_checkpoints WHERE run_id = ?1",
            [run_id.as_str()],
            |row| row.get(0),
        )
        .map_err(StateError::from)
    }
}

impl StateBackend for SqliteStateBackend {
    fn upsert_checkpoint(&self, checkpoint: &Checkpoint) -> error::Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO stage_checkpoints \
             (run_id, year, stage, stage_order, completed_at, snapshot_ref, config_fingerprint) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
             ON CONFLICT(run_id, year, stage) \
             DO UPDATE SET completed_at = ?5, snapshot_ref = ?6, config_fingerprint = ?7",
            rusqlite::params![
                checkpoint.run_id.as_str(),
                checkpoint.year,
                checkpoint.stage.as_str(),
                Self::stage_order(checkpoint.stage),
                Self::format_datetime(&checkpoint.completed_at),
                checkpoint.snapshot_ref.as_str(),
                checkpoint.config_fingerprint.as_str(),
            ],
        )
        .map_err(|e| StateError::backend_context("upsert_checkpoint", e))?;
        Ok(())
    }

    fn get_checkpoint(
        &self,
        run_id: &RunId,
        year: i32,
        stage: WorkflowStage,
    ) -> error::Result<Option<Checkpoint>> {
        let conn = self.lock_conn()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM stage_checkpoints \
                     WHERE run_id = ?1 AND year = ?2 AND stage = ?3",
                    CheckpointRow::COLUMNS
                ),
                rusqlite::params![run_id.as_str(), year, stage.as_str()],
                CheckpointRow::from_row,
            )
            .optional()
            .map_err(|e| StateError::backend_context("get_checkpoint", e))?;
        row.map(CheckpointRow::decode).transpose()
    }

    fn list_checkpoints(&self, run_id: &RunId, year: i32) -> error::Result<Vec<Checkpoint>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM stage_checkpoints \
                 WHERE run_id = ?1 AND year = ?2 ORDER BY stage_order",
                CheckpointRow::COLUMNS
            ))
            .map_err(|e| StateError::backend_context("list_checkpoints: prepare", e))?;
        let rows = stmt
            .query_map(
                rusqlite::params![run_id.as_str(), year],
                CheckpointRow::from_row,
            )
            .map_err(|e| StateError::backend_context("list_checkpoints: query", e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| StateError::backend_context("list_checkpoints: read", e))?;
        rows.into_iter().map(CheckpointRow::decode).collect()
    }

    fn list_run_checkpoints(&self, run_id: &RunId) -> error::Result<Vec<Checkpoint>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM stage_checkpoints \
                 WHERE run_id = ?1 ORDER BY year, stage_order",
                CheckpointRow::COLUMNS
            ))
            .map_err(|e| StateError::backend_context("list_run_checkpoints: prepare", e))?;
        let rows = stmt
            .query_map([run_id.as_str()], CheckpointRow::from_row)
            .map_err(|e| StateError::backend_context("list_run_checkpoints: query", e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| StateError::backend_context("list_run_checkpoints: read", e))?;
        rows.into_iter().map(CheckpointRow::decode).collect()
    }

    fn checkpoint_fingerprints(&self, run_id: &RunId) -> error::Result<Vec<ConfigFingerprint>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT DISTINCT config_fingerprint FROM stage_checkpoints \
                 WHERE run_id = ?1 ORDER BY config_fingerprint",
            )
            .map_err(|e| StateError::backend_context("checkpoint_fingerprints: prepare", e))?;
        let fingerprints = stmt
            .query_map([run_id.as_str()], |row| row.get::<_, String>(0))
            .map_err(|e| StateError::backend_context("checkpoint_fingerprints: query", e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| StateError::backend_context("checkpoint_fingerprints: read", e))?;
        Ok(fingerprints.into_iter().map(ConfigFingerprint::new).collect())
    }

    fn delete_checkpoints(&self, run_id: &RunId) -> error::Result<u64> {
        let conn = self.lock_conn()?;
        let removed = conn
            .execute(
                "DELETE FROM stage_checkpoints WHERE run_id = ?1",
                [run_id.as_str()],
            )
            .map_err(|e| StateError::backend_context("delete_checkpoints", e))?;
        Ok(removed as u64)
    }

    fn put_snapshot(&self, key: &str, value: &[u8]) -> error::Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO snapshots (key, value, updated_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = ?3",
            rusqlite::params![key, value, Self::now_sqlite()],
        )
        .map_err(|e| StateError::backend_context("put_snapshot", e))?;
        Ok(())
    }

    fn get_snapshot(&self, key: &str) -> error::Result<Option<Vec<u8>>> {
        let conn = self.lock_conn()?;
        conn.query_row("SELECT value FROM snapshots WHERE key = ?1", [key], |row| {
            row.get(0)
        })
        .optional()
        .map_err(|e| StateError::backend_context("get_snapshot", e))
    }

    fn delete_snapshot(&self, key: &str) -> error::Result<bool> {
        let conn = self.lock_conn()?;
        let removed = conn
            .execute("DELETE FROM snapshots WHERE key = ?1", [key])
            .map_err(|e| StateError::backend_context("delete_snapshot", e))?;
        Ok(removed > 0)
    }

    fn delete_snapshots_with_prefix(&self, prefix: &str) -> error::Result<u64> {
        let conn = self.lock_conn()?;
        let removed = conn
            .execute(
                "DELETE FROM snapshots WHERE substr(key, 1, length(?1)) = ?1",
                [prefix],
            )
            .map_err(|e| StateError::backend_context("delete_snapshots_with_prefix", e))?;
        Ok(removed as u64)
    }

    fn start_year_run(&self, run_id: &RunId, year: i32) -> error::Result<i64> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO year_runs (run_id, year, status, started_at) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                run_id.as_str(),
                year,
                YearStatus::Running.as_str(),
                Self::now_sqlite()
            ],
        )
        .map_err(|e| StateError::backend_context("start_year_run", e))?;
        Ok(conn.last_insert_rowid())
    }

    #[allow(clippy::cast_possible_wrap)]
    fn complete_year_run(
        &self,
        id: i64,
        status: YearStatus,
        stats: &YearRunStats,
    ) -> error::Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "UPDATE year_runs SET status = ?1, finished_at = ?2, event_mode = ?3, \
             total_events = ?4, duration_secs = ?5, error_message = ?6 WHERE id = ?7",
            rusqlite::params![
                status.as_str(),
                Self::now_sqlite(),
                stats.event_mode.map(EventGenerationMode::as_str),
                stats.total_events as i64,
                stats.duration_secs,
                stats.error_message,
                id,
            ],
        )
        .map_err(|e| StateError::backend_context("complete_year_run", e))?;
        Ok(())
    }

    #[allow(clippy::cast_sign_loss)]
    fn latest_year_run(&self, run_id: &RunId, year: i32) -> error::Result<Option<YearRunRecord>> {
        type RawRow = (
            i64,
            String,
            String,
            Option<String>,
            Option<String>,
            i64,
            f64,
            Option<String>,
        );

        let conn = self.lock_conn()?;
        let raw: Option<RawRow> = conn
            .query_row(
                "SELECT id, status, started_at, finished_at, event_mode, total_events, \
                 duration_secs, error_message FROM year_runs \
                 WHERE run_id = ?1 AND year = ?2 ORDER BY id DESC LIMIT 1",
                rusqlite::params![run_id.as_str(), year],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| StateError::backend_context("latest_year_run", e))?;

        let Some((id, status, started_at, finished_at, event_mode, events, duration, error)) = raw
        else {
            return Ok(None);
        };

        Ok(Some(YearRunRecord {
            id,
            status: status.parse::<YearStatus>().map_err(StateError::Corrupt)?,
            started_at: Self::parse_datetime(&started_at)?,
            finished_at: finished_at
                .as_deref()
                .map(Self::parse_datetime)
                .transpose()?,
            stats: YearRunStats {
                event_mode: event_mode
                    .as_deref()
                    .map(str::parse::<EventGenerationMode>)
                    .transpose()
                    .map_err(StateError::Corrupt)?,
                total_events: events.max(0) as u64,
                duration_secs: duration,
                error_message: error,
            },
        }))
    }
}
