//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the `RunQueue` and
//! `CourseStore` traits.

use crate::state::RunStatus;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{CourseStore, RunQueue, StorageError, StorageResult};
use crate::storage::{CourseRecord, RunRecord};
use crate::RunnerError;
use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::time::Duration;

const RUN_COLUMNS: &str = "id, course_id, status, outputs_dir, metrics, error, cancel_requested,
     created_at, started_at, finished_at";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(RunnerError)` - Failed to open database
    pub fn new(path: &Path) -> Result<Self, RunnerError> {
        let conn = Connection::open(path)?;

        // Several supervisors may share one database file
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> Result<Self, RunnerError> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Applies a guarded status change
    ///
    /// `assignments` is the SET clause (without `status`), using `?1` for the
    /// run id and `?2`.. for `extra` parameters.
    fn transition(
        &mut self,
        run_id: &str,
        to: RunStatus,
        assignments: &str,
        extra: &[&dyn rusqlite::ToSql],
    ) -> StorageResult<()> {
        let sql = format!(
            "UPDATE runs SET status = '{}', {} WHERE id = ?1 AND status IN ({})",
            to.to_db_string(),
            assignments,
            status_list(&to.predecessors())
        );

        let mut bound: Vec<&dyn rusqlite::ToSql> = Vec::with_capacity(extra.len() + 1);
        bound.push(&run_id);
        bound.extend_from_slice(extra);

        let changed = self.conn.execute(&sql, bound.as_slice())?;
        if changed == 1 {
            return Ok(());
        }

        let current = self.get_run(run_id)?;
        Err(StorageError::InvalidTransition {
            from: current.status,
            to,
        })
    }
}

impl RunQueue for SqliteStorage {
    fn enqueue_run(&mut self, course_id: &str) -> StorageResult<String> {
        let id = uuid::Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO runs (id, course_id, status, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![id, course_id, RunStatus::Queued.to_db_string(), now()],
        )?;
        Ok(id)
    }

    fn claim_next_run(&mut self) -> StorageResult<Option<RunRecord>> {
        // One statement: concurrent claimers serialize on the write lock and
        // the status guard keeps a row from being claimed twice.
        let sql = format!(
            "UPDATE runs SET status = ?1, started_at = ?2
             WHERE id = (SELECT id FROM runs WHERE status = ?3 ORDER BY created_at, rowid LIMIT 1)
               AND status = ?3
             RETURNING {}",
            RUN_COLUMNS
        );

        let run = self
            .conn
            .query_row(
                &sql,
                params![
                    RunStatus::Running.to_db_string(),
                    now(),
                    RunStatus::Queued.to_db_string()
                ],
                run_from_row,
            )
            .optional()?;

        Ok(run)
    }

    fn set_outputs_dir(&mut self, run_id: &str, outputs_dir: &str) -> StorageResult<()> {
        let changed = self.conn.execute(
            "UPDATE runs SET outputs_dir = ?1 WHERE id = ?2",
            params![outputs_dir, run_id],
        )?;
        if changed == 0 {
            return Err(StorageError::RunNotFound(run_id.to_string()));
        }
        Ok(())
    }

    fn mark_succeeded(
        &mut self,
        run_id: &str,
        outputs_dir: &str,
        metrics: Option<&serde_json::Value>,
    ) -> StorageResult<()> {
        let metrics_json = metrics
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let finished_at = now();

        self.transition(
            run_id,
            RunStatus::Succeeded,
            "outputs_dir = ?2, metrics = ?3, error = NULL, finished_at = ?4",
            &[&outputs_dir, &metrics_json, &finished_at],
        )
    }

    fn mark_failed(&mut self, run_id: &str, error: &str) -> StorageResult<()> {
        let finished_at = now();
        self.transition(
            run_id,
            RunStatus::Failed,
            "error = ?2, finished_at = ?3",
            &[&error, &finished_at],
        )
    }

    fn mark_cancelled(&mut self, run_id: &str) -> StorageResult<()> {
        let finished_at = now();
        self.transition(
            run_id,
            RunStatus::Cancelled,
            "error = 'Cancelled by request', finished_at = ?2",
            &[&finished_at],
        )
    }

    fn request_cancel(&mut self, run_id: &str) -> StorageResult<RunStatus> {
        let finished_at = now();
        let cancelled = self.conn.execute(
            "UPDATE runs SET status = ?1, error = 'Cancelled by request', finished_at = ?2
             WHERE id = ?3 AND status = ?4",
            params![
                RunStatus::Cancelled.to_db_string(),
                finished_at,
                run_id,
                RunStatus::Queued.to_db_string()
            ],
        )?;
        if cancelled == 1 {
            return Ok(RunStatus::Cancelled);
        }

        let flagged = self.conn.execute(
            "UPDATE runs SET cancel_requested = 1 WHERE id = ?1 AND status = ?2",
            params![run_id, RunStatus::Running.to_db_string()],
        )?;
        if flagged == 1 {
            return Ok(RunStatus::Running);
        }

        let current = self.get_run(run_id)?;
        Err(StorageError::InvalidTransition {
            from: current.status,
            to: RunStatus::Cancelled,
        })
    }

    fn is_cancel_requested(&self, run_id: &str) -> StorageResult<bool> {
        let flag: Option<bool> = self
            .conn
            .query_row(
                "SELECT cancel_requested OR status = ?2 FROM runs WHERE id = ?1",
                params![run_id, RunStatus::Cancelled.to_db_string()],
                |row| row.get(0),
            )
            .optional()?;
        flag.ok_or_else(|| StorageError::RunNotFound(run_id.to_string()))
    }

    fn get_run(&self, run_id: &str) -> StorageResult<RunRecord> {
        let sql = format!("SELECT {} FROM runs WHERE id = ?1", RUN_COLUMNS);
        self.conn
            .query_row(&sql, params![run_id], run_from_row)
            .optional()?
            .ok_or_else(|| StorageError::RunNotFound(run_id.to_string()))
    }

    fn list_runs(&self, limit: usize) -> StorageResult<Vec<RunRecord>> {
        let sql = format!(
            "SELECT {} FROM runs ORDER BY created_at DESC, rowid DESC LIMIT ?1",
            RUN_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let runs = stmt
            .query_map(params![limit as i64], run_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(runs)
    }

    fn count_runs_by_status(&self, status: RunStatus) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM runs WHERE status = ?1",
            params![status.to_db_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

impl CourseStore for SqliteStorage {
    fn upsert_course(&mut self, course: &CourseRecord) -> StorageResult<()> {
        let target_urls = serde_json::to_string(&course.target_urls)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.conn.execute(
            "INSERT INTO courses (id, base_url, username, password, target_urls, asset_manifest, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET base_url = excluded.base_url,
                username = excluded.username, password = excluded.password,
                target_urls = excluded.target_urls, asset_manifest = excluded.asset_manifest",
            params![
                course.id,
                course.base_url,
                course.username,
                course.password,
                target_urls,
                course.asset_manifest,
                now()
            ],
        )?;
        Ok(())
    }

    fn get_course(&self, course_id: &str) -> StorageResult<Option<CourseRecord>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, base_url, username, password, target_urls, asset_manifest
                 FROM courses WHERE id = ?1",
                params![course_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, Option<String>>(5)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((id, base_url, username, password, targets, asset_manifest)) => {
                let target_urls: Vec<String> = serde_json::from_str(&targets)
                    .map_err(|e| StorageError::Serialization(e.to_string()))?;
                Ok(Some(CourseRecord {
                    id,
                    base_url,
                    username,
                    password,
                    target_urls,
                    asset_manifest,
                }))
            }
            None => Ok(None),
        }
    }
}

fn run_from_row(row: &Row<'_>) -> Result<RunRecord, rusqlite::Error> {
    let metrics: Option<String> = row.get(4)?;
    Ok(RunRecord {
        id: row.get(0)?,
        course_id: row.get(1)?,
        status: RunStatus::from_db_string(&row.get::<_, String>(2)?)
            .unwrap_or(RunStatus::Failed),
        outputs_dir: row.get(3)?,
        metrics: metrics.and_then(|m| serde_json::from_str(&m).ok()),
        error: row.get(5)?,
        cancel_requested: row.get(6)?,
        created_at: row.get(7)?,
        started_at: row.get(8)?,
        finished_at: row.get(9)?,
    })
}

fn status_list(states: &[RunStatus]) -> String {
    states
        .iter()
        .map(|s| format!("'{}'", s.to_db_string()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
