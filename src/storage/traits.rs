//! Storage traits and error types
//!
//! This module defines the collaborator interfaces the supervisor depends on:
//! a run queue with at-most-once claims and a read-only course store.

use crate::state::RunStatus;
use crate::storage::{CourseRecord, RunRecord};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Course not found: {0}")]
    CourseNotFound(String),

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: RunStatus, to: RunStatus },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Queue of extraction runs
///
/// Every status-changing operation is guarded: it only applies when the run
/// is in a legal predecessor state, and otherwise fails with
/// `StorageError::InvalidTransition` carrying the state actually found.
pub trait RunQueue {
    // ===== Producer side =====

    /// Adds a new queued run for a course
    ///
    /// # Returns
    ///
    /// The id of the newly created run
    fn enqueue_run(&mut self, course_id: &str) -> StorageResult<String>;

    // ===== Supervisor side =====

    /// Atomically claims the oldest queued run and moves it to running
    ///
    /// Two supervisors sharing the same database never claim the same run.
    fn claim_next_run(&mut self) -> StorageResult<Option<RunRecord>>;

    /// Records the run-scoped output directory of a running run
    fn set_outputs_dir(&mut self, run_id: &str, outputs_dir: &str) -> StorageResult<()>;

    /// Marks a running run as succeeded
    ///
    /// # Arguments
    ///
    /// * `outputs_dir` - The resolved result directory
    /// * `metrics` - Metrics object from the extraction report, if any
    fn mark_succeeded(
        &mut self,
        run_id: &str,
        outputs_dir: &str,
        metrics: Option<&serde_json::Value>,
    ) -> StorageResult<()>;

    /// Marks a running run as failed with a human-readable error
    fn mark_failed(&mut self, run_id: &str, error: &str) -> StorageResult<()>;

    /// Marks a queued or running run as cancelled
    fn mark_cancelled(&mut self, run_id: &str) -> StorageResult<()>;

    // ===== Cancellation requests =====

    /// Requests cancellation from outside the owning supervisor process
    ///
    /// A queued run is cancelled immediately. A running run only gets its
    /// `cancel_requested` flag set; the supervisor that owns it performs the
    /// termination and the final status change.
    ///
    /// # Returns
    ///
    /// The status the run has after the request
    fn request_cancel(&mut self, run_id: &str) -> StorageResult<RunStatus>;

    /// Checks whether a run was cancelled or has a pending cancellation request
    fn is_cancel_requested(&self, run_id: &str) -> StorageResult<bool>;

    // ===== Queries =====

    /// Gets a run by ID
    fn get_run(&self, run_id: &str) -> StorageResult<RunRecord>;

    /// Lists the most recently created runs, newest first
    fn list_runs(&self, limit: usize) -> StorageResult<Vec<RunRecord>>;

    /// Counts runs in a given status
    fn count_runs_by_status(&self, status: RunStatus) -> StorageResult<u64>;
}

/// Source of course parameters (base URL, credentials, targets)
pub trait CourseStore {
    /// Inserts or replaces a course
    fn upsert_course(&mut self, course: &CourseRecord) -> StorageResult<()>;

    /// Gets a course by id, including credentials
    fn get_course(&self, course_id: &str) -> StorageResult<Option<CourseRecord>>;
}
