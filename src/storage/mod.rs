//! Storage module for persisting runs and courses
//!
//! This module handles all database operations for the supervisor, including:
//! - SQLite database initialization and schema management
//! - The run queue with atomic claims and guarded status transitions
//! - Course lookup for run parameters
//! - Cross-process cancellation requests

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{CourseStore, RunQueue, StorageError, StorageResult};

use crate::state::RunStatus;
use crate::RunnerError;

use std::path::Path;

/// Initializes or opens a storage database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteStorage)` - Successfully initialized storage
/// * `Err(RunnerError)` - Failed to initialize storage
pub fn open_storage(path: &Path) -> Result<SqliteStorage, RunnerError> {
    SqliteStorage::new(path)
}

/// Represents a run in the database
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: String,
    pub course_id: String,
    pub status: RunStatus,
    pub outputs_dir: Option<String>,
    pub metrics: Option<serde_json::Value>,
    pub error: Option<String>,
    pub cancel_requested: bool,
    pub created_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

/// Represents a course in the database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseRecord {
    pub id: String,
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub target_urls: Vec<String>,
    /// Asset manifest handed to the extraction process
    pub asset_manifest: Option<String>,
}

impl CourseRecord {
    pub fn new(
        id: impl Into<String>,
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        target_urls: Vec<String>,
    ) -> Self {
        Self {
            id: id.into(),
            base_url: base_url.into(),
            username: username.into(),
            password: password.into(),
            target_urls,
            asset_manifest: None,
        }
    }

    pub fn with_asset_manifest(mut self, path: impl Into<String>) -> Self {
        self.asset_manifest = Some(path.into());
        self
    }
}
