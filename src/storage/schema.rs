//! Database schema definitions and migrations
//!
//! This module contains all SQL schema definitions for the Crawl-Runner database.

/// SQL schema for the database
///
/// `runs.course_id` has no foreign key: a run may reference a course that no
/// longer exists.
pub const SCHEMA_SQL: &str = r#"
-- Courses (read-only to the supervisor)
CREATE TABLE IF NOT EXISTS courses (
    id TEXT PRIMARY KEY,
    base_url TEXT NOT NULL,
    username TEXT NOT NULL,
    password TEXT NOT NULL,
    target_urls TEXT NOT NULL,
    asset_manifest TEXT,
    created_at TEXT NOT NULL
);

-- Extraction runs
CREATE TABLE IF NOT EXISTS runs (
    id TEXT PRIMARY KEY,
    course_id TEXT NOT NULL,
    status TEXT NOT NULL,
    outputs_dir TEXT,
    metrics TEXT,
    error TEXT,
    cancel_requested INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    started_at TEXT,
    finished_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_runs_status ON runs(status, created_at);
CREATE INDEX IF NOT EXISTS idx_runs_course ON runs(course_id);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
