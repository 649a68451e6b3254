use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// File written into every result directory
pub const REPORT_FILE: &str = "run-report.json";

/// Result directory naming, e.g. `2024-01-01T00-00-00-000Z`
pub const RESULT_DIR_FORMAT: &str = "%Y-%m-%dT%H-%M-%S-%3fZ";

/// Name of the result directory for an extraction started at `at`
pub fn result_dir_name(at: DateTime<Utc>) -> String {
    at.format(RESULT_DIR_FORMAT).to_string()
}

/// Counters collected by one extraction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionMetrics {
    pub targets: usize,
    pub pages_visited: usize,
    pub pages_failed: usize,
    pub attachments_succeeded: usize,
    pub attachments_failed: usize,
    pub videos_succeeded: usize,
    pub videos_failed: usize,
    pub duration_ms: u64,
}

/// Summary written as `run-report.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub metrics: ExtractionMetrics,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl RunReport {
    /// Writes the report into `dir`
    pub fn write(&self, dir: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(dir.join(REPORT_FILE), json)
    }
}
