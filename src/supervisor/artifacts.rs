use crate::extraction::REPORT_FILE;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Result directories are named like `2024-01-01T00-00-00-000Z`
static RESULT_DIR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}-\d{2}-\d{2}-\d{3}Z$").unwrap());

/// What a successful extraction left behind
#[derive(Debug, Clone, PartialEq)]
pub struct Artifacts {
    /// The selected result directory
    pub result_dir: PathBuf,

    /// The `metrics` object of the run report, if one was written
    pub metrics: Option<serde_json::Value>,
}

/// Locates the result directory of a finished run
///
/// Timestamped subdirectories are preferred; any subdirectory is accepted
/// otherwise. The lexicographically last candidate wins.
///
/// # Returns
///
/// * `Ok(Some(Artifacts))` - A result directory was found
/// * `Ok(None)` - The run directory holds no subdirectory
pub async fn discover_artifacts(run_dir: &Path) -> std::io::Result<Option<Artifacts>> {
    let mut timestamped = Vec::new();
    let mut others = Vec::new();

    let mut entries = tokio::fs::read_dir(run_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if RESULT_DIR_RE.is_match(&name) {
            timestamped.push(name);
        } else {
            others.push(name);
        }
    }

    let candidates = if timestamped.is_empty() { others } else { timestamped };
    let Some(selected) = candidates.into_iter().max() else {
        return Ok(None);
    };

    let result_dir = run_dir.join(selected);
    let metrics = read_report_metrics(&result_dir).await;
    Ok(Some(Artifacts { result_dir, metrics }))
}

/// Reads the `metrics` object of `run-report.json`, if present and valid
async fn read_report_metrics(result_dir: &Path) -> Option<serde_json::Value> {
    let path = result_dir.join(REPORT_FILE);
    let raw = tokio::fs::read_to_string(&path).await.ok()?;

    match serde_json::from_str::<serde_json::Value>(&raw) {
        Ok(mut report) => report
            .get_mut("metrics")
            .map(serde_json::Value::take)
            .filter(serde_json::Value::is_object),
        Err(e) => {
            tracing::warn!("Ignoring unreadable run report {}: {}", path.display(), e);
            None
        }
    }
}
