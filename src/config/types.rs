use serde::Deserialize;
use std::path::PathBuf;

/// Main configuration structure for Crawl-Runner
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub attachments: AttachmentConfig,
    #[serde(default)]
    pub videos: VideoConfig,
}

/// Run supervisor behavior
#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorConfig {
    /// Root directory under which each run gets `<outputs-root>/<run-id>`
    #[serde(rename = "outputs-root", default = "default_outputs_root")]
    pub outputs_root: PathBuf,

    /// Extraction program; defaults to this executable's `extract` command
    #[serde(rename = "extractor-command", default)]
    pub extractor_command: Option<PathBuf>,

    /// Arguments passed to the extraction program
    #[serde(rename = "extractor-args", default)]
    pub extractor_args: Vec<String>,

    /// Site profile (selector configuration) handed to the extraction process
    #[serde(rename = "selectors-path", default = "default_selectors_path")]
    pub selectors_path: PathBuf,

    /// Sleep between polls when the queue is empty (milliseconds)
    #[serde(rename = "poll-interval-ms", default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Wall-clock budget for one extraction process (milliseconds)
    #[serde(rename = "run-timeout-ms", default = "default_run_timeout_ms")]
    pub run_timeout_ms: u64,

    /// Delay between the graceful and forceful termination signals (milliseconds)
    #[serde(rename = "grace-window-ms", default = "default_grace_window_ms")]
    pub grace_window_ms: u64,

    /// How often a running run is checked for a stored cancellation request
    #[serde(
        rename = "cancel-check-interval-ms",
        default = "default_cancel_check_interval_ms"
    )]
    pub cancel_check_interval_ms: u64,

    /// Number of trailing output lines kept for error reports
    #[serde(rename = "output-tail-lines", default = "default_output_tail_lines")]
    pub output_tail_lines: usize,
}

/// Run/course database location
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path", default = "default_database_path")]
    pub database_path: String,
}

/// Browser launch options used by the extraction process
#[derive(Debug, Clone, Deserialize)]
pub struct BrowserConfig {
    #[serde(default = "default_true")]
    pub headless: bool,

    /// Explicit Chrome/Chromium binary; located automatically when absent
    #[serde(rename = "chrome-executable", default)]
    pub chrome_executable: Option<PathBuf>,

    /// Per-navigation timeout (milliseconds)
    #[serde(
        rename = "navigation-timeout-ms",
        default = "default_navigation_timeout_ms"
    )]
    pub navigation_timeout_ms: u64,
}

/// Attachment (direct HTTP) acquisition options
#[derive(Debug, Clone, Deserialize)]
pub struct AttachmentConfig {
    #[serde(rename = "max-concurrent", default = "default_attachment_concurrency")]
    pub max_concurrent: usize,

    #[serde(rename = "timeout-ms", default = "default_attachment_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(rename = "max-retries", default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(rename = "max-size-bytes", default = "default_attachment_max_size")]
    pub max_size_bytes: u64,

    #[serde(rename = "retry-base-delay-ms", default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

/// Video (external tool) acquisition options
#[derive(Debug, Clone, Deserialize)]
pub struct VideoConfig {
    /// Path or name of the yt-dlp compatible tool
    #[serde(rename = "tool-path", default = "default_tool_path")]
    pub tool_path: PathBuf,

    #[serde(rename = "max-concurrent", default = "default_video_concurrency")]
    pub max_concurrent: usize,

    #[serde(rename = "timeout-ms", default = "default_video_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(rename = "max-retries", default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(rename = "max-size-bytes", default = "default_video_max_size")]
    pub max_size_bytes: u64,

    /// One of "best", "high", "medium", "low"
    #[serde(default = "default_quality")]
    pub quality: String,

    /// Merge output container: "mp4", "webm" or "mkv"
    #[serde(default = "default_format")]
    pub format: String,

    #[serde(default)]
    pub subtitles: bool,

    #[serde(default)]
    pub thumbnail: bool,

    #[serde(rename = "retry-base-delay-ms", default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

fn default_outputs_root() -> PathBuf {
    PathBuf::from("./outputs")
}

fn default_selectors_path() -> PathBuf {
    PathBuf::from("./site.toml")
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_run_timeout_ms() -> u64 {
    5 * 60 * 1000
}

fn default_grace_window_ms() -> u64 {
    5_000
}

fn default_cancel_check_interval_ms() -> u64 {
    1_000
}

fn default_output_tail_lines() -> usize {
    40
}

fn default_database_path() -> String {
    "./crawl-runner.db".to_string()
}

fn default_true() -> bool {
    true
}

fn default_navigation_timeout_ms() -> u64 {
    30_000
}

fn default_attachment_concurrency() -> usize {
    4
}

fn default_attachment_timeout_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_attachment_max_size() -> u64 {
    100 * 1024 * 1024
}

fn default_retry_base_delay_ms() -> u64 {
    1_000
}

fn default_tool_path() -> PathBuf {
    PathBuf::from("yt-dlp")
}

fn default_video_concurrency() -> usize {
    1
}

fn default_video_timeout_ms() -> u64 {
    10 * 60 * 1000
}

fn default_video_max_size() -> u64 {
    500 * 1024 * 1024
}

fn default_quality() -> String {
    "high".to_string()
}

fn default_format() -> String {
    "mp4".to_string()
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            outputs_root: default_outputs_root(),
            extractor_command: None,
            extractor_args: Vec::new(),
            selectors_path: default_selectors_path(),
            poll_interval_ms: default_poll_interval_ms(),
            run_timeout_ms: default_run_timeout_ms(),
            grace_window_ms: default_grace_window_ms(),
            cancel_check_interval_ms: default_cancel_check_interval_ms(),
            output_tail_lines: default_output_tail_lines(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_executable: None,
            navigation_timeout_ms: default_navigation_timeout_ms(),
        }
    }
}

impl Default for AttachmentConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_attachment_concurrency(),
            timeout_ms: default_attachment_timeout_ms(),
            max_retries: default_max_retries(),
            max_size_bytes: default_attachment_max_size(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
        }
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            tool_path: default_tool_path(),
            max_concurrent: default_video_concurrency(),
            timeout_ms: default_video_timeout_ms(),
            max_retries: default_max_retries(),
            max_size_bytes: default_video_max_size(),
            quality: default_quality(),
            format: default_format(),
            subtitles: false,
            thumbnail: false,
            retry_base_delay_ms: default_retry_base_delay_ms(),
        }
    }
}
