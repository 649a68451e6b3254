//! Video downloads through an external yt-dlp compatible tool
//!
//! A download runs in three phases:
//! 1. Check that the tool can be called at all (no retry if it cannot)
//! 2. Probe metadata with a dry-run JSON dump; a declared size over the limit
//!    fails before any transfer
//! 3. Run the download with retries and locate the produced file

use super::engine::{acquire_batch, acquire_in_windows, retry_with_backoff, AcquisitionTask};
use super::{sanitize_filename, AcquisitionError, VideoDownloadResult};
use crate::config::VideoConfig;
use crate::ConfigError;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::str::FromStr;
use std::time::Duration;
use tokio::process::Command;

const STDERR_TAIL_LINES: usize = 20;

/// Requested video quality
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoQuality {
    Best,
    High,
    Medium,
    Low,
}

impl VideoQuality {
    /// The tool's format selection expression for this quality
    pub fn format_selector(&self) -> &'static str {
        match self {
            Self::Best => "bestvideo+bestaudio/best",
            Self::High => "bestvideo[height<=1080]+bestaudio/best[height<=1080]",
            Self::Medium => "bestvideo[height<=720]+bestaudio/best[height<=720]",
            Self::Low => "bestvideo[height<=480]+bestaudio/best[height<=480]",
        }
    }
}

impl FromStr for VideoQuality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "best" => Ok(Self::Best),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            other => Err(format!(
                "unknown video quality '{}' (expected best, high, medium or low)",
                other
            )),
        }
    }
}

/// Container the downloaded streams are merged into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoFormat {
    Mp4,
    Webm,
    Mkv,
}

impl VideoFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Webm => "webm",
            Self::Mkv => "mkv",
        }
    }
}

impl fmt::Display for VideoFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VideoFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mp4" => Ok(Self::Mp4),
            "webm" => Ok(Self::Webm),
            "mkv" => Ok(Self::Mkv),
            other => Err(format!(
                "unknown video format '{}' (expected mp4, webm or mkv)",
                other
            )),
        }
    }
}

/// Per-download settings
#[derive(Debug, Clone)]
pub struct VideoOptions {
    pub timeout: Duration,
    pub max_retries: u32,
    pub max_size_bytes: u64,
    pub quality: VideoQuality,
    pub format: VideoFormat,
    pub subtitles: bool,
    pub thumbnail: bool,
    pub retry_base_delay: Duration,
}

impl TryFrom<&VideoConfig> for VideoOptions {
    type Error = ConfigError;

    fn try_from(config: &VideoConfig) -> Result<Self, Self::Error> {
        Ok(Self {
            timeout: Duration::from_millis(config.timeout_ms),
            max_retries: config.max_retries,
            max_size_bytes: config.max_size_bytes,
            quality: config.quality.parse().map_err(ConfigError::Validation)?,
            format: config.format.parse().map_err(ConfigError::Validation)?,
            subtitles: config.subtitles,
            thumbnail: config.thumbnail,
            retry_base_delay: Duration::from_millis(config.retry_base_delay_ms),
        })
    }
}

/// Where one video goes
#[derive(Debug, Clone)]
pub struct VideoTarget {
    pub url: String,
    pub output_dir: PathBuf,
    pub filename: String,
}

/// One video to fetch
#[derive(Debug, Clone)]
pub struct VideoDownloadTask {
    pub target: VideoTarget,
    pub options: VideoOptions,
}

impl AcquisitionTask for VideoDownloadTask {
    fn source_url(&self) -> &str {
        &self.target.url
    }
}

/// Metadata reported by the tool's dry run
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VideoMetadata {
    pub title: Option<String>,
    pub duration: Option<f64>,
    pub filesize: Option<u64>,
    pub filesize_approx: Option<f64>,
    pub resolution: Option<String>,
    pub width: Option<u64>,
    pub height: Option<u64>,
    pub ext: Option<String>,
}

impl VideoMetadata {
    /// Exact size if known, otherwise the tool's estimate
    pub fn declared_size(&self) -> Option<u64> {
        self.filesize
            .or_else(|| self.filesize_approx.map(|approx| approx as u64))
    }

    pub fn resolution(&self) -> Option<String> {
        match (&self.resolution, self.width, self.height) {
            (Some(res), _, _) => Some(res.clone()),
            (None, Some(w), Some(h)) => Some(format!("{}x{}", w, h)),
            _ => None,
        }
    }
}

/// Drives the external video tool
#[derive(Debug, Clone)]
pub struct VideoDownloader {
    tool: PathBuf,
}

impl VideoDownloader {
    pub fn new(tool: impl Into<PathBuf>) -> Self {
        Self { tool: tool.into() }
    }

    /// Verifies the tool can be called
    ///
    /// # Returns
    ///
    /// * `Ok(String)` - The tool's reported version
    /// * `Err(AcquisitionError::ToolMissing)` - With an installation hint
    pub async fn ensure_available(&self) -> Result<String, AcquisitionError> {
        let resolved = which::which(&self.tool).map_err(|_| self.missing_tool_error())?;

        let output = Command::new(&resolved)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|_| self.missing_tool_error())?;

        if !output.status.success() {
            return Err(self.missing_tool_error());
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn missing_tool_error(&self) -> AcquisitionError {
        AcquisitionError::ToolMissing(format!(
            "Video tool '{}' is not available. Install yt-dlp (e.g. `pip install yt-dlp`) \
             or set `tool-path` in the [videos] configuration section",
            self.tool.display()
        ))
    }

    /// Reads metadata without downloading
    pub async fn probe(&self, url: &str, timeout: Duration) -> Result<VideoMetadata, AcquisitionError> {
        let mut command = Command::new(&self.tool);
        command
            .args(["--dump-json", "--no-download", "--no-playlist", url])
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::time::timeout(timeout, command.output())
            .await
            .map_err(|_| AcquisitionError::Timeout(timeout))??;

        if !output.status.success() {
            return Err(AcquisitionError::Probe(tail(&output.stderr)));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let first_line = stdout.lines().next().unwrap_or_default();
        serde_json::from_str(first_line).map_err(|e| AcquisitionError::Probe(e.to_string()))
    }

    /// Command-line arguments for a download into `dir/name.<ext>`
    pub fn download_args(&self, url: &str, dir: &Path, name: &str, options: &VideoOptions) -> Vec<String> {
        let template = dir.join(format!("{}.%(ext)s", name));

        let mut args = vec![
            "-f".to_string(),
            options.quality.format_selector().to_string(),
            "--merge-output-format".to_string(),
            options.format.as_str().to_string(),
        ];
        if options.subtitles {
            args.push("--write-subs".to_string());
            args.push("--embed-subs".to_string());
        }
        if options.thumbnail {
            args.push("--embed-thumbnail".to_string());
        }
        args.extend([
            "--max-filesize".to_string(),
            options.max_size_bytes.to_string(),
            "-o".to_string(),
            template.to_string_lossy().into_owned(),
            "--no-playlist".to_string(),
            "--no-progress".to_string(),
            url.to_string(),
        ]);
        args
    }

    /// Downloads one video with retries
    ///
    /// Never fails: the outcome is carried by the returned result.
    pub async fn download(&self, task: VideoDownloadTask) -> VideoDownloadResult {
        let VideoDownloadTask { target, options } = task;

        if let Err(e) = self.ensure_available().await {
            tracing::error!("{}", e);
            return VideoDownloadResult::failed(e.to_string());
        }

        let metadata = match self.probe(&target.url, options.timeout).await {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::warn!("Could not probe {}, downloading without metadata: {}", target.url, e);
                VideoMetadata::default()
            }
        };

        if let Some(size) = metadata.declared_size() {
            if size > options.max_size_bytes {
                let err = AcquisitionError::TooLarge {
                    size,
                    max: options.max_size_bytes,
                };
                tracing::warn!("Skipping {}: {}", target.url, err);
                return VideoDownloadResult::failed(err.to_string());
            }
        }

        let name = output_name(&target.filename);
        let outcome = retry_with_backoff(
            options.max_retries,
            options.retry_base_delay,
            &format!("Video download of {}", target.url),
            |_| self.run_download(&target, &name, &options),
        )
        .await;

        match outcome {
            Ok((path, size)) => {
                tracing::info!("Downloaded video {} ({} bytes) to {}", target.url, size, path.display());
                VideoDownloadResult {
                    success: true,
                    local_path: Some(path),
                    file_size_bytes: Some(size),
                    error: None,
                    title: metadata.title.clone(),
                    duration_secs: metadata.duration,
                    resolution: metadata.resolution(),
                    format: Some(options.format.to_string()),
                }
            }
            Err(e) => {
                tracing::warn!("Giving up on video {}: {}", target.url, e);
                VideoDownloadResult::failed(e.to_string())
            }
        }
    }

    /// Downloads a batch with at most `concurrency_limit` transfers in flight
    pub async fn download_all(
        &self,
        tasks: Vec<VideoDownloadTask>,
        concurrency_limit: usize,
    ) -> HashMap<String, VideoDownloadResult> {
        acquire_batch(tasks, concurrency_limit, |task| self.download(task)).await
    }

    /// Downloads targets in sequential windows of `chunk_size`, sharing options
    ///
    /// # Returns
    ///
    /// Results in the same order as `targets`
    pub async fn download_in_chunks(
        &self,
        targets: Vec<VideoTarget>,
        options: &VideoOptions,
        chunk_size: usize,
    ) -> Vec<VideoDownloadResult> {
        let tasks = targets
            .into_iter()
            .map(|target| VideoDownloadTask {
                target,
                options: options.clone(),
            })
            .collect();
        acquire_in_windows(tasks, chunk_size, |task| self.download(task)).await
    }

    async fn run_download(
        &self,
        target: &VideoTarget,
        name: &str,
        options: &VideoOptions,
    ) -> Result<(PathBuf, u64), AcquisitionError> {
        tokio::fs::create_dir_all(&target.output_dir).await?;

        let mut command = Command::new(&self.tool);
        command
            .args(self.download_args(&target.url, &target.output_dir, name, options))
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::time::timeout(options.timeout, command.output())
            .await
            .map_err(|_| AcquisitionError::Timeout(options.timeout))??;

        if !output.status.success() {
            return Err(AcquisitionError::ToolFailed {
                status: output.status.to_string(),
                stderr: tail(&output.stderr),
            });
        }

        let path = find_produced_file(&target.output_dir, name, options.format)
            .await?
            .ok_or_else(|| AcquisitionError::OutputMissing(target.url.clone()))?;
        let size = tokio::fs::metadata(&path).await?.len();
        Ok((path, size))
    }
}

/// Output file stem for a requested filename
fn output_name(filename: &str) -> String {
    let name = sanitize_filename(filename);
    for format in [VideoFormat::Mp4, VideoFormat::Webm, VideoFormat::Mkv] {
        let suffix = format!(".{}", format.as_str());
        if let Some(stem) = name.strip_suffix(&suffix) {
            if !stem.is_empty() {
                return stem.to_string();
            }
        }
    }
    name
}

/// Finds the file the tool produced for `name`, preferring the merge format
async fn find_produced_file(
    dir: &Path,
    name: &str,
    format: VideoFormat,
) -> Result<Option<PathBuf>, AcquisitionError> {
    let prefix = format!("{}.", name);
    let preferred = format!("{}{}", prefix, format.as_str());
    let mut best: Option<(PathBuf, u64)> = None;

    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let file_name = entry.file_name().to_string_lossy().into_owned();
        if !file_name.starts_with(&prefix)
            || file_name.ends_with(".part")
            || file_name.ends_with(".ytdl")
        {
            continue;
        }

        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            continue;
        }
        if file_name == preferred {
            return Ok(Some(entry.path()));
        }
        if best.as_ref().map_or(true, |(_, size)| metadata.len() > *size) {
            best = Some((entry.path(), metadata.len()));
        }
    }

    Ok(best.map(|(path, _)| path))
}

fn tail(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}
