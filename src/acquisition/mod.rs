//! Resilient batch acquisition of attachments and videos
//!
//! This module downloads the assets discovered by an extraction run:
//! - A bounded-concurrency batch engine keyed by source URL
//! - Direct HTTP attachment downloads with size limits
//! - Video downloads through an external yt-dlp compatible tool
//! - Exponential backoff shared by both transfer kinds

mod attachments;
mod engine;
mod filename;
mod video;

pub use attachments::{AttachmentDownloader, DownloadOptions, DownloadTask};
pub use engine::{acquire_batch, acquire_in_windows, backoff_delay, AcquisitionTask};
pub use filename::sanitize_filename;
pub use video::{
    VideoDownloadTask, VideoDownloader, VideoFormat, VideoMetadata, VideoOptions, VideoQuality,
    VideoTarget,
};

use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors from a single acquisition attempt
#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("File too large: {size} bytes exceeds the {max} byte limit")]
    TooLarge { size: u64, max: u64 },

    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    ToolMissing(String),

    #[error("Video tool failed ({status}): {stderr}")]
    ToolFailed { status: String, stderr: String },

    #[error("No output file produced for {0}")]
    OutputMissing(String),

    #[error("Metadata probe failed: {0}")]
    Probe(String),
}

impl AcquisitionError {
    /// Returns true if another attempt cannot change the outcome
    pub(crate) fn is_permanent(&self) -> bool {
        matches!(self, Self::ToolMissing(_) | Self::TooLarge { .. })
    }
}

/// Outcome of one attachment download
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadResult {
    pub success: bool,
    pub local_path: Option<PathBuf>,
    pub file_size_bytes: Option<u64>,
    pub error: Option<String>,
}

impl DownloadResult {
    pub fn succeeded(local_path: PathBuf, file_size_bytes: u64) -> Self {
        Self {
            success: true,
            local_path: Some(local_path),
            file_size_bytes: Some(file_size_bytes),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            local_path: None,
            file_size_bytes: None,
            error: Some(error.into()),
        }
    }
}

/// Outcome of one video download
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoDownloadResult {
    pub success: bool,
    pub local_path: Option<PathBuf>,
    pub file_size_bytes: Option<u64>,
    pub error: Option<String>,
    pub title: Option<String>,
    pub duration_secs: Option<f64>,
    pub resolution: Option<String>,
    pub format: Option<String>,
}

impl VideoDownloadResult {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            local_path: None,
            file_size_bytes: None,
            error: Some(error.into()),
            title: None,
            duration_secs: None,
            resolution: None,
            format: None,
        }
    }
}
