//! Direct HTTP attachment downloads
//!
//! Each attempt is bounded by an explicit timeout. A declared
//! `Content-Length` over the size limit aborts before the body is read, and
//! the buffered body is checked again before anything touches the disk.

use super::engine::{acquire_batch, retry_with_backoff, AcquisitionTask};
use super::{sanitize_filename, AcquisitionError, DownloadResult};
use crate::config::AttachmentConfig;
use reqwest::header::{HeaderMap, HeaderValue, COOKIE};
use reqwest::Client;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Per-download limits
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub timeout: Duration,
    pub max_retries: u32,
    pub max_size_bytes: u64,
    pub retry_base_delay: Duration,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self::from(&AttachmentConfig::default())
    }
}

impl From<&AttachmentConfig> for DownloadOptions {
    fn from(config: &AttachmentConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.timeout_ms),
            max_retries: config.max_retries,
            max_size_bytes: config.max_size_bytes,
            retry_base_delay: Duration::from_millis(config.retry_base_delay_ms),
        }
    }
}

/// One attachment to fetch
#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub url: String,
    pub output_dir: PathBuf,
    pub filename: String,
    pub options: DownloadOptions,
}

impl AcquisitionTask for DownloadTask {
    fn source_url(&self) -> &str {
        &self.url
    }
}

/// Downloads attachments over HTTP
#[derive(Clone)]
pub struct AttachmentDownloader {
    client: Client,
}

impl AttachmentDownloader {
    /// Creates a downloader without session cookies
    pub fn new() -> Result<Self, AcquisitionError> {
        Self::with_cookie_header(None)
    }

    /// Creates a downloader that sends `cookie_header` with every request
    ///
    /// Used to forward the authenticated browser session's cookies.
    pub fn with_cookie_header(cookie_header: Option<&str>) -> Result<Self, AcquisitionError> {
        let mut headers = HeaderMap::new();
        if let Some(cookie) = cookie_header {
            match HeaderValue::from_str(cookie) {
                Ok(value) => {
                    headers.insert(COOKIE, value);
                }
                Err(e) => tracing::warn!("Ignoring unusable session cookie header: {}", e),
            }
        }

        let client = Client::builder()
            .user_agent(concat!("crawl-runner/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .default_headers(headers)
            .build()?;

        Ok(Self { client })
    }

    /// Downloads one attachment with retries
    ///
    /// Never fails: the outcome, including the last error on exhaustion, is
    /// carried by the returned `DownloadResult`.
    pub async fn download(&self, task: DownloadTask) -> DownloadResult {
        let path = task.output_dir.join(sanitize_filename(&task.filename));
        let options = &task.options;

        let outcome = retry_with_backoff(
            options.max_retries,
            options.retry_base_delay,
            &format!("Download of {}", task.url),
            |_| self.fetch_to_file(&task.url, &path, options),
        )
        .await;

        match outcome {
            Ok(size) => {
                tracing::info!("Downloaded {} ({} bytes) to {}", task.url, size, path.display());
                DownloadResult::succeeded(path, size)
            }
            Err(e) => {
                tracing::warn!("Giving up on {}: {}", task.url, e);
                DownloadResult::failed(e.to_string())
            }
        }
    }

    /// Downloads a batch with at most `concurrency_limit` transfers in flight
    ///
    /// # Returns
    ///
    /// One result per distinct source URL
    pub async fn download_all(
        &self,
        tasks: Vec<DownloadTask>,
        concurrency_limit: usize,
    ) -> HashMap<String, DownloadResult> {
        acquire_batch(tasks, concurrency_limit, |task| self.download(task)).await
    }

    async fn fetch_to_file(
        &self,
        url: &str,
        path: &Path,
        options: &DownloadOptions,
    ) -> Result<u64, AcquisitionError> {
        let body = tokio::time::timeout(options.timeout, self.fetch_body(url, options.max_size_bytes))
            .await
            .map_err(|_| AcquisitionError::Timeout(options.timeout))??;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if let Err(e) = tokio::fs::write(path, &body).await {
            // A partial file must not be left behind
            let _ = tokio::fs::remove_file(path).await;
            return Err(e.into());
        }

        Ok(body.len() as u64)
    }

    async fn fetch_body(&self, url: &str, max_size: u64) -> Result<Vec<u8>, AcquisitionError> {
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AcquisitionError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        if let Some(declared) = response.content_length() {
            check_size(declared, max_size)?;
        }

        let body = response.bytes().await?;
        check_size(body.len() as u64, max_size)?;

        Ok(body.to_vec())
    }
}

fn check_size(size: u64, max: u64) -> Result<(), AcquisitionError> {
    if size > max {
        Err(AcquisitionError::TooLarge { size, max })
    } else {
        Ok(())
    }
}
