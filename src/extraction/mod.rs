//! Extraction worker
//!
//! This is the process the supervisor runs for each claimed run. It reads its
//! parameters from the environment and:
//! - Creates a timestamped result directory under the run's output directory
//! - Logs into the site with an authenticated browser session
//! - Visits every target URL and stores a page snapshot
//! - Acquires the assets listed in the optional asset manifest
//! - Writes `run-report.json` with the run's metrics

mod manifest;
mod params;
mod report;

pub use manifest::{AssetEntry, AssetManifest};
pub use params::{
    ExtractionParams, ENV_ASSET_MANIFEST, ENV_BASE_URL, ENV_CONFIG_PATH, ENV_OUTPUT_DIR,
    ENV_PASSWORD, ENV_RUN_ID, ENV_SELECTORS_PATH, ENV_TARGET_URLS, ENV_USERNAME,
};
pub use report::{result_dir_name, ExtractionMetrics, RunReport, REPORT_FILE, RESULT_DIR_FORMAT};

use crate::acquisition::{
    AttachmentDownloader, DownloadOptions, DownloadTask, VideoDownloadTask, VideoDownloader,
    VideoOptions, VideoTarget,
};
use crate::config::Config;
use crate::session::{
    navigate_with_retry, BrowserLauncher, ChromiumLauncher, Credentials, RetryPolicy, Session,
    SessionEstablisher, SiteProfile,
};
use crate::{Result, RunnerError};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::time::Instant;

const PAGES_DIR: &str = "pages";
const ATTACHMENTS_DIR: &str = "attachments";
const VIDEOS_DIR: &str = "videos";
const ASSETS_FILE: &str = "assets.json";

/// Runs one extraction with a local Chromium browser
///
/// # Returns
///
/// The timestamped result directory
pub async fn run_extraction(params: &ExtractionParams, config: &Config) -> Result<PathBuf> {
    let launcher = ChromiumLauncher::new(config.browser.clone());
    Extractor::new(launcher, config.clone()).run(params).await
}

/// Extraction pipeline over any browser backend
pub struct Extractor<L> {
    establisher: SessionEstablisher<L>,
    config: Config,
}

impl<L: BrowserLauncher> Extractor<L> {
    pub fn new(launcher: L, config: Config) -> Self {
        Self {
            establisher: SessionEstablisher::new(launcher),
            config,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.establisher = self.establisher.with_retry_policy(retry);
        self
    }

    pub async fn run(&self, params: &ExtractionParams) -> Result<PathBuf> {
        let started_at = Utc::now();
        let clock = Instant::now();

        let result_dir = params.output_dir.join(result_dir_name(started_at));
        tokio::fs::create_dir_all(&result_dir).await?;
        tracing::info!(
            "Extraction for run {} writing to {}",
            params.run_id,
            result_dir.display()
        );

        let profile = SiteProfile::load(&params.selectors_path)?;
        let credentials = Credentials::new(params.username.clone(), params.password.clone());
        let session = self
            .establisher
            .establish_session(&profile, &params.base_url, &credentials)
            .await?;

        let mut metrics = ExtractionMetrics {
            targets: params.target_urls.len(),
            ..Default::default()
        };
        let mut errors = Vec::new();

        let captured = self
            .capture_pages(&session, &params.target_urls, &result_dir, &mut metrics, &mut errors)
            .await;

        let cookie_header = match &captured {
            Ok(()) => match session.page().cookie_header().await {
                Ok(header) => header,
                Err(e) => {
                    tracing::warn!("Could not read session cookies: {}", e);
                    None
                }
            },
            Err(_) => None,
        };
        // The browser is shut down even when capturing failed
        if let Err(e) = session.close().await {
            tracing::debug!("Closing browser: {}", e);
        }
        captured?;

        if let Some(manifest_path) = &params.asset_manifest {
            let manifest = AssetManifest::load(manifest_path)?;
            self.acquire_assets(
                &manifest,
                cookie_header.as_deref(),
                &result_dir,
                &mut metrics,
                &mut errors,
            )
            .await?;
        }

        metrics.duration_ms = clock.elapsed().as_millis() as u64;
        let report = RunReport {
            run_id: params.run_id.clone(),
            started_at,
            finished_at: Utc::now(),
            metrics,
            errors,
        };
        report.write(&result_dir)?;

        tracing::info!(
            "Extraction finished: {}/{} pages, {} attachments, {} videos in {}ms",
            report.metrics.pages_visited,
            report.metrics.targets,
            report.metrics.attachments_succeeded,
            report.metrics.videos_succeeded,
            report.metrics.duration_ms
        );

        if report.metrics.targets > 0 && report.metrics.pages_visited == 0 {
            return Err(RunnerError::Extraction(format!(
                "none of the {} target pages could be loaded",
                report.metrics.targets
            )));
        }

        Ok(result_dir)
    }

    async fn capture_pages(
        &self,
        session: &Session,
        target_urls: &[String],
        result_dir: &Path,
        metrics: &mut ExtractionMetrics,
        errors: &mut Vec<String>,
    ) -> Result<()> {
        let pages_dir = result_dir.join(PAGES_DIR);
        tokio::fs::create_dir_all(&pages_dir).await?;
        let page = session.page();

        for (index, url) in target_urls.iter().enumerate() {
            let snapshot = match navigate_with_retry(page, url, self.establisher.retry_policy()).await {
                Ok(()) => page.content().await,
                Err(e) => Err(e),
            };

            match snapshot {
                Ok(html) => {
                    tokio::fs::write(pages_dir.join(format!("{:03}.html", index)), html).await?;
                    metrics.pages_visited += 1;
                    tracing::debug!("Captured {}", url);
                }
                Err(e) => {
                    tracing::warn!("Failed to capture {}: {}", url, e);
                    metrics.pages_failed += 1;
                    errors.push(format!("{}: {}", url, e));
                }
            }
        }

        Ok(())
    }

    async fn acquire_assets(
        &self,
        manifest: &AssetManifest,
        cookie_header: Option<&str>,
        result_dir: &Path,
        metrics: &mut ExtractionMetrics,
        errors: &mut Vec<String>,
    ) -> Result<()> {
        let mut assets = serde_json::Map::new();

        if !manifest.attachments.is_empty() {
            let options = DownloadOptions::from(&self.config.attachments);
            let output_dir = result_dir.join(ATTACHMENTS_DIR);
            let tasks = manifest
                .attachments
                .iter()
                .map(|entry| DownloadTask {
                    url: entry.url.clone(),
                    output_dir: output_dir.clone(),
                    filename: entry.filename(),
                    options: options.clone(),
                })
                .collect();

            let downloader = AttachmentDownloader::with_cookie_header(cookie_header)
                .map_err(|e| RunnerError::Extraction(format!("building HTTP client: {}", e)))?;
            let results = downloader
                .download_all(tasks, self.config.attachments.max_concurrent)
                .await;

            for (url, result) in &results {
                if result.success {
                    metrics.attachments_succeeded += 1;
                } else {
                    metrics.attachments_failed += 1;
                    errors.push(format!("{}: {}", url, result.error.as_deref().unwrap_or("unknown error")));
                }
            }
            assets.insert("attachments".to_string(), serde_json::to_value(&results)?);
        }

        if !manifest.videos.is_empty() {
            let options = VideoOptions::try_from(&self.config.videos)?;
            let output_dir = result_dir.join(VIDEOS_DIR);
            let tasks = manifest
                .videos
                .iter()
                .map(|entry| VideoDownloadTask {
                    target: VideoTarget {
                        url: entry.url.clone(),
                        output_dir: output_dir.clone(),
                        filename: entry.filename(),
                    },
                    options: options.clone(),
                })
                .collect();

            let downloader = VideoDownloader::new(&self.config.videos.tool_path);
            let results = downloader
                .download_all(tasks, self.config.videos.max_concurrent)
                .await;

            for (url, result) in &results {
                if result.success {
                    metrics.videos_succeeded += 1;
                } else {
                    metrics.videos_failed += 1;
                    errors.push(format!("{}: {}", url, result.error.as_deref().unwrap_or("unknown error")));
                }
            }
            assets.insert("videos".to_string(), serde_json::to_value(&results)?);
        }

        if !assets.is_empty() {
            let json = serde_json::to_string_pretty(&assets)?;
            tokio::fs::write(result_dir.join(ASSETS_FILE), json).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::FakeBrowser;
    use crate::session::BrowserErrorKind;
    use regex::Regex;
    use std::time::Duration;
    use tempfile::TempDir;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            backoff_step: Duration::from_millis(1),
            settle_delay: Duration::ZERO,
        }
    }

    fn params(dir: &TempDir, targets: Vec<String>) -> ExtractionParams {
        let selectors = dir.path().join("site.toml");
        std::fs::write(&selectors, "logged-in-selector = \"#dashboard\"\n").unwrap();

        ExtractionParams {
            run_id: "run-1".to_string(),
            base_url: "https://school.example.com".to_string(),
            username: "alice".to_string(),
            password: "secret".to_string(),
            output_dir: dir.path().join("out"),
            target_urls: targets,
            selectors_path: selectors,
            config_path: None,
            asset_manifest: None,
        }
    }

    fn extractor(browser: &FakeBrowser) -> Extractor<FakeBrowser> {
        Extractor::new(browser.clone(), Config::default()).with_retry_policy(fast_policy())
    }

    #[tokio::test]
    async fn test_extraction_writes_snapshots_and_report() {
        let dir = TempDir::new().unwrap();
        let browser = FakeBrowser::default();
        let params = params(
            &dir,
            vec![
                "https://school.example.com/c/1".to_string(),
                "https://school.example.com/c/2".to_string(),
            ],
        );

        let result_dir = extractor(&browser).run(&params).await.unwrap();

        let name = result_dir.file_name().unwrap().to_string_lossy().into_owned();
        let pattern = Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}-\d{2}-\d{2}-\d{3}Z$").unwrap();
        assert!(pattern.is_match(&name), "unexpected directory name {}", name);
        assert!(result_dir.join("pages/000.html").exists());
        assert!(result_dir.join("pages/001.html").exists());

        let report: RunReport =
            serde_json::from_str(&std::fs::read_to_string(result_dir.join(REPORT_FILE)).unwrap())
                .unwrap();
        assert_eq!(report.metrics.targets, 2);
        assert_eq!(report.metrics.pages_visited, 2);
        assert!(report.errors.is_empty());
        assert!(browser.closed());
    }

    #[tokio::test]
    async fn test_partial_page_failure_is_reported() {
        let dir = TempDir::new().unwrap();
        let browser = FakeBrowser::default();
        let params = params(
            &dir,
            vec![
                "https://school.example.com/c/1".to_string(),
                "https://school.example.com/c/2".to_string(),
            ],
        );

        // Only target pages read content, so the first snapshot fails
        browser.fail("content", BrowserErrorKind::Protocol, 1);
        let result_dir = extractor(&browser).run(&params).await.unwrap();

        let report: RunReport =
            serde_json::from_str(&std::fs::read_to_string(result_dir.join(REPORT_FILE)).unwrap())
                .unwrap();
        assert_eq!(report.metrics.pages_visited, 1);
        assert_eq!(report.metrics.pages_failed, 1);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("https://school.example.com/c/1"));
    }

    #[tokio::test]
    async fn test_login_failure_fails_extraction() {
        let dir = TempDir::new().unwrap();
        let browser = FakeBrowser::default();
        browser.fail("wait_for_selector", BrowserErrorKind::ElementNotFound, 1);
        let params = params(&dir, vec!["https://school.example.com/c/1".to_string()]);

        let result = extractor(&browser).run(&params).await;

        assert!(matches!(result, Err(RunnerError::Browser(_))));
        assert!(browser.closed());
    }

    #[tokio::test]
    async fn test_snapshot_write_failure_still_closes_browser() {
        let dir = TempDir::new().unwrap();
        let browser = FakeBrowser::default();
        let params = params(&dir, vec!["https://school.example.com/c/1".to_string()]);

        // Replace the snapshot directory with a plain file once capturing starts
        let out = params.output_dir.clone();
        browser.on_call("content", move || {
            for entry in std::fs::read_dir(&out).unwrap() {
                let pages = entry.unwrap().path().join(PAGES_DIR);
                if pages.is_dir() {
                    std::fs::remove_dir_all(&pages).unwrap();
                    std::fs::write(&pages, b"not a directory").unwrap();
                }
            }
        });

        let result = extractor(&browser).run(&params).await;

        assert!(matches!(result, Err(RunnerError::Io(_))));
        assert!(browser.closed());
        assert_eq!(browser.count("cookie_header"), 0);
    }

    #[tokio::test]
    async fn test_manifest_attachments_use_session_cookies() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files/syllabus.pdf"))
            .and(header("cookie", "session=abc"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"pdf".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let manifest_path = dir.path().join("assets.json");
        std::fs::write(
            &manifest_path,
            format!(
                r#"{{"attachments": [{{"url": "{}/files/syllabus.pdf"}}]}}"#,
                server.uri()
            ),
        )
        .unwrap();

        let browser = FakeBrowser::default();
        let mut params = params(&dir, Vec::new());
        params.asset_manifest = Some(manifest_path);

        let result_dir = extractor(&browser).run(&params).await.unwrap();

        assert_eq!(
            std::fs::read(result_dir.join("attachments/syllabus.pdf")).unwrap(),
            b"pdf"
        );
        let report: RunReport =
            serde_json::from_str(&std::fs::read_to_string(result_dir.join(REPORT_FILE)).unwrap())
                .unwrap();
        assert_eq!(report.metrics.attachments_succeeded, 1);
        assert!(result_dir.join(ASSETS_FILE).exists());
    }
}
