//! Video acquisition against a scripted stand-in for yt-dlp

use crawl_runner::acquisition::{
    VideoDownloadTask, VideoDownloader, VideoFormat, VideoOptions, VideoQuality, VideoTarget,
};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// Writes an executable fake tool into `dir`
///
/// The tool answers `--version`, prints `metadata` for `--dump-json`, and in
/// download mode fails `failures` times before writing the `-o` target with
/// an `mp4` extension. Every download attempt is appended to `attempts.log`.
fn fake_tool(dir: &Path, metadata: &str, failures: u32) -> PathBuf {
    let log = dir.join("attempts.log");
    let script = format!(
        r#"#!/bin/sh
case "$1" in
  --version) echo "2024.01.01"; exit 0 ;;
  --dump-json) echo '{metadata}'; exit 0 ;;
esac
echo attempt >> "{log}"
attempts=$(wc -l < "{log}")
if [ "$attempts" -le {failures} ]; then
  echo "ERROR: unable to download video data: HTTP Error 503" >&2
  exit 1
fi
out=""
while [ $# -gt 0 ]; do
  if [ "$1" = "-o" ]; then out="$2"; shift; fi
  shift
done
file=$(printf '%s' "$out" | sed 's/%(ext)s/mp4/')
printf 'fake video bytes' > "$file"
"#,
        metadata = metadata,
        log = log.display(),
        failures = failures,
    );

    let path = dir.join("fake-yt-dlp");
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn attempts(dir: &Path) -> usize {
    std::fs::read_to_string(dir.join("attempts.log"))
        .map(|log| log.lines().count())
        .unwrap_or(0)
}

fn options() -> VideoOptions {
    VideoOptions {
        timeout: Duration::from_secs(10),
        max_retries: 3,
        max_size_bytes: 1024 * 1024,
        quality: VideoQuality::Medium,
        format: VideoFormat::Mp4,
        subtitles: false,
        thumbnail: false,
        retry_base_delay: Duration::from_millis(20),
    }
}

fn task(output_dir: &Path, filename: &str) -> VideoDownloadTask {
    VideoDownloadTask {
        target: VideoTarget {
            url: "https://video.example.com/watch?v=42".to_string(),
            output_dir: output_dir.to_path_buf(),
            filename: filename.to_string(),
        },
        options: options(),
    }
}

const METADATA: &str =
    r#"{"title":"Lecture 3","duration":1805.0,"filesize":2048,"width":1280,"height":720,"ext":"mp4"}"#;

#[tokio::test]
async fn test_download_reports_metadata_and_file() {
    let tools = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let downloader = VideoDownloader::new(fake_tool(tools.path(), METADATA, 0));

    let result = downloader.download(task(out.path(), "Lecture 3.mp4")).await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.local_path, Some(out.path().join("Lecture_3.mp4")));
    assert_eq!(result.file_size_bytes, Some(16));
    assert_eq!(result.title.as_deref(), Some("Lecture 3"));
    assert_eq!(result.duration_secs, Some(1805.0));
    assert_eq!(result.resolution.as_deref(), Some("1280x720"));
    assert_eq!(result.format.as_deref(), Some("mp4"));
    assert_eq!(attempts(tools.path()), 1);
}

#[tokio::test]
async fn test_declared_size_over_limit_skips_download() {
    let tools = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let huge = r#"{"title":"Huge","filesize":200000000}"#;
    let downloader = VideoDownloader::new(fake_tool(tools.path(), huge, 0));

    let result = downloader.download(task(out.path(), "huge")).await;

    assert!(!result.success);
    assert!(result.error.unwrap().contains("too large"));
    assert_eq!(attempts(tools.path()), 0);
}

#[tokio::test]
async fn test_tool_failures_are_retried() {
    let tools = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let downloader = VideoDownloader::new(fake_tool(tools.path(), METADATA, 2));

    let result = downloader.download(task(out.path(), "flaky")).await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(attempts(tools.path()), 3);
}

#[tokio::test]
async fn test_retry_cap_surfaces_tool_error() {
    let tools = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let downloader = VideoDownloader::new(fake_tool(tools.path(), METADATA, 10));

    let result = downloader.download(task(out.path(), "broken")).await;

    assert!(!result.success);
    assert!(result.error.unwrap().contains("HTTP Error 503"));
    assert_eq!(attempts(tools.path()), 3);
}

#[tokio::test]
async fn test_chunked_batch_keeps_target_order() {
    let tools = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let downloader = VideoDownloader::new(fake_tool(tools.path(), METADATA, 0));

    let targets = ["week-1", "week-2", "week-3"]
        .into_iter()
        .map(|name| VideoTarget {
            url: format!("https://video.example.com/{}", name),
            output_dir: out.path().to_path_buf(),
            filename: name.to_string(),
        })
        .collect();

    let results = downloader.download_in_chunks(targets, &options(), 2).await;

    assert_eq!(results.len(), 3);
    for (result, name) in results.iter().zip(["week-1", "week-2", "week-3"]) {
        assert_eq!(
            result.local_path,
            Some(out.path().join(format!("{}.mp4", name)))
        );
    }
}
