//! Attachment acquisition against mock HTTP servers

use crawl_runner::acquisition::{AttachmentDownloader, DownloadOptions, DownloadTask};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MB: u64 = 1024 * 1024;

fn options() -> DownloadOptions {
    DownloadOptions {
        timeout: Duration::from_secs(5),
        max_retries: 3,
        max_size_bytes: 100 * MB,
        retry_base_delay: Duration::from_millis(100),
    }
}

fn task(server: &MockServer, route: &str, dir: &TempDir) -> DownloadTask {
    DownloadTask {
        url: format!("{}{}", server.uri(), route),
        output_dir: dir.path().to_path_buf(),
        filename: route.trim_start_matches('/').to_string(),
        options: options(),
    }
}

/// Answers every connection with a header declaring `content_length` bytes,
/// then holds the connection open without sending a body
///
/// Returns the base URL and a connection counter.
async fn serve_declared_length(content_length: u64) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connections = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&connections);

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let mut request = [0u8; 4096];
                let _ = stream.read(&mut request).await;
                let header = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/zip\r\nContent-Length: {}\r\n\r\n",
                    content_length
                );
                let _ = stream.write_all(header.as_bytes()).await;
                tokio::time::sleep(Duration::from_secs(30)).await;
            });
        }
    });

    (format!("http://{}", addr), connections)
}

#[tokio::test]
async fn test_declared_size_over_limit_is_rejected() {
    let (base, connections) = serve_declared_length(200_000_000).await;

    let dir = TempDir::new().unwrap();
    let start = Instant::now();
    let result = AttachmentDownloader::new()
        .unwrap()
        .download(DownloadTask {
            url: format!("{}/lecture.zip", base),
            output_dir: dir.path().to_path_buf(),
            filename: "lecture.zip".to_string(),
            options: options(),
        })
        .await;

    assert!(!result.success);
    assert!(result.local_path.is_none());
    let error = result.error.unwrap();
    assert!(error.contains("too large"), "{}", error);
    assert!(error.contains("200000000"), "{}", error);
    assert!(!dir.path().join("lecture.zip").exists());
    // Rejected from the header alone, without retries or waiting for a body
    assert_eq!(connections.load(Ordering::SeqCst), 1);
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_transient_failures_are_retried_with_backoff() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/syllabus.pdf"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/syllabus.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"syllabus".to_vec()))
        .with_priority(2)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let start = Instant::now();
    let result = AttachmentDownloader::new()
        .unwrap()
        .download(task(&server, "/syllabus.pdf", &dir))
        .await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.file_size_bytes, Some(8));
    // 100ms after the first failure, 200ms after the second
    assert!(start.elapsed() >= Duration::from_millis(300));
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_batch_honors_concurrency_limit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"x".to_vec())
                .set_delay(Duration::from_millis(200)),
        )
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let tasks: Vec<_> = (0..4)
        .map(|i| task(&server, &format!("/file-{}.txt", i), &dir))
        .collect();

    let start = Instant::now();
    let results = AttachmentDownloader::new()
        .unwrap()
        .download_all(tasks, 2)
        .await;

    // Four 200ms transfers, two at a time
    assert!(start.elapsed() >= Duration::from_millis(400));
    assert_eq!(results.len(), 4);
    assert!(results.values().all(|r| r.success));
    for i in 0..4 {
        assert!(dir.path().join(format!("file-{}.txt", i)).exists());
    }
}
