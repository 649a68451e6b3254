//! End-to-end supervisor runs against a file-backed database
//!
//! Each test stands in a short `sh` script for the extraction process.

use crawl_runner::config::SupervisorConfig;
use crawl_runner::storage::{CourseRecord, CourseStore, RunQueue, RunRecord, SqliteStorage};
use crawl_runner::{RunStatus, Supervisor};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::TempDir;

struct Harness {
    _root: TempDir,
    db_path: PathBuf,
    outputs: PathBuf,
}

impl Harness {
    fn new() -> Self {
        let root = TempDir::new().unwrap();
        let db_path = root.path().join("runs.db");
        let outputs = root.path().join("outputs");

        let mut storage = SqliteStorage::new(&db_path).unwrap();
        storage
            .upsert_course(&CourseRecord::new(
                "course-1",
                "https://school.example.com",
                "alice",
                "secret",
                vec!["https://school.example.com/courses/1".to_string()],
            ))
            .unwrap();

        Self {
            _root: root,
            db_path,
            outputs,
        }
    }

    fn config(&self, script: &str) -> SupervisorConfig {
        SupervisorConfig {
            outputs_root: self.outputs.clone(),
            extractor_command: Some(PathBuf::from("sh")),
            extractor_args: vec!["-c".to_string(), script.to_string()],
            run_timeout_ms: 10_000,
            grace_window_ms: 200,
            cancel_check_interval_ms: 20,
            ..Default::default()
        }
    }

    fn storage(&self) -> SqliteStorage {
        SqliteStorage::new(&self.db_path).unwrap()
    }

    fn supervisor(&self, config: SupervisorConfig) -> Supervisor<SqliteStorage> {
        Supervisor::new(config, self.storage())
    }

    fn enqueue(&self, course_id: &str) -> String {
        self.storage().enqueue_run(course_id).unwrap()
    }

    fn run(&self, run_id: &str) -> RunRecord {
        self.storage().get_run(run_id).unwrap()
    }
}

async fn wait_until_running(harness: &Harness, run_id: &str) {
    loop {
        if harness.run(run_id).status == RunStatus::Running {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_successful_run_records_report_metrics() {
    let harness = Harness::new();
    let script = r#"
d="$CRAWLER_OUTPUT_DIR/2024-01-01T00-00-00-000Z"
mkdir -p "$d"
echo '{"metrics":{"courses":1}}' > "$d/run-report.json"
"#;
    let supervisor = harness.supervisor(harness.config(script));
    let run_id = harness.enqueue("course-1");

    let processed = supervisor.poll_and_execute_next().await.unwrap().unwrap();
    assert_eq!(processed.run_id, run_id);
    assert_eq!(processed.status, RunStatus::Succeeded);

    let record = harness.run(&run_id);
    assert_eq!(record.status, RunStatus::Succeeded);
    assert_eq!(record.metrics, Some(serde_json::json!({"courses": 1})));
    assert!(record
        .outputs_dir
        .unwrap()
        .ends_with("2024-01-01T00-00-00-000Z"));
    assert!(record.started_at.is_some());
    assert!(record.finished_at.is_some());
    assert!(supervisor.registry().is_empty());
}

#[tokio::test]
async fn test_each_run_gets_its_own_output_directory() {
    let harness = Harness::new();
    let script = r#"mkdir -p "$CRAWLER_OUTPUT_DIR/2024-01-01T00-00-00-000Z""#;
    let supervisor = harness.supervisor(harness.config(script));
    let first = harness.enqueue("course-1");
    let second = harness.enqueue("course-1");

    supervisor.poll_and_execute_next().await.unwrap().unwrap();
    supervisor.poll_and_execute_next().await.unwrap().unwrap();
    assert_eq!(supervisor.poll_and_execute_next().await.unwrap(), None);

    assert!(harness.outputs.join(&first).is_dir());
    assert!(harness.outputs.join(&second).is_dir());
    assert_eq!(harness.run(&first).status, RunStatus::Succeeded);
    assert_eq!(harness.run(&second).status, RunStatus::Succeeded);
}

#[tokio::test]
async fn test_timeout_fails_run_after_grace_window() {
    let harness = Harness::new();
    let mut config = harness.config("exec sleep 30");
    config.run_timeout_ms = 200;
    config.grace_window_ms = 50;
    let supervisor = harness.supervisor(config);
    let run_id = harness.enqueue("course-1");

    let start = Instant::now();
    let processed = supervisor.poll_and_execute_next().await.unwrap().unwrap();

    assert_eq!(processed.status, RunStatus::Failed);
    assert!(start.elapsed() >= Duration::from_millis(200));
    assert!(start.elapsed() < Duration::from_secs(10));

    let error = harness.run(&run_id).error.unwrap();
    assert!(error.contains("timed out after 200ms"), "{}", error);
    assert!(supervisor.registry().is_empty());
}

#[tokio::test]
async fn test_timeout_escalates_when_process_ignores_graceful_signal() {
    let harness = Harness::new();
    let mut config = harness.config("trap '' TERM; echo started; while true; do sleep 0.05; done");
    config.run_timeout_ms = 200;
    config.grace_window_ms = 50;
    let supervisor = harness.supervisor(config);
    let run_id = harness.enqueue("course-1");

    let start = Instant::now();
    let processed = supervisor.poll_and_execute_next().await.unwrap().unwrap();

    assert_eq!(processed.status, RunStatus::Failed);
    assert!(start.elapsed() >= Duration::from_millis(250));

    let error = harness.run(&run_id).error.unwrap();
    assert!(error.contains("forced termination"), "{}", error);
    assert!(error.contains("started"), "{}", error);
}

#[tokio::test]
async fn test_non_zero_exit_reports_output_tail() {
    let harness = Harness::new();
    let script = "echo 'logging in'; echo 'login form never appeared' >&2; exit 3";
    let supervisor = harness.supervisor(harness.config(script));
    let run_id = harness.enqueue("course-1");

    let processed = supervisor.poll_and_execute_next().await.unwrap().unwrap();
    assert_eq!(processed.status, RunStatus::Failed);

    let error = harness.run(&run_id).error.unwrap();
    assert!(error.contains("exit code 3"), "{}", error);
    assert!(error.contains("Last output:"), "{}", error);
    assert!(error.contains("login form never appeared"), "{}", error);
}

#[tokio::test]
async fn test_clean_exit_without_output_fails() {
    let harness = Harness::new();
    let supervisor = harness.supervisor(harness.config("exit 0"));
    let run_id = harness.enqueue("course-1");

    let processed = supervisor.poll_and_execute_next().await.unwrap().unwrap();
    assert_eq!(processed.status, RunStatus::Failed);

    let error = harness.run(&run_id).error.unwrap();
    assert!(error.contains("no output generated"), "{}", error);
}

#[tokio::test]
async fn test_missing_course_fails_run() {
    let harness = Harness::new();
    let supervisor = harness.supervisor(harness.config("exit 0"));
    let run_id = harness.enqueue("unknown-course");

    let processed = supervisor.poll_and_execute_next().await.unwrap().unwrap();
    assert_eq!(processed.status, RunStatus::Failed);
    assert_eq!(
        harness.run(&run_id).error.as_deref(),
        Some("Course unknown-course not found")
    );
}

#[tokio::test]
async fn test_unstartable_extractor_fails_run() {
    let harness = Harness::new();
    let mut config = harness.config("exit 0");
    config.extractor_command = Some(PathBuf::from("/nonexistent/extractor"));
    let supervisor = harness.supervisor(config);
    let run_id = harness.enqueue("course-1");

    let processed = supervisor.poll_and_execute_next().await.unwrap().unwrap();
    assert_eq!(processed.status, RunStatus::Failed);

    let error = harness.run(&run_id).error.unwrap();
    assert!(error.contains("/nonexistent/extractor"), "{}", error);
    assert!(supervisor.registry().is_empty());
}

#[tokio::test]
async fn test_cancel_handle_terminates_running_process() {
    let harness = Harness::new();
    let supervisor = harness.supervisor(harness.config("exec sleep 30"));
    let run_id = harness.enqueue("course-1");
    let handle = supervisor.cancel_handle();

    let canceller = async {
        while !supervisor.registry().contains(&run_id) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.cancel(&run_id).unwrap()
    };

    let start = Instant::now();
    let (processed, _) = tokio::join!(supervisor.poll_and_execute_next(), canceller);

    assert_eq!(processed.unwrap().unwrap().status, RunStatus::Cancelled);
    assert!(start.elapsed() < Duration::from_secs(10));
    assert_eq!(harness.run(&run_id).status, RunStatus::Cancelled);
    assert!(supervisor.registry().is_empty());
}

#[tokio::test]
async fn test_cancel_requested_from_another_connection() {
    let harness = Harness::new();
    let supervisor = harness.supervisor(harness.config("exec sleep 30"));
    let run_id = harness.enqueue("course-1");

    let requester = async {
        wait_until_running(&harness, &run_id).await;
        // A separate connection, as the CLI `cancel` command would use
        harness.storage().request_cancel(&run_id).unwrap()
    };

    let (processed, requested) = tokio::join!(supervisor.poll_and_execute_next(), requester);

    assert_eq!(requested, RunStatus::Running);
    assert_eq!(processed.unwrap().unwrap().status, RunStatus::Cancelled);
    assert_eq!(harness.run(&run_id).status, RunStatus::Cancelled);
}

#[tokio::test]
async fn test_cancelled_queued_run_is_never_claimed() {
    let harness = Harness::new();
    let supervisor = harness.supervisor(harness.config("exit 0"));
    let run_id = harness.enqueue("course-1");

    assert_eq!(
        harness.storage().request_cancel(&run_id).unwrap(),
        RunStatus::Cancelled
    );
    assert_eq!(supervisor.poll_and_execute_next().await.unwrap(), None);
    assert!(!harness.outputs.join(&run_id).exists());
}

#[tokio::test]
async fn test_two_supervisors_never_share_a_run() {
    let harness = Harness::new();
    let script = r#"sleep 0.2; mkdir -p "$CRAWLER_OUTPUT_DIR/2024-01-01T00-00-00-000Z""#;
    let first = harness.supervisor(harness.config(script));
    let second = harness.supervisor(harness.config(script));
    let run_id = harness.enqueue("course-1");

    let (a, b) = tokio::join!(first.poll_and_execute_next(), second.poll_and_execute_next());
    let processed: Vec<_> = [a.unwrap(), b.unwrap()].into_iter().flatten().collect();

    assert_eq!(processed.len(), 1);
    assert_eq!(processed[0].run_id, run_id);
    assert_eq!(harness.run(&run_id).status, RunStatus::Succeeded);
}

#[tokio::test]
async fn test_extract_command_failure_is_reported_by_supervisor() {
    let harness = Harness::new();
    let mut config = harness.config("");
    config.extractor_command = Some(PathBuf::from(env!("CARGO_BIN_EXE_crawl-runner")));
    config.extractor_args = vec!["extract".to_string()];
    config.selectors_path = Path::new("/nonexistent/site-profile.toml").to_path_buf();
    let supervisor = harness.supervisor(config);
    let run_id = harness.enqueue("course-1");

    let processed = supervisor.poll_and_execute_next().await.unwrap().unwrap();
    assert_eq!(processed.status, RunStatus::Failed);

    let error = harness.run(&run_id).error.unwrap();
    assert!(error.contains("Extraction process failed"), "{}", error);
    assert!(error.contains("Last output:"), "{}", error);
}
