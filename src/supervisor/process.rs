//! Extraction process lifecycle
//!
//! Spawning, output capture and termination of the child process. Timeouts
//! and cancellations both end a process through `terminate`: a graceful
//! signal, then a forceful kill once the grace window has passed.

use crate::extraction::ExtractionParams;
use crate::{Result, RunnerError};
use std::collections::VecDeque;
use std::fmt;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

/// Spawns the extraction program with the run's parameters in its environment
///
/// On Unix the child leads its own process group so that signals reach the
/// browser processes it starts.
pub(crate) fn spawn_extractor(
    program: &Path,
    args: &[String],
    params: &ExtractionParams,
) -> Result<Child> {
    let mut command = Command::new(program);
    command
        .args(args)
        .envs(params.to_env()?)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    command.process_group(0);

    command.spawn().map_err(|source| RunnerError::Spawn {
        command: program.display().to_string(),
        source,
    })
}

/// Bounded buffer of the most recent output lines
#[derive(Clone)]
pub(crate) struct OutputTail {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl OutputTail {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    fn push(&self, line: String) {
        if self.capacity == 0 {
            return;
        }
        let mut lines = self.lines.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// The retained lines, oldest first
    pub(crate) fn render(&self) -> String {
        let lines = self.lines.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        lines.iter().cloned().collect::<Vec<_>>().join("\n")
    }
}

/// Starts readers for the child's stdout and stderr
///
/// Every line is logged at debug level and kept in `tail`.
pub(crate) fn capture_output(child: &mut Child, tail: &OutputTail, run_id: &str) -> Vec<JoinHandle<()>> {
    let mut readers = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        readers.push(spawn_reader(stdout, tail.clone(), run_id.to_string()));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(spawn_reader(stderr, tail.clone(), run_id.to_string()));
    }
    readers
}

fn spawn_reader<R>(stream: R, tail: OutputTail, run_id: String) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    tracing::debug!("[run {}] {}", run_id, line);
                    tail.push(line);
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!("[run {}] output stream error: {}", run_id, e);
                    break;
                }
            }
        }
    })
}

/// Waits briefly for the output readers to reach end of stream
///
/// Readers still running afterwards (a grandchild may hold the pipe open)
/// are aborted.
pub(crate) async fn drain_output(readers: Vec<JoinHandle<()>>, within: Duration) {
    let aborts: Vec<_> = readers.iter().map(|r| r.abort_handle()).collect();
    if tokio::time::timeout(within, futures::future::join_all(readers)).await.is_err() {
        for abort in aborts {
            abort.abort();
        }
    }
}

/// Signals understood by `send_signal`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// SIGTERM
    Terminate,
    /// SIGKILL
    Kill,
}

impl Signal {
    fn name(&self) -> &'static str {
        match self {
            Self::Terminate => "TERM",
            Self::Kill => "KILL",
        }
    }
}

/// Sends a signal to a process and its process group
#[cfg(unix)]
pub async fn send_signal(pid: u32, signal: Signal) -> std::io::Result<()> {
    let status = Command::new("kill")
        .arg(format!("-{}", signal.name()))
        .arg("--")
        .arg(format!("-{}", pid))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await?;

    if status.success() {
        return Ok(());
    }

    // The group may already be gone; fall back to the process itself
    let status = Command::new("kill")
        .arg(format!("-{}", signal.name()))
        .arg(pid.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await?;

    if status.success() {
        Ok(())
    } else {
        Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("kill -{} {} failed with {}", signal.name(), pid, status),
        ))
    }
}

/// Sends a signal to a process tree
#[cfg(windows)]
pub async fn send_signal(pid: u32, signal: Signal) -> std::io::Result<()> {
    let mut command = Command::new("taskkill");
    command.args(["/PID", &pid.to_string(), "/T"]);
    if signal == Signal::Kill {
        command.arg("/F");
    }
    let status = command.stdout(Stdio::null()).stderr(Stdio::null()).status().await?;
    if status.success() {
        Ok(())
    } else {
        Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("taskkill for {} failed with {}", pid, status),
        ))
    }
}

/// How a terminated process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Exited within the grace window after the graceful signal
    Graceful,
    /// Killed after the grace window elapsed
    Forced,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Graceful => f.write_str("graceful"),
            Self::Forced => f.write_str("forced"),
        }
    }
}

/// Ends a running child: graceful signal, grace window, then forceful kill
pub(crate) async fn terminate(child: &mut Child, pid: u32, grace: Duration) -> Termination {
    if let Err(e) = send_signal(pid, Signal::Terminate).await {
        tracing::warn!("Failed to send graceful termination signal to {}: {}", pid, e);
    }

    if let Ok(Ok(status)) = tokio::time::timeout(grace, child.wait()).await {
        tracing::debug!("Process {} exited after graceful signal: {}", pid, status);
        return Termination::Graceful;
    }

    tracing::warn!("Process {} still alive after {:?}, killing it", pid, grace);
    force_kill(child, pid).await;
    Termination::Forced
}

async fn force_kill(child: &mut Child, pid: u32) {
    if let Err(e) = send_signal(pid, Signal::Kill).await {
        tracing::debug!("Group kill of {} failed: {}", pid, e);
    }
    if let Err(e) = child.start_kill() {
        tracing::debug!("Direct kill of {} failed: {}", pid, e);
    }
    if let Err(e) = child.wait().await {
        tracing::warn!("Failed to reap process {}: {}", pid, e);
    }
}

/// Human-readable description of an exit status
pub(crate) fn describe_exit(status: &ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("exit code {}", code);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("signal {}", signal);
        }
    }

    status.to_string()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    fn shell(script: &str) -> Child {
        let mut command = Command::new("sh");
        command
            .args(["-c", script])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .process_group(0);
        command.spawn().unwrap()
    }

    #[test]
    fn test_output_tail_is_bounded() {
        let tail = OutputTail::new(3);
        for i in 1..=5 {
            tail.push(format!("line {}", i));
        }
        assert_eq!(tail.render(), "line 3\nline 4\nline 5");
    }

    #[test]
    fn test_zero_capacity_tail_keeps_nothing() {
        let tail = OutputTail::new(0);
        tail.push("ignored".to_string());
        assert_eq!(tail.render(), "");
    }

    #[tokio::test]
    async fn test_capture_output_collects_both_streams() {
        let mut child = shell("echo out; echo err 1>&2");
        let tail = OutputTail::new(10);
        let readers = capture_output(&mut child, &tail, "run-1");

        assert!(child.wait().await.unwrap().success());
        drain_output(readers, Duration::from_secs(1)).await;

        let rendered = tail.render();
        assert!(rendered.contains("out"));
        assert!(rendered.contains("err"));
    }

    #[tokio::test]
    async fn test_graceful_termination() {
        let mut child = shell("exec sleep 30");
        let pid = child.id().unwrap();

        let outcome = terminate(&mut child, pid, Duration::from_secs(5)).await;

        assert_eq!(outcome, Termination::Graceful);
    }

    #[tokio::test]
    async fn test_escalates_after_grace_window() {
        let mut child = shell("trap '' TERM; while true; do sleep 0.05; done");
        let pid = child.id().unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let grace = Duration::from_millis(200);
        let start = Instant::now();
        let outcome = terminate(&mut child, pid, grace).await;

        assert_eq!(outcome, Termination::Forced);
        assert!(start.elapsed() >= grace);
        assert!(child.try_wait().unwrap().is_some());
    }

    #[test]
    fn test_termination_display() {
        assert_eq!(Termination::Graceful.to_string(), "graceful");
        assert_eq!(Termination::Forced.to_string(), "forced");
    }

    #[tokio::test]
    async fn test_describe_exit() {
        let status = shell("exit 3").wait().await.unwrap();
        assert_eq!(describe_exit(&status), "exit code 3");
    }
}
