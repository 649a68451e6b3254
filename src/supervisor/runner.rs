//! Run supervisor implementation
//!
//! The supervisor claims queued runs one at a time and executes each as an
//! isolated, time-boxed extraction process:
//! 1. Claim the next queued run (atomic at the storage layer)
//! 2. Resolve its course; a missing course fails the run without a process
//! 3. Create `<outputs-root>/<run-id>` and spawn the extraction program with
//!    the run's parameters in its environment
//! 4. Race process exit against the run timeout and cancellation
//! 5. On a clean exit, discover the result directory and its metrics
//! 6. Record the final status

use super::artifacts::discover_artifacts;
use super::cancel::CancelHandle;
use super::process::{
    capture_output, describe_exit, drain_output, spawn_extractor, terminate, OutputTail,
    Termination,
};
use crate::config::SupervisorConfig;
use crate::extraction::ExtractionParams;
use crate::state::{ActiveRun, ActiveRunRegistry, RunStatus};
use crate::storage::{CourseStore, RunQueue, RunRecord, StorageError};
use crate::{Result, RunnerError};
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;

/// How long output readers may take to finish after the process ended
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// A run the supervisor finished processing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedRun {
    pub run_id: String,
    pub status: RunStatus,
}

/// Final result of executing one run
#[derive(Debug)]
enum RunOutcome {
    Succeeded {
        result_dir: PathBuf,
        metrics: Option<serde_json::Value>,
    },
    Failed(String),
    Cancelled,
}

impl RunOutcome {
    fn status(&self) -> RunStatus {
        match self {
            Self::Succeeded { .. } => RunStatus::Succeeded,
            Self::Failed(_) => RunStatus::Failed,
            Self::Cancelled => RunStatus::Cancelled,
        }
    }
}

/// Which side of the exit race won
enum ExitRace {
    Exited(ExitStatus),
    TimedOut(Termination),
    Cancelled(Termination),
    WaitFailed(std::io::Error),
}

/// Executes queued runs as supervised extraction processes
pub struct Supervisor<S> {
    config: SupervisorConfig,
    config_path: Option<PathBuf>,
    storage: Arc<Mutex<S>>,
    registry: ActiveRunRegistry,
}

impl<S: RunQueue + CourseStore> Supervisor<S> {
    /// Creates a supervisor owning `storage`
    pub fn new(config: SupervisorConfig, storage: S) -> Self {
        Self::with_shared_storage(config, Arc::new(Mutex::new(storage)))
    }

    /// Creates a supervisor over storage shared with other components
    pub fn with_shared_storage(config: SupervisorConfig, storage: Arc<Mutex<S>>) -> Self {
        Self {
            config,
            config_path: None,
            storage,
            registry: ActiveRunRegistry::new(),
        }
    }

    /// Config file handed to extraction processes so they load the same settings
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Live processes of this supervisor
    pub fn registry(&self) -> &ActiveRunRegistry {
        &self.registry
    }

    pub fn storage(&self) -> Arc<Mutex<S>> {
        Arc::clone(&self.storage)
    }

    /// A handle that cancels runs owned by this supervisor
    pub fn cancel_handle(&self) -> CancelHandle<S> {
        CancelHandle::new(Arc::clone(&self.storage), self.registry.clone())
    }

    /// Polls the queue forever
    ///
    /// Sleeps the poll interval only when the queue is empty or a poll cycle
    /// failed; a processed run is followed immediately by the next poll.
    pub async fn run(&self) {
        tracing::info!(
            "Supervisor started (poll interval {:?}, run timeout {:?}, grace window {:?})",
            self.poll_interval(),
            self.run_timeout(),
            self.grace_window()
        );

        loop {
            match self.poll_and_execute_next().await {
                Ok(Some(processed)) => {
                    tracing::info!("Run {} finished as {}", processed.run_id, processed.status);
                    continue;
                }
                Ok(None) => tracing::debug!("No queued runs"),
                Err(e) => tracing::error!("Poll cycle failed: {}", e),
            }
            tokio::time::sleep(self.poll_interval()).await;
        }
    }

    /// Claims and executes at most one queued run
    ///
    /// # Returns
    ///
    /// * `Ok(Some(ProcessedRun))` - A run was claimed and reached a final status
    /// * `Ok(None)` - The queue was empty
    /// * `Err(RunnerError)` - Claiming or recording failed
    pub async fn poll_and_execute_next(&self) -> Result<Option<ProcessedRun>> {
        let claimed = self.lock_storage()?.claim_next_run()?;
        let Some(run) = claimed else {
            return Ok(None);
        };

        tracing::info!("Claimed run {} for course {}", run.id, run.course_id);

        let outcome = match self.execute(&run).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("Run {} could not be executed: {}", run.id, e);
                RunOutcome::Failed(e.to_string())
            }
        };

        let status = self.record_outcome(&run.id, outcome)?;
        Ok(Some(ProcessedRun {
            run_id: run.id,
            status,
        }))
    }

    async fn execute(&self, run: &RunRecord) -> Result<RunOutcome> {
        let course = self.lock_storage()?.get_course(&run.course_id)?;
        let Some(course) = course else {
            return Ok(RunOutcome::Failed(format!(
                "Course {} not found",
                run.course_id
            )));
        };

        let run_dir = self.config.outputs_root.join(&run.id);
        tokio::fs::create_dir_all(&run_dir).await?;
        self.lock_storage()?
            .set_outputs_dir(&run.id, &run_dir.to_string_lossy())?;

        if self.cancellation_pending(&run.id) {
            tracing::info!("Run {} was cancelled before its process started", run.id);
            return Ok(RunOutcome::Cancelled);
        }

        let params = ExtractionParams {
            run_id: run.id.clone(),
            base_url: course.base_url,
            username: course.username,
            password: course.password,
            output_dir: run_dir.clone(),
            target_urls: course.target_urls,
            selectors_path: self.config.selectors_path.clone(),
            config_path: self.config_path.clone(),
            asset_manifest: course.asset_manifest.map(PathBuf::from),
        };

        let (program, args) = self.extractor_command()?;
        let mut child = spawn_extractor(&program, &args, &params)?;
        let Some(pid) = child.id() else {
            return Ok(RunOutcome::Failed(
                "Extraction process exited before it could be registered".to_string(),
            ));
        };

        let stop = Arc::new(Notify::new());
        if !self.registry.register(&run.id, ActiveRun::new(pid, Arc::clone(&stop))) {
            if let Err(e) = child.start_kill() {
                tracing::warn!("Failed to kill duplicate process {}: {}", pid, e);
            }
            return Err(RunnerError::AlreadyActive(run.id.clone()));
        }
        tracing::info!("Started extraction process {} for run {}", pid, run.id);

        let tail = OutputTail::new(self.config.output_tail_lines);
        let readers = capture_output(&mut child, &tail, &run.id);

        let race = self.race_exit(&run.id, &mut child, pid, &stop).await;
        if let Some(entry) = self.registry.remove(&run.id) {
            tracing::info!(
                "Extraction process {} for run {} ended after {:?}",
                entry.pid,
                run.id,
                entry.elapsed()
            );
        }
        drain_output(readers, OUTPUT_DRAIN_TIMEOUT).await;

        let outcome = match race {
            ExitRace::Exited(status) if status.success() => self.collect_artifacts(&run_dir).await,
            ExitRace::Exited(status) => RunOutcome::Failed(format!(
                "Extraction process failed with {}{}",
                describe_exit(&status),
                render_tail(&tail)
            )),
            ExitRace::TimedOut(termination) => RunOutcome::Failed(format!(
                "Extraction process timed out after {}ms ({} termination){}",
                self.config.run_timeout_ms,
                termination,
                render_tail(&tail)
            )),
            ExitRace::Cancelled(termination) => {
                tracing::info!("Run {} stopped on cancellation ({} termination)", run.id, termination);
                RunOutcome::Cancelled
            }
            ExitRace::WaitFailed(e) => {
                RunOutcome::Failed(format!("Lost track of extraction process: {}", e))
            }
        };

        Ok(outcome)
    }

    /// Races process exit against the run timeout and cancellation
    ///
    /// Timeout and cancellation both end the process through `terminate`.
    async fn race_exit(&self, run_id: &str, child: &mut Child, pid: u32, stop: &Notify) -> ExitRace {
        let deadline = tokio::time::sleep(self.run_timeout());
        tokio::pin!(deadline);

        let mut cancel_check = tokio::time::interval(self.cancel_check_interval());
        cancel_check.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cancel_seen = false;

        loop {
            tokio::select! {
                status = child.wait() => {
                    return match status {
                        Ok(status) => ExitRace::Exited(status),
                        Err(e) => ExitRace::WaitFailed(e),
                    };
                }
                _ = &mut deadline => {
                    tracing::warn!("Run {} exceeded its {:?} budget", run_id, self.run_timeout());
                    return ExitRace::TimedOut(terminate(child, pid, self.grace_window()).await);
                }
                _ = stop.notified() => {
                    tracing::info!("Terminating run {} on cancellation", run_id);
                    return ExitRace::Cancelled(terminate(child, pid, self.grace_window()).await);
                }
                _ = cancel_check.tick(), if !cancel_seen => {
                    if self.cancellation_pending(run_id) {
                        cancel_seen = true;
                        if let Err(e) = self.cancel_handle().cancel(run_id) {
                            tracing::warn!("Failed to record cancellation of run {}: {}", run_id, e);
                            stop.notify_one();
                        }
                    }
                }
            }
        }
    }

    /// Checks the stored record for a cancellation made outside this process
    fn cancellation_pending(&self, run_id: &str) -> bool {
        let storage = match self.lock_storage() {
            Ok(storage) => storage,
            Err(e) => {
                tracing::warn!("Cancellation check for run {} failed: {}", run_id, e);
                return false;
            }
        };

        match storage.is_cancel_requested(run_id) {
            Ok(requested) => requested,
            Err(e) => {
                tracing::warn!("Cancellation check for run {} failed: {}", run_id, e);
                false
            }
        }
    }

    async fn collect_artifacts(&self, run_dir: &Path) -> RunOutcome {
        match discover_artifacts(run_dir).await {
            Ok(Some(artifacts)) => RunOutcome::Succeeded {
                result_dir: artifacts.result_dir,
                metrics: artifacts.metrics,
            },
            Ok(None) => RunOutcome::Failed(format!(
                "Extraction process exited cleanly but no output generated in {}",
                run_dir.display()
            )),
            Err(e) => RunOutcome::Failed(format!(
                "Could not read output directory {}: {}",
                run_dir.display(),
                e
            )),
        }
    }

    /// Stores the final status of a run
    ///
    /// A run that already reached a final status (e.g. cancelled while its
    /// process was exiting) keeps it.
    fn record_outcome(&self, run_id: &str, outcome: RunOutcome) -> Result<RunStatus> {
        let mut storage = self.lock_storage()?;
        let recorded = match &outcome {
            RunOutcome::Succeeded {
                result_dir,
                metrics,
            } => storage.mark_succeeded(run_id, &result_dir.to_string_lossy(), metrics.as_ref()),
            RunOutcome::Failed(error) => {
                tracing::warn!("Run {} failed: {}", run_id, error);
                storage.mark_failed(run_id, error)
            }
            RunOutcome::Cancelled => storage.mark_cancelled(run_id),
        };

        match recorded {
            Ok(()) => Ok(outcome.status()),
            Err(StorageError::InvalidTransition { from, .. }) if from.is_terminal() => {
                tracing::info!(
                    "Run {} is already {}; not recording {}",
                    run_id,
                    from,
                    outcome.status()
                );
                Ok(from)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn extractor_command(&self) -> Result<(PathBuf, Vec<String>)> {
        match &self.config.extractor_command {
            Some(program) => Ok((program.clone(), self.config.extractor_args.clone())),
            None => {
                let mut args = vec!["extract".to_string()];
                args.extend(self.config.extractor_args.iter().cloned());
                Ok((std::env::current_exe()?, args))
            }
        }
    }

    fn lock_storage(&self) -> Result<MutexGuard<'_, S>> {
        self.storage
            .lock()
            .map_err(|_| RunnerError::Storage("storage lock poisoned".to_string()))
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.config.poll_interval_ms)
    }

    fn run_timeout(&self) -> Duration {
        Duration::from_millis(self.config.run_timeout_ms)
    }

    fn grace_window(&self) -> Duration {
        Duration::from_millis(self.config.grace_window_ms)
    }

    fn cancel_check_interval(&self) -> Duration {
        Duration::from_millis(self.config.cancel_check_interval_ms)
    }
}

fn render_tail(tail: &OutputTail) -> String {
    let rendered = tail.render();
    if rendered.is_empty() {
        String::new()
    } else {
        format!("\nLast output:\n{}", rendered)
    }
}
