use crate::state::{ActiveRunRegistry, RunStatus};
use crate::storage::{RunQueue, StorageError};
use crate::{Result, RunnerError};
use std::sync::{Arc, Mutex};

/// What a cancellation did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The run had no live process and is now cancelled
    Cancelled,

    /// The owning supervisor was told to terminate the process; the run is
    /// now cancelled
    Terminating { pid: u32 },

    /// The run was already cancelled
    AlreadyCancelled,
}

/// Cancels runs owned by a supervisor in this process
///
/// Reads the supervisor's registry to find live processes. Termination
/// itself is carried out by the supervisor, through the same routine used
/// for timeouts.
pub struct CancelHandle<S> {
    storage: Arc<Mutex<S>>,
    registry: ActiveRunRegistry,
}

impl<S> Clone for CancelHandle<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            registry: self.registry.clone(),
        }
    }
}

impl<S: RunQueue> CancelHandle<S> {
    pub(crate) fn new(storage: Arc<Mutex<S>>, registry: ActiveRunRegistry) -> Self {
        Self { storage, registry }
    }

    /// Cancels a queued or running run
    ///
    /// # Returns
    ///
    /// * `Ok(CancelOutcome)` - The run is cancelled
    /// * `Err(RunnerError)` - The run does not exist or already finished
    pub fn cancel(&self, run_id: &str) -> Result<CancelOutcome> {
        let terminating = self.registry.request_termination(run_id);
        if let Some(pid) = terminating {
            tracing::info!("Requested termination of run {} (pid {})", run_id, pid);
        }

        let mut storage = self
            .storage
            .lock()
            .map_err(|_| RunnerError::Storage("storage lock poisoned".to_string()))?;

        match storage.mark_cancelled(run_id) {
            Ok(()) => {
                tracing::info!("Run {} cancelled", run_id);
                Ok(match terminating {
                    Some(pid) => CancelOutcome::Terminating { pid },
                    None => CancelOutcome::Cancelled,
                })
            }
            Err(StorageError::InvalidTransition {
                from: RunStatus::Cancelled,
                ..
            }) => Ok(CancelOutcome::AlreadyCancelled),
            Err(e) => Err(e.into()),
        }
    }
}
