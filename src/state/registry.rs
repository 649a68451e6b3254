use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// A supervised extraction process that is currently alive
#[derive(Debug, Clone)]
pub struct ActiveRun {
    /// When the process was spawned
    pub started_at: Instant,

    /// OS process id (also the process group id on Unix)
    pub pid: u32,

    /// Wakes the owning supervisor's exit race to terminate the process
    terminate: Arc<Notify>,
}

impl ActiveRun {
    pub(crate) fn new(pid: u32, terminate: Arc<Notify>) -> Self {
        Self {
            started_at: Instant::now(),
            pid,
            terminate,
        }
    }

    /// Time since the process was spawned
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Tracks the live extraction process of each running run
///
/// A registry belongs to exactly one supervisor, which is the only writer.
/// Clones share the same map, so cancellation handles can look up entries and
/// ask the owning supervisor to terminate a process; they never insert or
/// remove entries themselves.
#[derive(Debug, Clone, Default)]
pub struct ActiveRunRegistry {
    inner: Arc<RwLock<HashMap<String, ActiveRun>>>,
}

impl ActiveRunRegistry {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a live process for a run
    ///
    /// Returns false (and leaves the registry untouched) if the run already has
    /// an entry.
    pub(crate) fn register(&self, run_id: &str, entry: ActiveRun) -> bool {
        let mut map = self.write();
        if map.contains_key(run_id) {
            return false;
        }
        map.insert(run_id.to_string(), entry);
        true
    }

    /// Removes the entry for a run, returning it if present
    pub(crate) fn remove(&self, run_id: &str) -> Option<ActiveRun> {
        self.write().remove(run_id)
    }

    /// Returns a snapshot of the entry for a run
    pub fn get(&self, run_id: &str) -> Option<ActiveRun> {
        self.read().get(run_id).cloned()
    }

    /// Returns true if the run has a live process
    pub fn contains(&self, run_id: &str) -> bool {
        self.read().contains_key(run_id)
    }

    /// Number of live processes
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Asks the owning supervisor to terminate the run's process
    ///
    /// Returns the pid that will be signalled, or None if the run has no live
    /// process.
    pub fn request_termination(&self, run_id: &str) -> Option<u32> {
        let map = self.read();
        let entry = map.get(run_id)?;
        entry.terminate.notify_one();
        Some(entry.pid)
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, ActiveRun>> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, ActiveRun>> {
        self.inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
