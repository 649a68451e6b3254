//! State module for tracking run progress
//!
//! This module provides the run lifecycle state machine and the in-memory
//! registry of live extraction processes.
//!
//! # Components
//!
//! - `RunStatus`: Tracks the status of a run (queued, running, succeeded, failed, cancelled)
//! - `ActiveRunRegistry`: Maps run ids to their live process for termination

mod registry;
mod run_status;

// Re-export main types
pub use registry::{ActiveRun, ActiveRunRegistry};
pub use run_status::RunStatus;
