//! Run supervision
//!
//! This module turns queued runs into supervised extraction processes,
//! including:
//! - The polling supervisor and its exit race (exit vs timeout vs cancel)
//! - Process spawning, output capture and two-stage termination
//! - Result directory discovery
//! - Cancellation handles

mod artifacts;
mod cancel;
mod process;
mod runner;

pub use artifacts::{discover_artifacts, Artifacts};
pub use cancel::{CancelHandle, CancelOutcome};
pub use process::{send_signal, Signal, Termination};
pub use runner::{ProcessedRun, Supervisor};
