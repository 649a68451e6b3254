/// Run status definitions for tracking extraction attempts
///
/// This module defines every state a run can be in and the legal moves between them.
use std::fmt;

/// Represents the current state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunStatus {
    // ===== Active States =====
    /// Run is waiting for a supervisor to claim it
    Queued,

    /// A supervisor has claimed the run and owns its process
    Running,

    // ===== Terminal States =====
    /// Extraction exited cleanly and produced output
    Succeeded,

    /// Extraction could not start, exited non-zero, timed out, or produced nothing
    Failed,

    /// An operator cancelled the run
    Cancelled,
}

impl RunStatus {
    /// Returns true if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// Returns true if this is an active state (queued or running)
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Returns true if a run may move from this state to `next`
    ///
    /// Transitions are one-directional: queued -> running -> terminal, and
    /// queued -> cancelled. Nothing ever returns to queued.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        match (self, next) {
            (Self::Queued, Self::Running) => true,
            (Self::Queued, Self::Cancelled) => true,
            (Self::Running, Self::Succeeded | Self::Failed | Self::Cancelled) => true,
            _ => false,
        }
    }

    /// Returns the states from which `self` may be entered
    pub fn predecessors(&self) -> Vec<RunStatus> {
        Self::all_states()
            .into_iter()
            .filter(|from| from.can_transition_to(*self))
            .collect()
    }

    /// Converts the run status to a database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parses a run status from a database string representation
    ///
    /// Returns None if the string doesn't match any known status.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Returns all possible run statuses
    pub fn all_states() -> Vec<Self> {
        vec![
            Self::Queued,
            Self::Running,
            Self::Succeeded,
            Self::Failed,
            Self::Cancelled,
        ]
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
