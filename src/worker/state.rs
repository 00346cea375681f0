//! Task state machine.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a registered task.
///
/// `Standby → InProgress → Completed`, after which the scheduler removes the
/// record. There is no failed state: a job reports its own failure through the
/// status store and still completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Admitted, waiting for a worker.
    Standby,
    /// A worker is running the task's job.
    InProgress,
    /// The job returned; awaiting removal on the next scan.
    Completed,
}

impl TaskStatus {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: TaskStatus) -> bool {
        matches!(
            (self, target),
            (Self::Standby, Self::InProgress) | (Self::InProgress, Self::Completed)
        )
    }

    /// Whether the scheduler may remove a record in this state.
    pub fn is_reapable(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Standby => "standby",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        };
        write!(f, "{s}")
    }
}
