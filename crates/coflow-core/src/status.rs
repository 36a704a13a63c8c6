//! Status enums for Tasks and Scopes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a Task.
///
/// Transitions are monotonic: `Pending -> Running -> {Completed | Failed | Cancelled}`,
/// plus `Pending -> Cancelled` for a task cancelled before it was first polled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Task registered with its scope but not yet polled.
    #[default]
    Pending,
    /// Task picked up by a worker.
    Running,
    /// Producer returned a value.
    Completed,
    /// Producer returned an error (or panicked).
    Failed,
    /// Task observed cancellation at a suspension point.
    Cancelled,
}

impl TaskState {
    /// Returns true if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns true if the task is still active (not terminal).
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Returns true if moving from `self` to `next` respects the lifecycle.
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        match (self, next) {
            (Self::Pending, Self::Running) => true,
            (Self::Pending, Self::Cancelled) => true,
            (Self::Running, Self::Completed | Self::Failed | Self::Cancelled) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a Scope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScopeStatus {
    /// Tasks of the scope run normally.
    #[default]
    Active,
    /// Scope (or one of its ancestors) was cancelled; tasks spawned into it
    /// end Cancelled without starting.
    Cancelled,
}
