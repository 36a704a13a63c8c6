//! Core domain errors.

use thiserror::Error;

use crate::{TaskId, TaskState};

/// Core domain errors for coflow.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Task not found in its scope.
    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    /// Invalid state transition.
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: TaskState, to: TaskState },

    /// Unrecognised run mode name.
    #[error("Unknown run mode: {0}")]
    UnknownRunMode(String),
}

/// A producer's own failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Producer failed: {reason}")]
pub struct ProducerError {
    pub reason: String,
}

impl ProducerError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// The task (or its scope) was cancelled before completion.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Task {task_id} was cancelled")]
pub struct CancelledError {
    pub task_id: TaskId,
}

impl CancelledError {
    pub fn new(task_id: TaskId) -> Self {
        Self { task_id }
    }
}

/// Outcome of a single task that did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error(transparent)]
    Producer(#[from] ProducerError),

    #[error(transparent)]
    Cancelled(#[from] CancelledError),
}

impl TaskError {
    /// Terminal state a task ends in when it fails with this error.
    pub fn terminal_state(&self) -> TaskState {
        match self {
            Self::Producer(_) => TaskState::Failed,
            Self::Cancelled(_) => TaskState::Cancelled,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

/// The first constituent failure surfaced while combining tasks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Combination failed at task #{index}: {source}")]
pub struct CombineError {
    /// Position of the failing task in the combination (0 = first producer).
    pub index: usize,
    #[source]
    pub source: TaskError,
}

impl CombineError {
    pub fn new(index: usize, source: TaskError) -> Self {
        Self { index, source }
    }

    /// The producer failure, if that is what surfaced.
    pub fn producer_error(&self) -> Option<&ProducerError> {
        match &self.source {
            TaskError::Producer(e) => Some(e),
            TaskError::Cancelled(_) => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.source.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combine_error_display() {
        let err = CombineError::new(0, ProducerError::new("boom").into());
        assert_eq!(
            err.to_string(),
            "Combination failed at task #0: Producer failed: boom"
        );
        assert_eq!(err.producer_error(), Some(&ProducerError::new("boom")));
        assert!(!err.is_cancelled());
    }

    #[test]
    fn test_cancelled_terminal_state() {
        let err: TaskError = CancelledError::new(TaskId::new("t-1")).into();
        assert_eq!(err.terminal_state(), TaskState::Cancelled);
        assert_eq!(err.to_string(), "Task t-1 was cancelled");

        let combined = CombineError::new(1, err);
        assert!(combined.is_cancelled());
        assert!(combined.producer_error().is_none());
    }
}
