//! Task bookkeeping records.

use crate::{CoreError, ScopeId, TaskId, TaskState, WorkerIdentity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bookkeeping row for one task, owned by the scope that spawned it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Unique task identifier.
    pub id: TaskId,

    /// Scope the task was spawned in.
    pub scope_id: ScopeId,

    /// Registration order within the scope.
    pub seq: u64,

    /// Name of the producer the task invokes.
    pub producer: String,

    /// Current task state.
    pub state: TaskState,

    /// When the task was registered.
    pub created_at: DateTime<Utc>,

    /// When a worker first polled the task.
    pub started_at: Option<DateTime<Utc>>,

    /// When the task reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,

    /// Error message if the task failed.
    pub error_message: Option<String>,

    /// Worker that performed the most recent transition.
    pub worker: Option<WorkerIdentity>,
}

impl TaskRecord {
    /// Create a new pending record.
    pub fn new(id: TaskId, scope_id: ScopeId, producer: impl Into<String>) -> Self {
        Self {
            id,
            scope_id,
            seq: 0,
            producer: producer.into(),
            state: TaskState::Pending,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error_message: None,
            worker: None,
        }
    }

    /// Mark the task as running.
    pub fn start(&mut self, worker: WorkerIdentity) -> Result<(), CoreError> {
        self.transition(TaskState::Running, worker)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Mark the task as completed.
    pub fn complete(&mut self, worker: WorkerIdentity) -> Result<(), CoreError> {
        self.transition(TaskState::Completed, worker)?;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Mark the task as failed.
    pub fn fail(&mut self, error: impl Into<String>, worker: WorkerIdentity) -> Result<(), CoreError> {
        self.transition(TaskState::Failed, worker)?;
        self.finished_at = Some(Utc::now());
        self.error_message = Some(error.into());
        Ok(())
    }

    /// Mark the task as cancelled.
    pub fn cancel(&mut self, worker: WorkerIdentity) -> Result<(), CoreError> {
        self.transition(TaskState::Cancelled, worker)?;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Check if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Time between start and finish, if both happened.
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }

    fn transition(&mut self, to: TaskState, worker: WorkerIdentity) -> Result<(), CoreError> {
        if !self.state.can_transition_to(to) {
            return Err(CoreError::InvalidStateTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        self.worker = Some(worker);
        Ok(())
    }
}
