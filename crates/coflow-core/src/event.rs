//! Task lifecycle events for observability.

use crate::ids::{ScopeId, TaskId};
use crate::WorkerIdentity;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// A task lifecycle event, tagged with the worker it happened on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    /// Task this event belongs to.
    pub task_id: TaskId,
    /// Scope the task was spawned in.
    pub scope_id: ScopeId,
    /// Name of the producer the task invokes.
    pub producer: String,
    /// Type of event.
    pub kind: TaskEventKind,
    /// Thread the event was observed on.
    pub worker: WorkerIdentity,
    /// Unix timestamp (milliseconds) when event occurred.
    pub timestamp_ms: i64,
    /// Event-specific metadata (error, delay_ms, ...).
    pub metadata: HashMap<String, String>,
}

impl TaskEvent {
    /// Create a new task event on the calling thread.
    pub fn new(
        task_id: TaskId,
        scope_id: ScopeId,
        producer: impl Into<String>,
        kind: TaskEventKind,
        metadata: HashMap<String, String>,
    ) -> Self {
        Self {
            task_id,
            scope_id,
            producer: producer.into(),
            kind,
            worker: WorkerIdentity::current(),
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            metadata,
        }
    }

    pub fn registered(task_id: TaskId, scope_id: ScopeId, producer: &str) -> Self {
        Self::new(task_id, scope_id, producer, TaskEventKind::Registered, HashMap::new())
    }

    pub fn started(task_id: TaskId, scope_id: ScopeId, producer: &str) -> Self {
        Self::new(task_id, scope_id, producer, TaskEventKind::Started, HashMap::new())
    }

    /// Create a Suspended event; `delay` is absent for a bare yield.
    pub fn suspended(
        task_id: TaskId,
        scope_id: ScopeId,
        producer: &str,
        delay: Option<Duration>,
    ) -> Self {
        let mut metadata = HashMap::new();
        if let Some(d) = delay {
            metadata.insert("delay_ms".to_string(), d.as_millis().to_string());
        }
        Self::new(task_id, scope_id, producer, TaskEventKind::Suspended, metadata)
    }

    pub fn resumed(task_id: TaskId, scope_id: ScopeId, producer: &str) -> Self {
        Self::new(task_id, scope_id, producer, TaskEventKind::Resumed, HashMap::new())
    }

    pub fn completed(task_id: TaskId, scope_id: ScopeId, producer: &str) -> Self {
        Self::new(task_id, scope_id, producer, TaskEventKind::Completed, HashMap::new())
    }

    pub fn failed(task_id: TaskId, scope_id: ScopeId, producer: &str, error: &str) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert("error".to_string(), error.to_string());
        Self::new(task_id, scope_id, producer, TaskEventKind::Failed, metadata)
    }

    pub fn cancelled(task_id: TaskId, scope_id: ScopeId, producer: &str) -> Self {
        Self::new(task_id, scope_id, producer, TaskEventKind::Cancelled, HashMap::new())
    }
}

/// Type of task lifecycle event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskEventKind {
    /// Task registered with its scope (Pending).
    Registered,
    /// Worker began polling the task (Running).
    Started,
    /// Task reached a suspension point and yielded its worker.
    Suspended,
    /// Task was rescheduled after a suspension point.
    Resumed,
    /// Producer returned a value.
    Completed,
    /// Producer failed.
    Failed,
    /// Task was cancelled.
    Cancelled,
}
