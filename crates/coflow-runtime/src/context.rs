//! Per-invocation context handed to producers.

use std::sync::Arc;
use std::time::Duration;

use coflow_core::{ScopeId, TaskEvent, TaskId, WorkerIdentity};

use crate::sink::EventSink;

/// What a producer knows about the task running it.
///
/// The async methods here are the explicit suspension points of a task: each
/// reports a Suspended event, yields the worker back to the scheduler, and
/// reports Resumed once the task is polled again. A task cancelled while
/// suspended never reports Resumed.
#[derive(Clone)]
pub struct TaskContext {
    task_id: TaskId,
    scope_id: ScopeId,
    producer: Arc<str>,
    sink: Arc<dyn EventSink>,
}

impl TaskContext {
    pub(crate) fn new(
        task_id: TaskId,
        scope_id: ScopeId,
        producer: &str,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            task_id,
            scope_id,
            producer: Arc::from(producer),
            sink,
        }
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn scope_id(&self) -> &ScopeId {
        &self.scope_id
    }

    pub fn producer(&self) -> &str {
        &self.producer
    }

    /// Identity of the worker currently polling this task.
    pub fn worker(&self) -> WorkerIdentity {
        WorkerIdentity::current()
    }

    /// Suspend for `duration` without blocking the worker.
    pub async fn delay(&self, duration: Duration) {
        self.sink.emit(TaskEvent::suspended(
            self.task_id.clone(),
            self.scope_id.clone(),
            &self.producer,
            Some(duration),
        ));
        tokio::time::sleep(duration).await;
        self.resumed();
    }

    /// Give other tasks a chance to run, then continue.
    pub async fn yield_now(&self) {
        self.sink.emit(TaskEvent::suspended(
            self.task_id.clone(),
            self.scope_id.clone(),
            &self.producer,
            None,
        ));
        tokio::task::yield_now().await;
        self.resumed();
    }

    fn resumed(&self) {
        self.sink.emit(TaskEvent::resumed(
            self.task_id.clone(),
            self.scope_id.clone(),
            &self.producer,
        ));
    }
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("task_id", &self.task_id)
            .field("scope_id", &self.scope_id)
            .field("producer", &self.producer)
            .finish_non_exhaustive()
    }
}
