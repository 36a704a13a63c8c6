//! Event sinks: where task lifecycle events go.
//!
//! The runtime never performs I/O on its own; every transition is handed to
//! an [`EventSink`] and the sink decides what to do with it.

use std::sync::{Arc, Mutex};

use coflow_core::{TaskEvent, TaskEventKind, TaskId};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Receives every lifecycle event emitted by a scope's tasks.
///
/// Called synchronously from whichever worker performed the transition, so
/// implementations must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: TaskEvent);
}

/// Renders events through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: TaskEvent) {
        let task = event.task_id.short();
        match event.kind {
            TaskEventKind::Registered => {
                debug!(task_id = %task, producer = %event.producer, worker = %event.worker, "Task registered");
            }
            TaskEventKind::Started => {
                info!(task_id = %task, producer = %event.producer, worker = %event.worker, "Starting {} ...", event.producer);
            }
            TaskEventKind::Suspended => {
                let delay_ms = event.metadata.get("delay_ms").map(String::as_str).unwrap_or("yield");
                debug!(task_id = %task, producer = %event.producer, worker = %event.worker, delay_ms, "Task suspended");
            }
            TaskEventKind::Resumed => {
                debug!(task_id = %task, producer = %event.producer, worker = %event.worker, "Task resumed");
            }
            TaskEventKind::Completed => {
                info!(task_id = %task, producer = %event.producer, worker = %event.worker, "Ending {} ...", event.producer);
            }
            TaskEventKind::Failed => {
                let error = event.metadata.get("error").map(String::as_str).unwrap_or_default();
                warn!(task_id = %task, producer = %event.producer, worker = %event.worker, error, "Task failed");
            }
            TaskEventKind::Cancelled => {
                info!(task_id = %task, producer = %event.producer, worker = %event.worker, "Task cancelled");
            }
        }
    }
}

/// Forwards events into a bounded channel.
///
/// Events are dropped (with a warning) when the receiver lags behind by more
/// than the channel capacity, so a slow consumer never stalls a worker.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<TaskEvent>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<TaskEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: TaskEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(task_id = %event.task_id, kind = ?event.kind, "Event channel full - dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Event receiver dropped");
            }
        }
    }
}

/// Keeps every event in memory, in emission order.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<TaskEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all events received so far.
    pub fn events(&self) -> Vec<TaskEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Event kinds received for one task, in order.
    pub fn kinds_for(&self, task_id: &TaskId) -> Vec<TaskEventKind> {
        self.events()
            .into_iter()
            .filter(|e| &e.task_id == task_id)
            .map(|e| e.kind)
            .collect()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: TaskEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coflow_core::ScopeId;

    fn event(kind: TaskEventKind) -> TaskEvent {
        TaskEvent::new(
            TaskId::generate(),
            ScopeId::generate(),
            "number-1",
            kind,
            Default::default(),
        )
    }

    #[test]
    fn test_memory_sink_keeps_order() {
        let sink = MemorySink::new();
        let started = event(TaskEventKind::Started);
        let task_id = started.task_id.clone();

        sink.emit(started);
        sink.emit(event(TaskEventKind::Started));

        let mut completed = event(TaskEventKind::Completed);
        completed.task_id = task_id.clone();
        sink.emit(completed);

        assert_eq!(sink.events().len(), 3);
        assert_eq!(
            sink.kinds_for(&task_id),
            vec![TaskEventKind::Started, TaskEventKind::Completed]
        );
    }

    #[tokio::test]
    async fn test_channel_sink_forwards() {
        let (sink, mut rx) = ChannelSink::new(4);
        sink.emit(event(TaskEventKind::Registered));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.kind, TaskEventKind::Registered);
    }

    #[test]
    fn test_channel_sink_drops_when_full() {
        let (sink, mut rx) = ChannelSink::new(1);
        sink.emit(event(TaskEventKind::Started));
        sink.emit(event(TaskEventKind::Completed));

        assert_eq!(rx.try_recv().unwrap().kind, TaskEventKind::Started);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_channel_sink_after_receiver_dropped() {
        let (sink, rx) = ChannelSink::new(1);
        drop(rx);
        sink.emit(event(TaskEventKind::Started));
    }
}
