//! JSON output for streaming events to stdout.

use serde::Serialize;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};

use coflow_core::{CombinedResult, RunMode, TaskEvent, TaskEventKind};

/// Global flag to enable JSON output mode.
static JSON_MODE_ENABLED: AtomicBool = AtomicBool::new(false);

/// Enable JSON output mode.
pub fn enable_json_mode() {
    JSON_MODE_ENABLED.store(true, Ordering::SeqCst);
}

/// Check if JSON mode is enabled.
pub fn is_json_mode() -> bool {
    JSON_MODE_ENABLED.load(Ordering::SeqCst)
}

/// JSON event types that can be emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JsonEventType {
    TaskRegistered,
    TaskStarted,
    TaskSuspended,
    TaskResumed,
    TaskCompleted,
    TaskFailed,
    TaskCancelled,
    RunFinished,
}

impl From<TaskEventKind> for JsonEventType {
    fn from(kind: TaskEventKind) -> Self {
        match kind {
            TaskEventKind::Registered => Self::TaskRegistered,
            TaskEventKind::Started => Self::TaskStarted,
            TaskEventKind::Suspended => Self::TaskSuspended,
            TaskEventKind::Resumed => Self::TaskResumed,
            TaskEventKind::Completed => Self::TaskCompleted,
            TaskEventKind::Failed => Self::TaskFailed,
            TaskEventKind::Cancelled => Self::TaskCancelled,
        }
    }
}

/// A JSON event to be output to stdout.
#[derive(Debug, Clone, Serialize)]
pub struct JsonEvent {
    pub event: JsonEventType,
    pub timestamp: String,
    pub data: serde_json::Value,
}

impl JsonEvent {
    /// Create a new JSON event with the current timestamp.
    pub fn new(event: JsonEventType, data: serde_json::Value) -> Self {
        Self {
            event,
            timestamp: chrono::Utc::now().to_rfc3339(),
            data,
        }
    }

    /// Output this event as a JSON line to stdout.
    pub fn emit(&self) {
        if !is_json_mode() {
            return;
        }
        if let Ok(json) = serde_json::to_string(self) {
            let mut stdout = io::stdout().lock();
            let _ = writeln!(stdout, "{}", json);
            let _ = stdout.flush();
        }
    }
}

/// Build the JSON line for a task lifecycle event.
pub fn task_event(event: &TaskEvent) -> JsonEvent {
    JsonEvent::new(
        event.kind.into(),
        serde_json::json!({
            "task_id": event.task_id,
            "scope_id": event.scope_id,
            "producer": event.producer,
            "worker": event.worker,
            "timestamp_ms": event.timestamp_ms,
            "metadata": event.metadata,
        }),
    )
}

/// Emit a task lifecycle event.
pub fn emit_task_event(event: &TaskEvent) {
    task_event(event).emit();
}

/// Emit a run_finished event.
pub fn emit_run_finished(mode: RunMode, elapsed_ms: u128, result: &CombinedResult<(i32, i32)>) {
    let data = match result {
        Ok((first, second)) => serde_json::json!({
            "mode": mode,
            "elapsed_ms": elapsed_ms,
            "values": [first, second],
        }),
        Err(e) => serde_json::json!({
            "mode": mode,
            "elapsed_ms": elapsed_ms,
            "failed_index": e.index,
            "error": e.to_string(),
        }),
    };
    JsonEvent::new(JsonEventType::RunFinished, data).emit();
}
