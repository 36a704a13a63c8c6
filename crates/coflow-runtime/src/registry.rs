//! Per-scope bookkeeping of task records.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use coflow_core::{CoreError, ScopeId, TaskEvent, TaskId, TaskRecord, TaskState, WorkerIdentity};
use tracing::{debug, warn};

use crate::sink::EventSink;

/// Records of every task spawned in one scope.
///
/// Tasks register and transition from whichever worker polls them, so the map
/// sits behind a mutex. Events are emitted after the lock is released.
pub(crate) struct Registry {
    scope_id: ScopeId,
    records: Mutex<HashMap<TaskId, TaskRecord>>,
    next_seq: AtomicU64,
    sink: Arc<dyn EventSink>,
}

impl Registry {
    pub(crate) fn new(scope_id: ScopeId, sink: Arc<dyn EventSink>) -> Self {
        Self {
            scope_id,
            records: Mutex::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            sink,
        }
    }

    fn records(&self) -> MutexGuard<'_, HashMap<TaskId, TaskRecord>> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn register(&self, task_id: &TaskId, producer: &str) {
        let mut record = TaskRecord::new(task_id.clone(), self.scope_id.clone(), producer);
        {
            let mut records = self.records();
            record.seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
            records.insert(task_id.clone(), record);
        }
        self.sink
            .emit(TaskEvent::registered(task_id.clone(), self.scope_id.clone(), producer));
    }

    pub(crate) fn start(&self, task_id: &TaskId) -> Result<(), CoreError> {
        let producer = self.update(task_id, |rec, worker| rec.start(worker))?;
        self.sink
            .emit(TaskEvent::started(task_id.clone(), self.scope_id.clone(), &producer));
        Ok(())
    }

    pub(crate) fn complete(&self, task_id: &TaskId) -> Result<(), CoreError> {
        let producer = self.update(task_id, |rec, worker| rec.complete(worker))?;
        self.sink
            .emit(TaskEvent::completed(task_id.clone(), self.scope_id.clone(), &producer));
        Ok(())
    }

    pub(crate) fn fail(&self, task_id: &TaskId, reason: &str) -> Result<(), CoreError> {
        let producer = self.update(task_id, |rec, worker| rec.fail(reason, worker))?;
        self.sink.emit(TaskEvent::failed(
            task_id.clone(),
            self.scope_id.clone(),
            &producer,
            reason,
        ));
        Ok(())
    }

    pub(crate) fn cancel(&self, task_id: &TaskId) -> Result<(), CoreError> {
        let producer = self.update(task_id, |rec, worker| rec.cancel(worker))?;
        self.sink
            .emit(TaskEvent::cancelled(task_id.clone(), self.scope_id.clone(), &producer));
        Ok(())
    }

    /// Apply `transition` and return the producer name for the event.
    fn update<F>(&self, task_id: &TaskId, transition: F) -> Result<String, CoreError>
    where
        F: FnOnce(&mut TaskRecord, WorkerIdentity) -> Result<(), CoreError>,
    {
        let mut records = self.records();
        let record = records
            .get_mut(task_id)
            .ok_or_else(|| CoreError::TaskNotFound(task_id.clone()))?;

        if let Err(e) = transition(record, WorkerIdentity::current()) {
            warn!(task_id = %task_id, error = %e, "Rejected task transition");
            return Err(e);
        }
        if record.is_terminal() {
            debug!(
                task_id = %task_id,
                state = %record.state,
                duration_ms = ?record.duration_ms(),
                "Task finished"
            );
        }
        Ok(record.producer.clone())
    }

    pub(crate) fn state(&self, task_id: &TaskId) -> Option<TaskState> {
        self.records().get(task_id).map(|rec| rec.state)
    }

    pub(crate) fn record(&self, task_id: &TaskId) -> Option<TaskRecord> {
        self.records().get(task_id).cloned()
    }

    /// All records, oldest first.
    pub(crate) fn snapshot(&self) -> Vec<TaskRecord> {
        let mut records: Vec<TaskRecord> = self.records().values().cloned().collect();
        records.sort_by_key(|rec| rec.seq);
        records
    }

    pub(crate) fn live(&self) -> Vec<TaskId> {
        let records = self.records();
        let mut live: Vec<&TaskRecord> = records.values().filter(|rec| !rec.is_terminal()).collect();
        live.sort_by_key(|rec| rec.seq);
        live.into_iter().map(|rec| rec.id.clone()).collect()
    }

    /// Forget one task once it is terminal. Live records are kept.
    pub(crate) fn release(&self, task_id: &TaskId) {
        let mut records = self.records();
        if records.get(task_id).is_some_and(TaskRecord::is_terminal) {
            records.remove(task_id);
        }
    }

    /// Drop terminal records; returns how many were removed.
    pub(crate) fn prune(&self) -> usize {
        let mut records = self.records();
        let before = records.len();
        records.retain(|_, rec| !rec.is_terminal());
        before - records.len()
    }
}
