//! Structured concurrency scopes and task handles.
//!
//! Every task belongs to exactly one [`Scope`]. A scope is created by its
//! caller with an explicit runtime handle; there is no global scope. Cancelling
//! a scope cancels every task spawned in it and in its child scopes.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock};

use coflow_core::{
    CancelledError, CoreError, ProducerError, ScopeId, ScopeStatus, TaskError, TaskId, TaskRecord,
    TaskState,
};
use futures_util::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::context::TaskContext;
use crate::producer::Producer;
use crate::registry::Registry;
use crate::sink::EventSink;

struct ScopeInner {
    id: ScopeId,
    parent: Option<ScopeId>,
    handle: Handle,
    token: CancellationToken,
    tracker: TaskTracker,
    registry: Registry,
    sink: Arc<dyn EventSink>,
}

/// A lifetime and cancellation boundary grouping related tasks.
///
/// Cloning a `Scope` yields another handle to the same scope.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

impl Scope {
    /// Create a root scope whose tasks run on `handle` and report to `sink`.
    pub fn new(handle: Handle, sink: Arc<dyn EventSink>) -> Self {
        Self::with_token(handle, sink, CancellationToken::new(), None)
    }

    fn with_token(
        handle: Handle,
        sink: Arc<dyn EventSink>,
        token: CancellationToken,
        parent: Option<ScopeId>,
    ) -> Self {
        let id = ScopeId::generate();
        debug!(scope_id = %id, parent = ?parent, "Scope created");
        Self {
            inner: Arc::new(ScopeInner {
                registry: Registry::new(id.clone(), sink.clone()),
                id,
                parent,
                handle,
                token,
                tracker: TaskTracker::new(),
                sink,
            }),
        }
    }

    /// Create a nested scope. Cancelling `self` cancels the child; cancelling
    /// the child leaves `self` untouched.
    pub fn child(&self) -> Scope {
        Self::with_token(
            self.inner.handle.clone(),
            self.inner.sink.clone(),
            self.inner.token.child_token(),
            Some(self.inner.id.clone()),
        )
    }

    pub fn id(&self) -> &ScopeId {
        &self.inner.id
    }

    pub fn parent_id(&self) -> Option<&ScopeId> {
        self.inner.parent.as_ref()
    }

    /// Runtime handle tasks of this scope are spawned on.
    pub fn handle(&self) -> &Handle {
        &self.inner.handle
    }

    /// Start a task for `producer` and return a handle to its eventual value.
    pub fn spawn<P>(&self, producer: Arc<P>) -> TaskHandle<P::Output>
    where
        P: Producer + ?Sized + 'static,
    {
        let task_id = TaskId::generate();
        let token = self.inner.token.child_token();
        let terminal = Arc::new(OnceLock::new());
        let (tx, rx) = oneshot::channel();

        self.inner.registry.register(&task_id, producer.name());

        let join = self.inner.tracker.spawn_on(
            drive(
                self.inner.clone(),
                task_id.clone(),
                producer,
                token.clone(),
                terminal.clone(),
                tx,
            ),
            &self.inner.handle,
        );

        TaskHandle {
            job: Job {
                task_id: task_id.clone(),
                scope: self.inner.clone(),
                join,
                token,
                terminal,
                joined: false,
            },
            slot: ResultSlot {
                task_id,
                scope: self.inner.clone(),
                rx: Some(rx),
            },
        }
    }

    /// Start a task whose output is discarded.
    pub fn launch<P>(&self, producer: Arc<P>) -> Job
    where
        P: Producer + ?Sized + 'static,
    {
        self.spawn(producer).into_job()
    }

    /// Cancel every task of this scope and of its child scopes.
    pub fn cancel(&self) {
        info!(
            scope_id = %self.inner.id,
            live_tasks = self.inner.registry.live().len(),
            "Cancelling scope"
        );
        self.inner.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    pub fn status(&self) -> ScopeStatus {
        if self.is_cancelled() {
            ScopeStatus::Cancelled
        } else {
            ScopeStatus::Active
        }
    }

    /// Wait until every task spawned in this scope so far has finished,
    /// including tasks whose handles were dropped.
    pub async fn wait_idle(&self) {
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
    }

    /// Tasks of this scope that have not reached a terminal state.
    pub fn live_tasks(&self) -> Vec<TaskId> {
        self.inner.registry.live()
    }

    /// Records of tasks whose outcome has not been consumed yet, oldest first.
    ///
    /// A record is released once its outcome is taken, or once the task is
    /// finished and nothing holds its result slot any more.
    pub fn snapshot(&self) -> Vec<TaskRecord> {
        self.inner.registry.snapshot()
    }

    pub fn record(&self, task_id: &TaskId) -> Option<TaskRecord> {
        self.inner.registry.record(task_id)
    }

    /// Forget records of finished tasks.
    pub fn prune(&self) -> usize {
        self.inner.registry.prune()
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.inner.id)
            .field("parent", &self.inner.parent)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

/// Body of every spawned task: run the producer under the task's token and
/// deliver the outcome into the task's own result slot.
async fn drive<P>(
    scope: Arc<ScopeInner>,
    task_id: TaskId,
    producer: Arc<P>,
    token: CancellationToken,
    terminal: Arc<OnceLock<TaskState>>,
    slot: oneshot::Sender<Result<P::Output, TaskError>>,
) where
    P: Producer + ?Sized + 'static,
{
    let outcome = run_producer(&scope, &task_id, producer.as_ref(), &token).await;

    let state = match &outcome {
        Ok(_) => TaskState::Completed,
        Err(e) => e.terminal_state(),
    };
    let _ = terminal.set(state);

    let recorded = match &outcome {
        Ok(_) => scope.registry.complete(&task_id),
        Err(TaskError::Producer(e)) => scope.registry.fail(&task_id, &e.reason),
        Err(TaskError::Cancelled(_)) => scope.registry.cancel(&task_id),
    };
    log_rejected(&task_id, recorded);

    // Receiver is gone for launched jobs and abandoned handles.
    if slot.send(outcome).is_err() {
        scope.registry.release(&task_id);
    }
}

async fn run_producer<P>(
    scope: &ScopeInner,
    task_id: &TaskId,
    producer: &P,
    token: &CancellationToken,
) -> Result<P::Output, TaskError>
where
    P: Producer + ?Sized,
{
    if token.is_cancelled() {
        return Err(CancelledError::new(task_id.clone()).into());
    }
    log_rejected(task_id, scope.registry.start(task_id));

    let ctx = TaskContext::new(
        task_id.clone(),
        scope.id.clone(),
        producer.name(),
        scope.sink.clone(),
    );

    // Producer first: a task whose producer finishes in the same poll that
    // observes cancellation still completes.
    tokio::select! {
        biased;
        result = AssertUnwindSafe(producer.produce(&ctx)).catch_unwind() => match result {
            Ok(value) => value.map_err(TaskError::from),
            Err(payload) => Err(ProducerError::new(panic_reason(payload)).into()),
        },
        _ = token.cancelled() => Err(CancelledError::new(task_id.clone()).into()),
    }
}

fn panic_reason(payload: Box<dyn Any + Send>) -> String {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    };
    format!("producer panicked: {message}")
}

fn log_rejected(task_id: &TaskId, result: Result<(), CoreError>) {
    if let Err(e) = result {
        warn!(task_id = %task_id, error = %e, "Task record out of sync");
    }
}

/// Handle to a launched task: it can be joined and cancelled, but carries no
/// value.
///
/// Dropping a `Job` does not cancel the task; it keeps running in its scope.
pub struct Job {
    task_id: TaskId,
    scope: Arc<ScopeInner>,
    join: JoinHandle<()>,
    token: CancellationToken,
    terminal: Arc<OnceLock<TaskState>>,
    joined: bool,
}

impl Job {
    pub fn id(&self) -> &TaskId {
        &self.task_id
    }

    /// Current state. Once terminal, it no longer depends on the scope's
    /// records, so releasing or pruning them does not change it.
    pub fn state(&self) -> TaskState {
        if let Some(state) = self.terminal.get() {
            return *state;
        }
        self.scope
            .registry
            .state(&self.task_id)
            .unwrap_or(TaskState::Pending)
    }

    /// Cancel this task only.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.joined || self.join.is_finished()
    }

    /// Wait until the task reaches a terminal state and has delivered its
    /// outcome.
    pub async fn join(&mut self) -> TaskState {
        if !self.joined {
            if let Err(e) = (&mut self.join).await {
                // Only a runtime shutdown can abort the task body.
                warn!(task_id = %self.task_id, error = %e, "Task aborted by runtime");
                if self.scope.registry.state(&self.task_id).is_some_and(|s| s.is_active()) {
                    log_rejected(&self.task_id, self.scope.registry.cancel(&self.task_id));
                }
                let _ = self.terminal.set(TaskState::Cancelled);
            }
            self.joined = true;
        }
        self.state()
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("task_id", &self.task_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Single-writer slot a task delivers its outcome into.
///
/// Taking the outcome, or dropping the slot, releases the task's record.
pub struct ResultSlot<T> {
    task_id: TaskId,
    scope: Arc<ScopeInner>,
    rx: Option<oneshot::Receiver<Result<T, TaskError>>>,
}

impl<T> ResultSlot<T> {
    /// Take the outcome if the task has delivered it; `None` while it is still
    /// running or once the outcome was taken.
    pub fn take(&mut self) -> Option<Result<T, TaskError>> {
        let rx = self.rx.as_mut()?;
        let outcome = match rx.try_recv() {
            Ok(outcome) => outcome,
            Err(oneshot::error::TryRecvError::Empty) => return None,
            Err(oneshot::error::TryRecvError::Closed) => {
                Err(CancelledError::new(self.task_id.clone()).into())
            }
        };
        self.rx = None;
        self.scope.registry.release(&self.task_id);
        Some(outcome)
    }

    /// Wait for the outcome. A task torn down without delivering one counts as
    /// cancelled.
    pub async fn wait(mut self) -> Result<T, TaskError> {
        match self.rx.take() {
            Some(rx) => rx
                .await
                .unwrap_or_else(|_| Err(CancelledError::new(self.task_id.clone()).into())),
            None => Err(CancelledError::new(self.task_id.clone()).into()),
        }
    }
}

impl<T> Drop for ResultSlot<T> {
    fn drop(&mut self) {
        // Close first: a task that has not delivered yet then fails its send
        // and releases the record itself.
        drop(self.rx.take());
        self.scope.registry.release(&self.task_id);
    }
}

/// Handle to a spawned task and its eventual value.
pub struct TaskHandle<T> {
    job: Job,
    slot: ResultSlot<T>,
}

impl<T> TaskHandle<T> {
    pub fn id(&self) -> &TaskId {
        self.job.id()
    }

    pub fn state(&self) -> TaskState {
        self.job.state()
    }

    /// Cancel this task only; siblings in the scope are unaffected.
    pub fn cancel(&self) {
        self.job.cancel();
    }

    /// Wait for a terminal state without consuming the value.
    pub async fn join(&mut self) -> TaskState {
        self.job.join().await
    }

    /// The delivered outcome, if any. Pair with [`join`](Self::join).
    pub fn take(&mut self) -> Option<Result<T, TaskError>> {
        self.slot.take()
    }

    /// Wait for the task's value. Fails as soon as this task fails,
    /// regardless of any other task.
    pub async fn value(self) -> Result<T, TaskError> {
        self.slot.wait().await
    }

    /// Discard the value and keep only the joinable job.
    pub fn into_job(self) -> Job {
        self.job
    }
}

impl<T> std::fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle").field("job", &self.job).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::producer::{from_fn, DelayProducer, YieldProducer};
    use crate::sink::MemorySink;
    use coflow_core::TaskEventKind;
    use std::time::Duration;
    use tokio::sync::Notify;
    use tokio::time::{sleep, Instant};

    fn scope() -> (Scope, MemorySink) {
        let sink = MemorySink::new();
        (Scope::new(Handle::current(), Arc::new(sink.clone())), sink)
    }

    fn number(name: &str, ms: u64, value: i32) -> Arc<DelayProducer<i32>> {
        Arc::new(DelayProducer::new(name, Duration::from_millis(ms), value))
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_and_value() {
        let (scope, sink) = scope();
        let handle = scope.spawn(number("number-1", 1000, 5));
        let id = handle.id().clone();

        assert_eq!(scope.record(&id).unwrap().producer, "number-1");
        assert_eq!(handle.value().await, Ok(5));
        // Consuming the value releases the record.
        assert!(scope.record(&id).is_none());
        assert_eq!(
            sink.kinds_for(&id),
            vec![
                TaskEventKind::Registered,
                TaskEventKind::Started,
                TaskEventKind::Suspended,
                TaskEventKind::Resumed,
                TaskEventKind::Completed,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_launch_is_fire_and_forget() {
        let (scope, _sink) = scope();
        let mut job = scope.launch(Arc::new(DelayProducer::new(
            "get-data",
            Duration::from_millis(1000),
            "getting data...",
        )));

        // Nothing has been polled yet: the value is not available right after launch.
        assert_eq!(job.state(), TaskState::Pending);
        assert!(!job.is_finished());

        assert_eq!(job.join().await, TaskState::Completed);
        assert!(job.is_finished());
        assert_eq!(job.join().await, TaskState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_then_take() {
        let (scope, _sink) = scope();
        let mut handle = scope.spawn(number("number-2", 1000, 3));

        assert!(handle.take().is_none());
        assert_eq!(handle.join().await, TaskState::Completed);
        assert_eq!(handle.take(), Some(Ok(3)));
        assert_eq!(handle.take(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scope_cancel_reaches_every_task() {
        let (scope, sink) = scope();
        let first = scope.spawn(number("number-1", 1000, 5));
        let second = scope.spawn(number("number-2", 1000, 3));
        let ids = [first.id().clone(), second.id().clone()];

        sleep(Duration::from_millis(200)).await;
        assert_eq!(scope.live_tasks().len(), 2);
        scope.cancel();

        assert!(first.value().await.unwrap_err().is_cancelled());
        assert!(second.value().await.unwrap_err().is_cancelled());
        assert!(scope.live_tasks().is_empty());
        assert_eq!(scope.status(), ScopeStatus::Cancelled);

        // Nothing completes after cancellation, even once the delays would have elapsed.
        sleep(Duration::from_millis(2000)).await;
        for id in &ids {
            let kinds = sink.kinds_for(id);
            assert_eq!(kinds.last(), Some(&TaskEventKind::Cancelled));
            assert!(!kinds.contains(&TaskEventKind::Completed));
            assert!(!kinds.contains(&TaskEventKind::Resumed));
        }
        assert!(scope.snapshot().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_into_cancelled_scope() {
        let (scope, sink) = scope();
        scope.cancel();

        let handle = scope.spawn(number("late", 10, 1));
        let id = handle.id().clone();

        let err = handle.value().await.unwrap_err();
        assert_eq!(err, TaskError::Cancelled(CancelledError::new(id.clone())));
        assert_eq!(
            sink.kinds_for(&id),
            vec![TaskEventKind::Registered, TaskEventKind::Cancelled]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_single_task() {
        let (scope, _sink) = scope();
        let first = scope.spawn(number("number-1", 1000, 5));
        let second = scope.spawn(number("number-2", 1000, 3));

        first.cancel();

        assert!(first.value().await.unwrap_err().is_cancelled());
        assert_eq!(second.value().await, Ok(3));
        assert!(!scope.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_child_scope_cancellation() {
        let (parent, _sink) = scope();
        let child = parent.child();
        assert_eq!(child.parent_id(), Some(parent.id()));

        let sibling = parent.spawn(number("parent-task", 500, 1));
        let doomed = child.spawn(number("child-task", 500, 2));

        child.cancel();
        assert!(doomed.value().await.unwrap_err().is_cancelled());
        assert_eq!(sibling.value().await, Ok(1));

        let grandchild_task = parent.child().spawn(number("late-child", 500, 3));
        parent.cancel();
        assert!(grandchild_task.value().await.unwrap_err().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_producer_twice_is_independent() {
        let (scope, _sink) = scope();
        let producer = number("number-1", 1000, 5);

        let a = scope.spawn(producer.clone());
        let b = scope.spawn(producer);
        assert_ne!(a.id(), b.id());

        a.cancel();
        assert!(a.value().await.is_err());
        assert_eq!(b.value().await, Ok(5));
    }

    #[tokio::test]
    async fn test_panicking_producer_fails() {
        let (scope, _sink) = scope();
        let producer = Arc::new(from_fn("explode", |_ctx| async {
            if true {
                panic!("kaboom");
            }
            Ok(0)
        }));

        let mut handle = scope.spawn(producer);
        assert_eq!(handle.join().await, TaskState::Failed);

        let err = handle.take().unwrap().unwrap_err();
        assert_eq!(
            err,
            TaskError::Producer(ProducerError::new("producer panicked: kaboom"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_wins_over_late_cancellation() {
        let (scope, _sink) = scope();
        let release = Arc::new(Notify::new());
        let producer = Arc::new(from_fn("gated", {
            let release = release.clone();
            move |_ctx| {
                let release = release.clone();
                async move {
                    release.notified().await;
                    Ok(7)
                }
            }
        }));

        let handle = scope.spawn(producer);
        sleep(Duration::from_millis(1)).await;
        assert_eq!(handle.state(), TaskState::Running);

        // Both become ready before the task is polled again.
        release.notify_one();
        scope.cancel();

        assert_eq!(handle.value().await, Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_yield_producers_interleave() {
        let (scope, sink) = scope();
        let start = Instant::now();

        let mut task1 = scope.launch(Arc::new(YieldProducer::new("task-1")));
        let mut task2 = scope.launch(Arc::new(YieldProducer::new("task-2")));
        task1.join().await;
        task2.join().await;

        let order: Vec<(String, TaskEventKind)> = sink
            .events()
            .into_iter()
            .filter(|e| e.kind != TaskEventKind::Registered)
            .map(|e| (e.producer, e.kind))
            .collect();

        // Both start before either ends: each yields its worker at the suspension point.
        let first_end = order
            .iter()
            .position(|(_, k)| *k == TaskEventKind::Completed)
            .unwrap();
        let starts_before_end = order[..first_end]
            .iter()
            .filter(|(_, k)| *k == TaskEventKind::Started)
            .count();
        assert_eq!(starts_before_end, 2);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_before_join_keeps_terminal_state() {
        let (scope, _sink) = scope();
        let mut handle = scope.spawn(number("number-1", 10, 5));

        sleep(Duration::from_millis(50)).await;
        assert_eq!(scope.prune(), 1);
        assert!(scope.snapshot().is_empty());

        assert_eq!(handle.join().await, TaskState::Completed);
        assert_eq!(handle.state(), TaskState::Completed);
        assert_eq!(handle.take(), Some(Ok(5)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unconsumed_outcome_keeps_record() {
        let (scope, _sink) = scope();
        let mut handle = scope.spawn(number("number-1", 10, 5));
        let id = handle.id().clone();

        assert_eq!(handle.join().await, TaskState::Completed);
        assert_eq!(scope.record(&id).unwrap().state, TaskState::Completed);

        assert_eq!(handle.take(), Some(Ok(5)));
        assert!(scope.record(&id).is_none());
        assert_eq!(handle.state(), TaskState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_handles_release_records() {
        let (scope, sink) = scope();

        let running = scope.spawn(number("running", 1000, 1));
        drop(running);
        let finished = scope.spawn(number("finished", 10, 2));
        sleep(Duration::from_millis(50)).await;
        drop(finished);
        let mut job = scope.launch(number("launched", 10, 3));

        assert_eq!(job.join().await, TaskState::Completed);
        scope.wait_idle().await;

        assert!(scope.snapshot().is_empty());
        assert_eq!(
            sink.events()
                .iter()
                .filter(|e| e.kind == TaskEventKind::Completed)
                .count(),
            3
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_idle_covers_detached_tasks() {
        let (scope, _sink) = scope();
        let start = Instant::now();

        drop(scope.spawn(number("detached", 700, 1)));
        scope.wait_idle().await;

        assert!(start.elapsed() >= Duration::from_millis(700));
        assert!(scope.live_tasks().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_in_registration_order() {
        let (scope, _sink) = scope();
        let handles: Vec<_> = (0..20)
            .map(|n| scope.spawn(number(&format!("task-{n}"), 1000, n)))
            .collect();

        let producers: Vec<String> = scope.snapshot().into_iter().map(|r| r.producer).collect();
        let expected: Vec<String> = (0..20).map(|n| format!("task-{n}")).collect();
        assert_eq!(producers, expected);

        scope.cancel();
        drop(handles);
    }
}
