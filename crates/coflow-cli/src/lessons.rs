//! Lesson handlers. Each one is an external caller of the runtime that only
//! renders what it gets back.

use std::error::Error;
use std::fmt::Display;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use coflow_core::{CombinedResult, RunMode, WorkerIdentity};
use coflow_runtime::{from_fn, DelayProducer, Job, Scope, TaskContext, TaskRunner, YieldProducer};
use tracing::info;

use crate::json_output;
use crate::PairArgs;

type LessonResult<T = ()> = Result<T, Box<dyn Error>>;

/// Outcome of a two-producer run, reported once the lesson is over.
#[derive(Debug)]
pub struct RunReport {
    pub mode: RunMode,
    pub elapsed_ms: u128,
    pub result: CombinedResult<(i32, i32)>,
}

const FIRST_NUMBER: i32 = 5;
const SECOND_NUMBER: i32 = 3;

fn say(line: impl Display) {
    if !json_output::is_json_mode() {
        println!("{line}");
    }
}

/// CPU-bound loop standing in for a long-running computation.
pub fn long_running_task(iterations: u64) -> u64 {
    let mut acc = 0u64;
    for i in 0..iterations {
        acc = acc.wrapping_add(std::hint::black_box(i));
    }
    acc
}

/// Everything else on the calling thread waits for the loop.
pub fn blocking(iterations: u64) {
    let caller = WorkerIdentity::current();
    say(format!("Running {iterations} iterations on {caller}..."));

    let started = Instant::now();
    long_running_task(iterations);

    say(format!(
        "{caller} was blocked for {} ms",
        started.elapsed().as_millis()
    ));
}

/// The loop moves to its own OS thread; the caller is free immediately.
pub fn raw_thread(iterations: u64) -> LessonResult {
    let started = Instant::now();
    let handle = thread::Builder::new()
        .name("lesson-thread".to_string())
        .spawn(move || {
            long_running_task(iterations);
            WorkerIdentity::current()
        })?;

    say(format!(
        "{} free again after {} us",
        WorkerIdentity::current(),
        started.elapsed().as_micros()
    ));

    let worker = handle.join().map_err(|_| "lesson thread panicked")?;
    say(format!(
        "Loop finished on {worker} after {} ms",
        started.elapsed().as_millis()
    ));
    Ok(())
}

/// Launch a few tasks and report the worker each one landed on.
pub async fn dispatch(scope: &Scope) -> LessonResult {
    say(format!("Launching from {}", WorkerIdentity::current()));

    let mut handles = Vec::new();
    for n in 1..=3 {
        let producer = from_fn(format!("dispatch-{n}"), |ctx: TaskContext| async move {
            Ok(ctx.worker())
        });
        handles.push(scope.spawn(Arc::new(producer)));
    }

    for (n, handle) in handles.into_iter().enumerate() {
        let worker = handle.value().await?;
        say(format!("{}: {worker}", n + 1));
    }
    Ok(())
}

/// Two tasks that each yield once; their starts and ends interleave.
pub async fn suspend(scope: &Scope) -> LessonResult {
    let mut task1 = scope.launch(Arc::new(YieldProducer::new("task-1")));
    let mut task2 = scope.launch(Arc::new(YieldProducer::new("task-2")));

    let first = task1.join().await;
    let second = task2.join().await;
    say(format!("task-1 {first}, task-2 {second}"));
    Ok(())
}

const GET_DATA: &str = "getting data...";

fn get_data(delay_ms: u64) -> Arc<DelayProducer<&'static str>> {
    Arc::new(DelayProducer::new(
        "get-data",
        Duration::from_millis(delay_ms),
        GET_DATA,
    ))
}

type SharedData = Arc<Mutex<Option<String>>>;

fn read_data(data: &SharedData) -> Option<String> {
    data.lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone()
}

/// Launch a job that writes into `data` once its delay has passed.
fn launch_get_data(scope: &Scope, delay_ms: u64, data: SharedData) -> Job {
    let producer = from_fn("get-data", move |ctx: TaskContext| {
        let data = data.clone();
        async move {
            ctx.delay(Duration::from_millis(delay_ms)).await;
            *data.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) =
                Some(GET_DATA.to_string());
            Ok(())
        }
    });
    scope.launch(Arc::new(producer))
}

/// Launching does not wait: the job's effect is only visible once it is joined.
pub async fn launch(scope: &Scope, delay_ms: u64) -> LessonResult {
    let data = SharedData::default();
    let mut job = launch_get_data(scope, delay_ms, data.clone());

    say(format!(
        "data: {} ({}) -- {}",
        describe_data(read_data(&data)),
        job.state(),
        WorkerIdentity::current()
    ));

    let state = job.join().await;
    say(format!("after join ({state}): {}", describe_data(read_data(&data))));
    Ok(())
}

fn describe_data(data: Option<String>) -> String {
    data.unwrap_or_else(|| "Data is Empty".to_string())
}

/// Await the value directly instead of joining and reading a slot.
pub async fn deferred(scope: &Scope, delay_ms: u64) -> LessonResult {
    let handle = scope.spawn(get_data(delay_ms));
    say("Awaiting deferred value");
    let data = handle.value().await?;
    say(data);
    Ok(())
}

pub fn number_producers(pair: &PairArgs) -> (Arc<DelayProducer<i32>>, Arc<DelayProducer<i32>>) {
    let first_delay = Duration::from_millis(pair.first_ms);
    let first = match &pair.fail_first {
        Some(reason) => DelayProducer::failing("number-1", first_delay, reason.clone()),
        None => DelayProducer::new("number-1", first_delay, FIRST_NUMBER),
    };
    let second = DelayProducer::new(
        "number-2",
        Duration::from_millis(pair.second_ms),
        SECOND_NUMBER,
    );
    (Arc::new(first), Arc::new(second))
}

/// What the caller displays for a combined outcome, errors included.
pub fn render(result: &CombinedResult<(i32, i32)>) -> String {
    match result {
        Ok((first, second)) => format!("Data: {first} and {second}"),
        Err(e) => format!("No data: {e}"),
    }
}

/// The number lesson for one run mode.
pub async fn numbers(runner: &TaskRunner, mode: RunMode, pair: PairArgs) -> LessonResult<RunReport> {
    let (first, second) = number_producers(&pair);

    let started = Instant::now();
    let result = runner.run(mode, first, second).await;
    let elapsed_ms = started.elapsed().as_millis();

    say(format!("{} ({mode}, {elapsed_ms} ms)", render(&result)));
    Ok(RunReport {
        mode,
        elapsed_ms,
        result,
    })
}

/// Start both producers, then cancel the whole scope.
pub async fn cancel(
    runner: &TaskRunner,
    pair: PairArgs,
    after: Duration,
) -> LessonResult<RunReport> {
    let (first, second) = number_producers(&pair);

    let started = Instant::now();
    let run = tokio::spawn({
        let runner = runner.clone();
        async move { runner.run_concurrent_join(first, second).await }
    });

    tokio::time::sleep(after).await;
    let live = runner.scope().live_tasks();
    info!(live = live.len(), "Cancelling running producers");
    runner.scope().cancel();

    let result = run.await?;
    let elapsed_ms = started.elapsed().as_millis();
    say(format!(
        "{} (cancelled {} tasks after {} ms)",
        render(&result),
        live.len(),
        after.as_millis()
    ));

    Ok(RunReport {
        mode: RunMode::ConcurrentJoin,
        elapsed_ms,
        result,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use coflow_core::{CombineError, ProducerError, TaskState};
    use coflow_runtime::MemorySink;
    use tokio::runtime::Handle;

    fn pair(fail_first: Option<&str>) -> PairArgs {
        PairArgs {
            first_ms: 1000,
            second_ms: 1000,
            fail_first: fail_first.map(str::to_string),
        }
    }

    #[test]
    fn test_render() {
        assert_eq!(render(&Ok((5, 3))), "Data: 5 and 3");

        let err = CombineError::new(0, ProducerError::new("boom").into());
        assert_eq!(
            render(&Err(err)),
            "No data: Combination failed at task #0: Producer failed: boom"
        );
    }

    #[test]
    fn test_long_running_task_sums() {
        assert_eq!(long_running_task(0), 0);
        assert_eq!(long_running_task(5), 10);
    }

    #[test]
    fn test_describe_data() {
        assert_eq!(describe_data(None), "Data is Empty");
        assert_eq!(describe_data(Some("x".to_string())), "x");
    }

    #[tokio::test(start_paused = true)]
    async fn test_launched_job_fills_data_only_after_join() {
        let scope = Scope::new(Handle::current(), Arc::new(MemorySink::new()));
        let data = SharedData::default();

        let mut job = launch_get_data(&scope, 1000, data.clone());
        assert_eq!(read_data(&data), None);
        assert_eq!(job.state(), TaskState::Pending);

        assert_eq!(job.join().await, TaskState::Completed);
        assert_eq!(read_data(&data).as_deref(), Some(GET_DATA));
    }

    #[tokio::test(start_paused = true)]
    async fn test_number_producers_fail_injection() {
        let runner = TaskRunner::new(Scope::new(Handle::current(), Arc::new(MemorySink::new())));

        let (first, second) = number_producers(&pair(None));
        assert_eq!(runner.run_concurrent_combine(first, second).await, Ok((5, 3)));

        let (first, second) = number_producers(&pair(Some("boom")));
        let err = runner.run_sequential(first, second).await.unwrap_err();
        assert_eq!(err.producer_error(), Some(&ProducerError::new("boom")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_lesson_cancels_everything() {
        let scope = Scope::new(Handle::current(), Arc::new(MemorySink::new()));
        let runner = TaskRunner::new(scope.clone());

        let report = cancel(&runner, pair(None), Duration::from_millis(200))
            .await
            .unwrap();

        assert_eq!(report.mode, RunMode::ConcurrentJoin);
        assert!(report.result.unwrap_err().is_cancelled());
        assert!(scope.is_cancelled());
        assert!(scope.live_tasks().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_numbers_reports_run() {
        let runner = TaskRunner::new(Scope::new(Handle::current(), Arc::new(MemorySink::new())));

        let report = numbers(&runner, RunMode::ConcurrentCombine, pair(None))
            .await
            .unwrap();
        assert_eq!(report.result, Ok((5, 3)));
        assert_eq!(report.mode, RunMode::ConcurrentCombine);
    }
}
