//! coflow CLI - concurrency lessons driven through the coflow task runner.

mod json_output;
mod lessons;

use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use coflow_core::RunMode;
use coflow_runtime::{ChannelSink, EventSink, RunnerConfig, Scope, TaskRunner, TracingSink};

/// coflow - blocking, threads, and structured concurrency side by side
#[derive(Parser)]
#[command(name = "coflow")]
#[command(about = "Concurrency lessons on a structured task runner", long_about = None)]
struct Cli {
    /// Number of worker threads in the pool
    #[arg(long, default_value_t = 2)]
    workers: usize,

    /// Worker thread name prefix
    #[arg(long, default_value = "coflow-worker")]
    thread_prefix: String,

    /// Print task events as JSON lines instead of log lines
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Durations and failure injection for the two number producers.
#[derive(Args, Debug, Clone)]
pub struct PairArgs {
    /// Delay of the first producer (returns 5)
    #[arg(long, default_value_t = 1000)]
    first_ms: u64,

    /// Delay of the second producer (returns 3)
    #[arg(long, default_value_t = 1000)]
    second_ms: u64,

    /// Make the first producer fail with this reason
    #[arg(long)]
    fail_first: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Busy loop on the calling thread
    Blocking {
        #[arg(long, default_value_t = 1_000_000_000)]
        iterations: u64,
    },

    /// Busy loop on a raw OS thread
    Thread {
        #[arg(long, default_value_t = 1_000_000_000)]
        iterations: u64,
    },

    /// Show which workers run launched tasks
    Dispatch,

    /// Two tasks yielding at their suspension points
    Suspend,

    /// Fire-and-forget launch, then join
    Launch {
        #[arg(long, default_value_t = 1000)]
        delay_ms: u64,
    },

    /// Await a deferred value
    Deferred {
        #[arg(long, default_value_t = 1000)]
        delay_ms: u64,
    },

    /// Run both number producers one after the other
    Sequential(PairArgs),

    /// Run both at once, join, then read their result slots
    Join(PairArgs),

    /// Run both at once and await each handle
    Combine(PairArgs),

    /// Run both at once and cancel the scope mid-flight
    Cancel {
        #[command(flatten)]
        pair: PairArgs,

        /// Cancel after this many milliseconds
        #[arg(long, default_value_t = 200)]
        after_ms: u64,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr so JSON lines on stdout stay parseable
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("coflow=info".parse()?))
        .with_thread_names(true)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if cli.json {
        json_output::enable_json_mode();
    }

    let config = RunnerConfig {
        worker_threads: cli.workers,
        thread_name_prefix: cli.thread_prefix,
        ..Default::default()
    };
    let runtime = config.build_runtime()?;

    info!(workers = config.worker_threads, "coflow starting");

    // The lessons below that never touch the pool run directly.
    match &cli.command {
        Commands::Blocking { iterations } => {
            lessons::blocking(*iterations);
            return Ok(());
        }
        Commands::Thread { iterations } => {
            lessons::raw_thread(*iterations)?;
            return Ok(());
        }
        _ => {}
    }

    let mut printer = None;
    let sink: Arc<dyn EventSink> = if cli.json {
        let (sink, mut rx) = ChannelSink::new(config.event_buffer);
        printer = Some(runtime.spawn(async move {
            while let Some(event) = rx.recv().await {
                json_output::emit_task_event(&event);
            }
        }));
        Arc::new(sink)
    } else {
        Arc::new(TracingSink)
    };

    let scope = Scope::new(runtime.handle().clone(), sink);
    let runner = TaskRunner::new(scope.clone());

    let outcome = runtime.block_on(async {
        let outcome = match cli.command {
            Commands::Blocking { .. } | Commands::Thread { .. } => Ok(None),
            Commands::Dispatch => lessons::dispatch(&scope).await.map(|()| None),
            Commands::Suspend => lessons::suspend(&scope).await.map(|()| None),
            Commands::Launch { delay_ms } => lessons::launch(&scope, delay_ms).await.map(|()| None),
            Commands::Deferred { delay_ms } => {
                lessons::deferred(&scope, delay_ms).await.map(|()| None)
            }
            Commands::Sequential(pair) => lessons::numbers(&runner, RunMode::Sequential, pair)
                .await
                .map(Some),
            Commands::Join(pair) => lessons::numbers(&runner, RunMode::ConcurrentJoin, pair)
                .await
                .map(Some),
            Commands::Combine(pair) => lessons::numbers(&runner, RunMode::ConcurrentCombine, pair)
                .await
                .map(Some),
            Commands::Cancel { pair, after_ms } => {
                lessons::cancel(&runner, pair, Duration::from_millis(after_ms))
                    .await
                    .map(Some)
            }
        };

        // Detached tasks, such as a combine sibling, still report events.
        scope.wait_idle().await;
        outcome
    });

    // The printer stops once the last sink handle is dropped with the scope.
    drop(runner);
    drop(scope);
    if let Some(printer) = printer {
        runtime.block_on(printer)?;
    }

    if let Some(report) = outcome? {
        json_output::emit_run_finished(report.mode, report.elapsed_ms, &report.result);
    }

    info!("coflow finished");
    Ok(())
}
