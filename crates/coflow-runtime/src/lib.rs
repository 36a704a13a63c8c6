//! coflow runtime
//!
//! Structured concurrent task runner built on tokio. Producers are scheduled
//! as tasks inside an explicit [`Scope`]; a [`TaskRunner`] combines the values
//! of two (or more) producers sequentially, by joining, or by awaiting their
//! handles in turn.
//!
//! ```rust,ignore
//! let scope = Scope::new(Handle::current(), Arc::new(TracingSink));
//! let runner = TaskRunner::new(scope);
//!
//! let first = Arc::new(DelayProducer::new("number-1", Duration::from_secs(1), 5));
//! let second = Arc::new(DelayProducer::new("number-2", Duration::from_secs(1), 3));
//!
//! // Both run at once: about one second, not two.
//! let (a, b) = runner.run_concurrent_combine(first, second).await?;
//! ```

pub mod config;
pub mod context;
pub mod producer;
mod registry;
pub mod runner;
pub mod scope;
pub mod sink;

pub use config::{ConfigError, RunnerConfig};
pub use context::TaskContext;
pub use producer::{from_fn, DelayProducer, FnProducer, Producer, YieldProducer};
pub use runner::TaskRunner;
pub use scope::{Job, ResultSlot, Scope, TaskHandle};
pub use sink::{ChannelSink, EventSink, MemorySink, TracingSink};
