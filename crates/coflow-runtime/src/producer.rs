//! Producers: the asynchronous computations a runner schedules.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use coflow_core::ProducerError;

use crate::context::TaskContext;

/// An asynchronous computation that yields a value after suspending, or fails.
///
/// Producers are owned by the caller and shared with the runtime behind an
/// `Arc`; one producer may back any number of tasks, each invocation
/// independent of the others.
#[async_trait]
pub trait Producer: Send + Sync {
    type Output: Send + 'static;

    /// Name used in events and records.
    fn name(&self) -> &str;

    async fn produce(&self, ctx: &TaskContext) -> Result<Self::Output, ProducerError>;
}

/// Suspends for a fixed delay, then returns a constant outcome.
#[derive(Debug, Clone)]
pub struct DelayProducer<T> {
    name: String,
    delay: Duration,
    outcome: Result<T, ProducerError>,
}

impl<T> DelayProducer<T> {
    /// Returns `value` after `delay`.
    pub fn new(name: impl Into<String>, delay: Duration, value: T) -> Self {
        Self {
            name: name.into(),
            delay,
            outcome: Ok(value),
        }
    }

    /// Fails with `reason` after `delay`.
    pub fn failing(name: impl Into<String>, delay: Duration, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            delay,
            outcome: Err(ProducerError::new(reason)),
        }
    }
}

#[async_trait]
impl<T> Producer for DelayProducer<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Output = T;

    fn name(&self) -> &str {
        &self.name
    }

    async fn produce(&self, ctx: &TaskContext) -> Result<T, ProducerError> {
        ctx.delay(self.delay).await;
        self.outcome.clone()
    }
}

/// Yields once between its start and its end, producing nothing.
#[derive(Debug, Clone)]
pub struct YieldProducer {
    name: String,
}

impl YieldProducer {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Producer for YieldProducer {
    type Output = ();

    fn name(&self) -> &str {
        &self.name
    }

    async fn produce(&self, ctx: &TaskContext) -> Result<(), ProducerError> {
        ctx.yield_now().await;
        Ok(())
    }
}

/// Adapts an async closure into a producer.
pub struct FnProducer<F> {
    name: String,
    f: F,
}

/// Build a producer from a closure receiving the task context.
pub fn from_fn<F, Fut, T>(name: impl Into<String>, f: F) -> FnProducer<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, ProducerError>> + Send + 'static,
    T: Send + 'static,
{
    FnProducer {
        name: name.into(),
        f,
    }
}

#[async_trait]
impl<F, Fut, T> Producer for FnProducer<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, ProducerError>> + Send + 'static,
    T: Send + 'static,
{
    type Output = T;

    fn name(&self) -> &str {
        &self.name
    }

    async fn produce(&self, ctx: &TaskContext) -> Result<T, ProducerError> {
        (self.f)(ctx.clone()).await
    }
}
