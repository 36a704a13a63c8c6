//! Task runner: schedules producers under one of three concurrency disciplines.

use std::sync::Arc;

use coflow_core::{CancelledError, CombineError, CombinedResult, RunMode, TaskError};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::producer::Producer;
use crate::scope::{Scope, TaskHandle};

/// Runs producers in a caller-owned [`Scope`] and combines their values.
#[derive(Debug, Clone)]
pub struct TaskRunner {
    scope: Scope,
}

impl TaskRunner {
    /// Create a runner bound to `scope`; every task it starts belongs to it.
    pub fn new(scope: Scope) -> Self {
        Self { scope }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Run a pair of producers with the given discipline.
    pub async fn run<P1, P2>(
        &self,
        mode: RunMode,
        p1: Arc<P1>,
        p2: Arc<P2>,
    ) -> CombinedResult<(P1::Output, P2::Output)>
    where
        P1: Producer + ?Sized + 'static,
        P2: Producer + ?Sized + 'static,
    {
        let started = Instant::now();
        debug!(mode = %mode, first = p1.name(), second = p2.name(), "Running producers");

        let result = match mode {
            RunMode::Sequential => self.run_sequential(p1, p2).await,
            RunMode::ConcurrentJoin => self.run_concurrent_join(p1, p2).await,
            RunMode::ConcurrentCombine => self.run_concurrent_combine(p1, p2).await,
        };

        info!(
            mode = %mode,
            elapsed_ms = started.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "Run finished"
        );
        result
    }

    /// Run `p1` to completion, then `p2`. `p2` never starts if `p1` fails.
    pub async fn run_sequential<P1, P2>(
        &self,
        p1: Arc<P1>,
        p2: Arc<P2>,
    ) -> CombinedResult<(P1::Output, P2::Output)>
    where
        P1: Producer + ?Sized + 'static,
        P2: Producer + ?Sized + 'static,
    {
        let first = self
            .scope
            .spawn(p1)
            .value()
            .await
            .map_err(|e| CombineError::new(0, e))?;
        let second = self
            .scope
            .spawn(p2)
            .value()
            .await
            .map_err(|e| CombineError::new(1, e))?;
        Ok((first, second))
    }

    /// Start both, wait for both to terminate, then merge their result slots.
    ///
    /// A failing task never cuts the wait for its sibling short; the first
    /// failure in producer order is reported.
    pub async fn run_concurrent_join<P1, P2>(
        &self,
        p1: Arc<P1>,
        p2: Arc<P2>,
    ) -> CombinedResult<(P1::Output, P2::Output)>
    where
        P1: Producer + ?Sized + 'static,
        P2: Producer + ?Sized + 'static,
    {
        let mut first = self.scope.spawn(p1);
        let mut second = self.scope.spawn(p2);

        first.join().await;
        second.join().await;

        match (joined_outcome(&mut first), joined_outcome(&mut second)) {
            (Ok(a), Ok(b)) => Ok((a, b)),
            (Err(e), _) => Err(CombineError::new(0, e)),
            (_, Err(e)) => Err(CombineError::new(1, e)),
        }
    }

    /// Start both, then await each handle in order.
    ///
    /// Fails as soon as the first awaited handle that failed is reached; the
    /// sibling is neither awaited nor cancelled.
    pub async fn run_concurrent_combine<P1, P2>(
        &self,
        p1: Arc<P1>,
        p2: Arc<P2>,
    ) -> CombinedResult<(P1::Output, P2::Output)>
    where
        P1: Producer + ?Sized + 'static,
        P2: Producer + ?Sized + 'static,
    {
        let first = self.scope.spawn(p1);
        let second = self.scope.spawn(p2);

        let a = first.value().await.map_err(|e| CombineError::new(0, e))?;
        let b = second.value().await.map_err(|e| CombineError::new(1, e))?;
        Ok((a, b))
    }

    /// List form of [`run_concurrent_combine`](Self::run_concurrent_combine).
    pub async fn run_concurrent_all<P>(&self, producers: Vec<Arc<P>>) -> CombinedResult<Vec<P::Output>>
    where
        P: Producer + ?Sized + 'static,
    {
        let handles: Vec<TaskHandle<P::Output>> = producers
            .into_iter()
            .map(|p| self.scope.spawn(p))
            .collect();

        let mut values = Vec::with_capacity(handles.len());
        for (index, handle) in handles.into_iter().enumerate() {
            values.push(handle.value().await.map_err(|e| CombineError::new(index, e))?);
        }
        Ok(values)
    }
}

fn joined_outcome<T>(handle: &mut TaskHandle<T>) -> Result<T, TaskError> {
    handle
        .take()
        .unwrap_or_else(|| Err(CancelledError::new(handle.id().clone()).into()))
}
