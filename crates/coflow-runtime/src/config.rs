//! Runner configuration.

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::runtime::{Builder, Runtime};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Worker pool needs at least one thread")]
    NoWorkers,

    #[error("Thread name prefix must not be empty")]
    EmptyThreadPrefix,

    #[error("Event buffer must hold at least one event")]
    EmptyEventBuffer,

    #[error("Failed to build worker pool: {0}")]
    Runtime(#[from] std::io::Error),
}

/// Runner configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Number of worker threads multiplexing all tasks.
    pub worker_threads: usize,

    /// Worker threads are named `{prefix}-{n}`.
    pub thread_name_prefix: String,

    /// Capacity of bounded event channels handed to sinks.
    pub event_buffer: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            worker_threads: 2,
            thread_name_prefix: "coflow-worker".to_string(),
            event_buffer: 256,
        }
    }
}

impl RunnerConfig {
    /// Check the configuration before building anything from it.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_threads == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if self.thread_name_prefix.trim().is_empty() {
            return Err(ConfigError::EmptyThreadPrefix);
        }
        if self.event_buffer == 0 {
            return Err(ConfigError::EmptyEventBuffer);
        }
        Ok(())
    }

    /// Build the worker pool tasks are multiplexed on.
    pub fn build_runtime(&self) -> Result<Runtime, ConfigError> {
        self.validate()?;

        let prefix = self.thread_name_prefix.clone();
        let counter = AtomicUsize::new(0);

        let runtime = Builder::new_multi_thread()
            .worker_threads(self.worker_threads)
            .thread_name_fn(move || {
                let n = counter.fetch_add(1, Ordering::Relaxed);
                format!("{prefix}-{n}")
            })
            .enable_all()
            .build()?;

        Ok(runtime)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coflow_core::WorkerIdentity;

    #[test]
    fn test_default_is_valid() {
        let config = RunnerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.worker_threads, 2);
    }

    #[test]
    fn test_rejects_zero_workers() {
        let config = RunnerConfig {
            worker_threads: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::NoWorkers)));
        assert!(config.build_runtime().is_err());
    }

    #[test]
    fn test_rejects_blank_prefix() {
        let config = RunnerConfig {
            thread_name_prefix: "  ".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EmptyThreadPrefix)
        ));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: RunnerConfig = serde_json::from_str(r#"{"worker_threads": 4}"#).unwrap();
        assert_eq!(config.worker_threads, 4);
        assert_eq!(config.thread_name_prefix, "coflow-worker");
        assert_eq!(config.event_buffer, 256);
    }

    #[test]
    fn test_worker_threads_are_named() {
        let config = RunnerConfig {
            worker_threads: 1,
            thread_name_prefix: "lesson".to_string(),
            ..Default::default()
        };
        let runtime = config.build_runtime().unwrap();

        let identity = runtime
            .block_on(async { tokio::spawn(async { WorkerIdentity::current() }).await })
            .unwrap();

        assert!(identity.has_prefix("lesson-"), "got {identity}");
    }
}
