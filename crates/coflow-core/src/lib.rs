//! coflow Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - An async runtime
//! - Any logging backend
//! - Presentation concerns
//!
//! All types here describe tasks, their lifecycle, the events they emit,
//! and the ways a combination of tasks can fail.

pub mod error;
pub mod event;
pub mod ids;
pub mod model;
pub mod status;
pub mod task;
pub mod worker;

// Re-export commonly used types
pub use error::{CancelledError, CombineError, CoreError, ProducerError, TaskError};
pub use event::{TaskEvent, TaskEventKind};
pub use ids::{ScopeId, TaskId};
pub use model::RunMode;
pub use status::{ScopeStatus, TaskState};
pub use task::TaskRecord;
pub use worker::WorkerIdentity;

/// Joint outcome of two or more tasks: every value, or the first failure.
pub type CombinedResult<T> = Result<T, CombineError>;
