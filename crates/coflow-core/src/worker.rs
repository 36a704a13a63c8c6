//! Worker identity used to tag task events.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::thread;

/// Logical name of the execution thread a transition happened on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerIdentity(String);

impl WorkerIdentity {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Identity of the calling thread: its name, or its id for unnamed threads.
    pub fn current() -> Self {
        let current = thread::current();
        match current.name() {
            Some(name) => Self(name.to_string()),
            None => Self(format!("{:?}", current.id())),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the identity carries the given thread-name prefix.
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }
}

impl fmt::Display for WorkerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
