//! Concurrency disciplines a runner can apply to its producers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::CoreError;

/// How a pair of producers is scheduled and combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// One after the other; the second never starts if the first fails.
    Sequential,
    /// Both at once; wait for both terminal states, then merge their slots.
    ConcurrentJoin,
    /// Both at once; await each handle in order, failing at the first error.
    ConcurrentCombine,
}

impl RunMode {
    pub const ALL: [RunMode; 3] = [
        RunMode::Sequential,
        RunMode::ConcurrentJoin,
        RunMode::ConcurrentCombine,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::ConcurrentJoin => "concurrent_join",
            Self::ConcurrentCombine => "concurrent_combine",
        }
    }

    /// Returns true if both producers are started before either is awaited.
    pub fn is_concurrent(&self) -> bool {
        !matches!(self, Self::Sequential)
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| CoreError::UnknownRunMode(s.to_string()))
    }
}
