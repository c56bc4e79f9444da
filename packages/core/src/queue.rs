//! Queue configuration and statistics types.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// What a bounded queue does with an enqueue when it is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FullPolicy {
    /// Wait until a consumer makes room.
    #[default]
    Block,
    /// Fail immediately with `QueueFull`.
    Reject,
}

impl std::str::FromStr for FullPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "block" => Ok(FullPolicy::Block),
            "reject" => Ok(FullPolicy::Reject),
            other => Err(ConfigError::invalid(
                "full_policy",
                format!("unsupported value {other} (expected block|reject)"),
            )),
        }
    }
}

impl std::fmt::Display for FullPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FullPolicy::Block => write!(f, "block"),
            FullPolicy::Reject => write!(f, "reject"),
        }
    }
}

/// Configuration for queue behavior.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of queued jobs; `None` means unbounded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity: Option<usize>,
    /// Behavior of `enqueue` on a full bounded queue.
    pub full_policy: FullPolicy,
}

impl QueueConfig {
    /// An unbounded queue.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// A bounded queue with the given capacity and policy.
    pub fn bounded(capacity: usize, full_policy: FullPolicy) -> Self {
        Self {
            capacity: Some(capacity),
            full_policy,
        }
    }

    /// Reject configurations that can never hold a job.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == Some(0) {
            return Err(ConfigError::invalid(
                "capacity",
                "bounded queue capacity must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Point-in-time statistics for a queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueStats {
    /// Jobs currently waiting.
    pub depth: usize,
    /// Jobs accepted since creation.
    pub enqueued: u64,
    /// Jobs handed to consumers since creation.
    pub dequeued: u64,
    /// Enqueues refused because the queue was full or closed.
    pub rejected: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity: Option<usize>,
    pub closed: bool,
}

impl QueueStats {
    /// Closed with nothing left to hand out.
    pub fn is_drained(&self) -> bool {
        self.closed && self.depth == 0
    }
}
