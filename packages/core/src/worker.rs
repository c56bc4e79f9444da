//! Worker lifecycle types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// State of a worker's control loop.
///
/// `Idle -> Fetching -> Executing -> Idle` per job, and
/// `Fetching -> ShuttingDown -> Stopped` once the queue is drained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    #[default]
    Idle,
    Fetching,
    Executing,
    ShuttingDown,
    Stopped,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Idle => "idle",
            WorkerState::Fetching => "fetching",
            WorkerState::Executing => "executing",
            WorkerState::ShuttingDown => "shutting_down",
            WorkerState::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tuning knobs for a worker's failure handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Extra attempts for retryable transcode errors.
    pub max_retries: u32,
    /// Delay before retry `n` is `retry_backoff * n`.
    pub retry_backoff: Duration,
    /// Stop the worker after this many faults in a row; `None` never stops.
    pub max_consecutive_faults: Option<u32>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            retry_backoff: Duration::from_secs(1),
            max_consecutive_faults: Some(5),
        }
    }
}

impl WorkerConfig {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_backoff(mut self, retry_backoff: Duration) -> Self {
        self.retry_backoff = retry_backoff;
        self
    }

    pub fn with_max_consecutive_faults(mut self, limit: Option<u32>) -> Self {
        self.max_consecutive_faults = limit;
        self
    }
}

/// Why a worker stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "exit", rename_all = "snake_case")]
pub enum WorkerExit {
    /// The queue was closed and fully drained.
    Drained,
    /// Too many consecutive faults; the pipeline looks unusable.
    Faulted {
        consecutive_faults: u32,
        last_error: String,
    },
    /// The hosting actor died without reporting.
    Crashed { reason: String },
}

impl WorkerExit {
    pub fn is_graceful(&self) -> bool {
        matches!(self, WorkerExit::Drained)
    }
}

impl std::fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerExit::Drained => write!(f, "drained"),
            WorkerExit::Faulted {
                consecutive_faults,
                last_error,
            } => write!(
                f,
                "faulted after {} consecutive faults: {}",
                consecutive_faults, last_error
            ),
            WorkerExit::Crashed { reason } => write!(f, "crashed: {}", reason),
        }
    }
}

/// Summary a worker hands to its owner when it stops.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerReport {
    pub worker_id: String,
    pub exit: WorkerExit,
    /// Jobs that reached a terminal status.
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
}

impl WorkerReport {
    /// Report for a worker that never got to account for its jobs.
    pub fn crashed(worker_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            exit: WorkerExit::Crashed {
                reason: reason.into(),
            },
            processed: 0,
            succeeded: 0,
            failed: 0,
        }
    }
}

/// Combined reports of every worker in a pool, in spawn order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolReport {
    pub workers: Vec<WorkerReport>,
}

impl PoolReport {
    /// Every worker stopped because the queue drained.
    pub fn is_clean(&self) -> bool {
        self.workers.iter().all(|w| w.exit.is_graceful())
    }

    pub fn processed(&self) -> u64 {
        self.workers.iter().map(|w| w.processed).sum()
    }

    pub fn succeeded(&self) -> u64 {
        self.workers.iter().map(|w| w.succeeded).sum()
    }

    pub fn failed(&self) -> u64 {
        self.workers.iter().map(|w| w.failed).sum()
    }
}
