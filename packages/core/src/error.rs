//! Error types shared across the pipeline.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::job::{JobId, JobStatus};

/// Errors returned by queue operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("QueueClosed: queue no longer accepts jobs")]
    Closed,

    #[error("QueueFull: queue is at capacity ({capacity})")]
    Full { capacity: usize },
}

/// Errors returned to producers by the submission interface.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("InvalidJobSpec: {reason}")]
    InvalidJobSpec { reason: String },

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Errors produced by a transcoder backend for a single job.
///
/// None of these are retried by the transcoder; retry policy belongs to the
/// worker (see [`TranscodeError::is_retryable`]).
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TranscodeError {
    #[error("source not found: {locator}")]
    SourceNotFound { locator: String },

    #[error("target not writable: {locator}: {reason}")]
    TargetUnwritable { locator: String, reason: String },

    #[error("process failed with {}: {stderr}", exit_label(.exit_code))]
    ProcessFailure {
        exit_code: Option<i32>,
        #[serde(default)]
        stderr: String,
    },

    #[error("timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("failed to launch {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl TranscodeError {
    /// Shorthand for a process failure with an exit code and no stderr.
    pub fn exit(code: i32) -> Self {
        TranscodeError::ProcessFailure {
            exit_code: Some(code),
            stderr: String::new(),
        }
    }

    /// Whether a fresh attempt of the same job could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TranscodeError::ProcessFailure { .. } | TranscodeError::Timeout { .. }
        )
    }

    /// Whether this error points at a broken pipeline rather than a bad job.
    pub fn is_fault(&self) -> bool {
        matches!(
            self,
            TranscodeError::Spawn { .. } | TranscodeError::Internal { .. }
        )
    }

    /// Stable snake_case name of the variant, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            TranscodeError::SourceNotFound { .. } => "source_not_found",
            TranscodeError::TargetUnwritable { .. } => "target_unwritable",
            TranscodeError::ProcessFailure { .. } => "process_failure",
            TranscodeError::Timeout { .. } => "timeout",
            TranscodeError::Spawn { .. } => "spawn",
            TranscodeError::Internal { .. } => "internal",
        }
    }
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "signal".to_string(),
    }
}

/// Rejected job status transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("job {job_id}: illegal status transition {from} -> {to}")]
pub struct TransitionError {
    pub job_id: JobId,
    pub from: JobStatus,
    pub to: JobStatus,
}

/// Invalid configuration value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid config {key}: {reason}")]
    Invalid { key: String, reason: String },
}

impl ConfigError {
    pub fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            key: key.into(),
            reason: reason.into(),
        }
    }
}
