//! Job domain types for transcoding work items.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{TranscodeError, TransitionError};

/// Next identifier handed out by [`JobId::next`].
static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a job, assigned monotonically at creation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct JobId(u64);

impl JobId {
    /// Allocate the next job ID for this process.
    pub fn next() -> Self {
        Self(NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Parse a job ID from a string.
    pub fn parse(s: &str) -> Result<Self, std::num::ParseIntError> {
        Ok(Self(s.trim_start_matches("job-").parse()?))
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// Current status of a job in its lifecycle.
///
/// The only legal path is `Pending -> Running -> {Succeeded, Failed}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job is waiting in the queue.
    #[default]
    Pending,
    /// Job has been dequeued and is being transcoded.
    Running,
    /// Transcode finished successfully.
    Succeeded,
    /// Transcode failed; see [`JobRecord::last_error`].
    Failed,
}

impl JobStatus {
    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }

    /// Check whether moving to `next` is a legal transition.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Running, JobStatus::Succeeded)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }

    /// Get a simple status string for display.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single unit of transcoding work.
///
/// A record is moved by value from the producer into the queue and from the
/// queue into exactly one worker; it is never shared while mutable.
/// Records are only ever built by [`JobRecord::new`], so they serialize but
/// do not deserialize.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRecord {
    id: JobId,
    /// Locator (path or URI) of the input.
    pub source: String,
    /// Locator (path or URI) of the output.
    pub target: String,
    status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_error: Option<TranscodeError>,
    /// Number of transcode attempts made so far.
    #[serde(default)]
    pub attempts: u32,
    /// Worker that dequeued this job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// When the job moved to running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Create a new pending job with a freshly allocated ID.
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: JobId::next(),
            source: source.into(),
            target: target.into(),
            status: JobStatus::Pending,
            last_error: None,
            attempts: 0,
            worker_id: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Error from the final attempt; only present when the job failed.
    pub fn last_error(&self) -> Option<&TranscodeError> {
        self.last_error.as_ref()
    }

    /// Mark the job as picked up by `worker_id`.
    pub fn start(&mut self, worker_id: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(JobStatus::Running)?;
        self.worker_id = Some(worker_id.into());
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Mark the job as successfully transcoded.
    pub fn succeed(&mut self) -> Result<(), TransitionError> {
        self.transition(JobStatus::Succeeded)?;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Mark the job as failed with the error of its last attempt.
    pub fn fail(&mut self, error: TranscodeError) -> Result<(), TransitionError> {
        self.transition(JobStatus::Failed)?;
        self.last_error = Some(error);
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Wall-clock time between start and finish, if both are known.
    pub fn duration_ms(&self) -> Option<u64> {
        let started = self.started_at?;
        let finished = self.finished_at?;
        u64::try_from((finished - started).num_milliseconds()).ok()
    }

    fn transition(&mut self, next: JobStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                job_id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}
