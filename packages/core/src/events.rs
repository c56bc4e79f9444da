//! Event types for observing the pipeline.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{JobId, JobRecord, WorkerState};

/// Events emitted by the job pipeline.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    // Job events
    /// A job was accepted by the queue.
    JobSubmitted {
        job_id: JobId,
        source: String,
        target: String,
        timestamp: DateTime<Utc>,
    },
    /// A worker began an attempt at a job.
    JobStarted {
        job_id: JobId,
        worker_id: String,
        attempt: u32,
        timestamp: DateTime<Utc>,
    },
    /// An attempt failed and will be retried.
    JobRetrying {
        job_id: JobId,
        worker_id: String,
        attempt: u32,
        error: String,
        timestamp: DateTime<Utc>,
    },
    /// A job reached Succeeded or Failed.
    JobFinished {
        job: JobRecord,
        timestamp: DateTime<Utc>,
    },

    // Worker events
    /// A worker's loop changed state.
    WorkerStateChanged {
        worker_id: String,
        state: WorkerState,
        timestamp: DateTime<Utc>,
    },

    // Queue events
    /// The queue stopped accepting jobs.
    QueueClosed {
        pending: usize,
        timestamp: DateTime<Utc>,
    },
}

impl JobEvent {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            JobEvent::JobSubmitted { timestamp, .. } => *timestamp,
            JobEvent::JobStarted { timestamp, .. } => *timestamp,
            JobEvent::JobRetrying { timestamp, .. } => *timestamp,
            JobEvent::JobFinished { timestamp, .. } => *timestamp,
            JobEvent::WorkerStateChanged { timestamp, .. } => *timestamp,
            JobEvent::QueueClosed { timestamp, .. } => *timestamp,
        }
    }

    /// Get the job ID associated with this event, if any.
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            JobEvent::JobSubmitted { job_id, .. } => Some(*job_id),
            JobEvent::JobStarted { job_id, .. } => Some(*job_id),
            JobEvent::JobRetrying { job_id, .. } => Some(*job_id),
            JobEvent::JobFinished { job, .. } => Some(job.id()),
            _ => None,
        }
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        match self {
            JobEvent::JobSubmitted {
                job_id,
                source,
                target,
                ..
            } => format!("Job {} submitted: {} -> {}", job_id, source, target),
            JobEvent::JobStarted {
                job_id,
                worker_id,
                attempt,
                ..
            } => format!("Job {} started by {} (attempt {})", job_id, worker_id, attempt),
            JobEvent::JobRetrying {
                job_id,
                attempt,
                error,
                ..
            } => format!("Job {} retrying (attempt {}): {}", job_id, attempt, error),
            JobEvent::JobFinished { job, .. } => match job.last_error() {
                Some(error) => format!("Job {} failed: {}", job.id(), error),
                None => format!("Job {} {}", job.id(), job.status()),
            },
            JobEvent::WorkerStateChanged {
                worker_id, state, ..
            } => format!("Worker {} -> {}", worker_id, state),
            JobEvent::QueueClosed { pending, .. } => {
                format!("Queue closed with {} pending", pending)
            }
        }
    }
}
