//! Job submission.

use actors::JobQueue;
use chrono::Utc;
use job_core::{JobEvent, JobId, JobRecord, SubmitError};
use tokio::sync::broadcast;

/// Producer-side handle that validates and enqueues jobs.
///
/// Cheap to clone; every clone feeds the same queue.
#[derive(Debug, Clone)]
pub struct JobSubmitter {
    queue: JobQueue,
    event_tx: broadcast::Sender<JobEvent>,
}

impl JobSubmitter {
    pub fn new(queue: JobQueue, event_tx: broadcast::Sender<JobEvent>) -> Self {
        Self { queue, event_tx }
    }

    /// Enqueue a new job, waiting for room if the queue is bounded and full.
    pub async fn submit(
        &self,
        source: impl Into<String>,
        target: impl Into<String>,
    ) -> Result<JobId, SubmitError> {
        let job = build_job(source.into(), target.into())?;
        let (job_id, event) = submitted_event(&job);
        self.queue.enqueue(job).await?;
        self.announce(job_id, event);
        Ok(job_id)
    }

    /// Enqueue a new job without ever waiting.
    pub fn try_submit(
        &self,
        source: impl Into<String>,
        target: impl Into<String>,
    ) -> Result<JobId, SubmitError> {
        let job = build_job(source.into(), target.into())?;
        let (job_id, event) = submitted_event(&job);
        self.queue.try_enqueue(job)?;
        self.announce(job_id, event);
        Ok(job_id)
    }

    fn announce(&self, job_id: JobId, event: JobEvent) {
        tracing::debug!(job_id = %job_id, "{}", event.description());
        let _ = self.event_tx.send(event);
    }
}

fn build_job(source: String, target: String) -> Result<JobRecord, SubmitError> {
    let source = source.trim();
    let target = target.trim();
    if source.is_empty() {
        return Err(SubmitError::InvalidJobSpec {
            reason: "source must not be empty".into(),
        });
    }
    if target.is_empty() {
        return Err(SubmitError::InvalidJobSpec {
            reason: "target must not be empty".into(),
        });
    }
    Ok(JobRecord::new(source, target))
}

// Built before the record moves into the queue, where a worker may take it at once.
fn submitted_event(job: &JobRecord) -> (JobId, JobEvent) {
    let event = JobEvent::JobSubmitted {
        job_id: job.id(),
        source: job.source.clone(),
        target: job.target.clone(),
        timestamp: Utc::now(),
    };
    (job.id(), event)
}
