//! Completion observers notified once per finished job.

use std::sync::Arc;

use chrono::Utc;
use job_core::{JobEvent, JobRecord, JobStatus};
use tokio::sync::broadcast;

/// Receives every job after it reaches Succeeded or Failed.
///
/// Called on the worker's task, so implementations should return quickly.
pub trait CompletionObserver: Send + Sync + 'static {
    fn on_job_complete(&self, job: &JobRecord);
}

/// Logs each finished job.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl CompletionObserver for TracingObserver {
    fn on_job_complete(&self, job: &JobRecord) {
        let worker_id = job.worker_id.as_deref().unwrap_or("-");
        match (job.status(), job.last_error()) {
            (JobStatus::Failed, Some(error)) => tracing::warn!(
                job_id = %job.id(),
                worker_id,
                attempts = job.attempts,
                error = %error,
                "Job failed: {} -> {}",
                job.source,
                job.target
            ),
            (status, _) => tracing::info!(
                job_id = %job.id(),
                worker_id,
                attempts = job.attempts,
                duration_ms = job.duration_ms(),
                "Job {}: {} -> {}",
                status,
                job.source,
                job.target
            ),
        }
    }
}

/// Publishes `JobFinished` on the event bus.
#[derive(Debug, Clone)]
pub struct EventObserver {
    event_tx: broadcast::Sender<JobEvent>,
}

impl EventObserver {
    pub fn new(event_tx: broadcast::Sender<JobEvent>) -> Self {
        Self { event_tx }
    }
}

impl CompletionObserver for EventObserver {
    fn on_job_complete(&self, job: &JobRecord) {
        // No subscribers is fine.
        let _ = self.event_tx.send(JobEvent::JobFinished {
            job: job.clone(),
            timestamp: Utc::now(),
        });
    }
}

/// Observer backed by a closure.
pub struct FnObserver<F>
where
    F: Fn(&JobRecord) + Send + Sync + 'static,
{
    f: F,
}

impl<F> FnObserver<F>
where
    F: Fn(&JobRecord) + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> CompletionObserver for FnObserver<F>
where
    F: Fn(&JobRecord) + Send + Sync + 'static,
{
    fn on_job_complete(&self, job: &JobRecord) {
        (self.f)(job)
    }
}

/// Fans a completion out to several observers, in registration order.
#[derive(Clone, Default)]
pub struct Observers {
    observers: Vec<Arc<dyn CompletionObserver>>,
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, observer: Arc<dyn CompletionObserver>) -> Self {
        self.push(observer);
        self
    }

    pub fn push(&mut self, observer: Arc<dyn CompletionObserver>) {
        self.observers.push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl CompletionObserver for Observers {
    fn on_job_complete(&self, job: &JobRecord) {
        for observer in &self.observers {
            observer.on_job_complete(job);
        }
    }
}

impl std::fmt::Debug for Observers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observers")
            .field("len", &self.observers.len())
            .finish()
    }
}
