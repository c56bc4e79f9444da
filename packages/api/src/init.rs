//! Composition root for the transcoding pipeline.
//!
//! Builds exactly one queue, one transcoder and one event bus, and hands
//! them to workers and submitters by constructor argument. Nothing here is
//! global; two roots in one process are fully independent.

use std::sync::Arc;

use actors::{
    CompletionObserver, EventObserver, JobQueue, Observers, PoolArgs, PoolError,
    ProcessTranscoder, TracingObserver, Transcoder, WorkerPool,
};
use chrono::Utc;
use job_core::{ConfigError, JobEvent};
use tokio::sync::broadcast;

use crate::config::AppConfig;
use crate::jobs::JobSubmitter;

/// Errors raised while assembling or starting the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// Owns the shared collaborators and wires them together.
pub struct CompositionRoot {
    config: AppConfig,
    queue: JobQueue,
    transcoder: Arc<dyn Transcoder>,
    observers: Observers,
    event_tx: broadcast::Sender<JobEvent>,
}

impl CompositionRoot {
    /// Build the pipeline with a [`ProcessTranscoder`] from `config.process`.
    pub fn new(config: AppConfig) -> Result<Self, InitError> {
        let transcoder = Arc::new(ProcessTranscoder::new(config.process.clone()));
        Self::with_transcoder(config, transcoder)
    }

    /// Build the pipeline from `TRANSCODE_*` environment variables.
    pub fn from_env() -> Result<Self, InitError> {
        Self::new(AppConfig::from_env()?)
    }

    /// Build the pipeline around an injected transcoder.
    pub fn with_transcoder(
        config: AppConfig,
        transcoder: Arc<dyn Transcoder>,
    ) -> Result<Self, InitError> {
        let queue = JobQueue::new(config.queue.clone())?;
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));
        let observers = Observers::new()
            .with(Arc::new(TracingObserver))
            .with(Arc::new(EventObserver::new(event_tx.clone())));

        tracing::info!(
            workers = config.workers,
            capacity = ?config.queue.capacity,
            full_policy = %config.queue.full_policy,
            transcoder = transcoder.name(),
            "Transcoding pipeline assembled"
        );

        Ok(Self {
            config,
            queue,
            transcoder,
            observers,
            event_tx,
        })
    }

    /// Add a completion observer; affects pools started afterwards.
    pub fn with_observer(mut self, observer: Arc<dyn CompletionObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// Producer handle bound to this root's queue and event bus.
    pub fn submitter(&self) -> JobSubmitter {
        JobSubmitter::new(self.queue.clone(), self.event_tx.clone())
    }

    /// Receive every pipeline event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.event_tx.subscribe()
    }

    /// Start `config.workers` workers sharing this root's queue.
    pub async fn start_workers(&self) -> Result<WorkerPool, InitError> {
        let args = PoolArgs::new(
            self.config.workers,
            self.queue.clone(),
            self.transcoder.clone(),
            Arc::new(self.observers.clone()),
        )
        .with_config(self.config.worker.clone())
        .with_event_tx(self.event_tx.clone());

        Ok(WorkerPool::start(args).await?)
    }

    /// Stop accepting jobs; workers drain what is queued and then stop.
    pub fn close(&self) {
        if self.queue.is_closed() {
            return;
        }
        self.queue.close();
        let _ = self.event_tx.send(JobEvent::QueueClosed {
            pending: self.queue.size(),
            timestamp: Utc::now(),
        });
    }
}

impl std::fmt::Debug for CompositionRoot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositionRoot")
            .field("config", &self.config)
            .field("queue", &self.queue)
            .field("transcoder", &self.transcoder.name())
            .field("observers", &self.observers)
            .finish()
    }
}
