//! The worker control loop.
//!
//! A [`Worker`] repeatedly takes a job from the [`JobQueue`], drives the
//! [`Transcoder`] on it, records the outcome on the job and hands the
//! finished record to its [`CompletionObserver`]. A single bad job never
//! stops the loop; only a closed-and-drained queue or a run of faults does.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::FutureExt;
use job_core::{
    JobEvent, JobRecord, JobStatus, TranscodeError, WorkerConfig, WorkerExit, WorkerReport,
    WorkerState,
};
use tokio::sync::{broadcast, watch};

use crate::observer::CompletionObserver;
use crate::queue::JobQueue;
use crate::transcoder::{TranscodeResult, Transcoder};

/// Outcome of one loop iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// A job was handled; call `step` again.
    Continue,
    /// The worker is shutting down for the given reason.
    Exit(WorkerExit),
}

/// One worker's loop state and collaborators.
pub struct Worker {
    worker_id: String,
    queue: JobQueue,
    transcoder: Arc<dyn Transcoder>,
    observer: Arc<dyn CompletionObserver>,
    config: WorkerConfig,
    event_tx: Option<broadcast::Sender<JobEvent>>,
    state_tx: watch::Sender<WorkerState>,
    processed: u64,
    succeeded: u64,
    failed: u64,
    consecutive_faults: u32,
    last_fault: Option<String>,
}

impl Worker {
    pub fn new(
        worker_id: impl Into<String>,
        queue: JobQueue,
        transcoder: Arc<dyn Transcoder>,
        observer: Arc<dyn CompletionObserver>,
    ) -> Self {
        let (state_tx, _) = watch::channel(WorkerState::Idle);
        Self {
            worker_id: worker_id.into(),
            queue,
            transcoder,
            observer,
            config: WorkerConfig::default(),
            event_tx: None,
            state_tx,
            processed: 0,
            succeeded: 0,
            failed: 0,
            consecutive_faults: 0,
            last_fault: None,
        }
    }

    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the event broadcaster.
    pub fn with_event_tx(mut self, tx: broadcast::Sender<JobEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn state(&self) -> WorkerState {
        *self.state_tx.borrow()
    }

    /// Watch state changes from another task.
    pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.state_tx.subscribe()
    }

    /// Run until the queue is drained or the fault limit is reached.
    pub async fn run(mut self) -> WorkerReport {
        tracing::info!(worker_id = %self.worker_id, transcoder = self.transcoder.name(), "Worker started");
        let exit = loop {
            if let Step::Exit(exit) = self.step().await {
                break exit;
            }
        };
        self.finish(exit)
    }

    /// Fetch and handle at most one job.
    ///
    /// Blocks while the queue is open and empty.
    pub async fn step(&mut self) -> Step {
        self.set_state(WorkerState::Fetching);
        let Some(mut job) = self.queue.dequeue().await else {
            self.set_state(WorkerState::ShuttingDown);
            return Step::Exit(WorkerExit::Drained);
        };

        self.set_state(WorkerState::Executing);
        let fault = match job.start(self.worker_id.as_str()) {
            Ok(()) => self.execute(&mut job).await,
            Err(e) => {
                // Only pending records can be run; this one is left as is.
                tracing::error!(worker_id = %self.worker_id, job_id = %job.id(), error = %e, "Dequeued a job that cannot start");
                Some(e.to_string())
            }
        };
        self.set_state(WorkerState::Idle);

        match fault {
            Some(reason) => self.record_fault(reason),
            None => {
                self.consecutive_faults = 0;
                Step::Continue
            }
        }
    }

    /// Mark the worker stopped and summarize its run.
    pub fn finish(&mut self, exit: WorkerExit) -> WorkerReport {
        self.set_state(WorkerState::Stopped);
        if exit.is_graceful() {
            tracing::info!(worker_id = %self.worker_id, processed = self.processed, "Worker stopped: {}", exit);
        } else {
            tracing::error!(worker_id = %self.worker_id, processed = self.processed, "Worker stopped: {}", exit);
        }
        WorkerReport {
            worker_id: self.worker_id.clone(),
            exit,
            processed: self.processed,
            succeeded: self.succeeded,
            failed: self.failed,
        }
    }

    /// Transcode a running job to completion and notify the observer.
    /// Returns the fault description if this job counts as one.
    async fn execute(&mut self, job: &mut JobRecord) -> Option<String> {
        let outcome = self.transcode_with_retries(job).await;
        let mut fault = outcome
            .as_ref()
            .err()
            .filter(|e| e.is_fault())
            .map(|e| e.to_string());

        let recorded = match outcome {
            Ok(()) => job.succeed(),
            Err(error) => job.fail(error),
        };
        if let Err(e) = recorded {
            tracing::error!(worker_id = %self.worker_id, job_id = %job.id(), error = %e, "Failed to record job outcome");
            return Some(e.to_string());
        }

        self.processed += 1;
        match job.status() {
            JobStatus::Succeeded => self.succeeded += 1,
            _ => self.failed += 1,
        }

        let observer = &self.observer;
        let job_ref = &*job;
        if let Err(panic) =
            std::panic::catch_unwind(AssertUnwindSafe(|| observer.on_job_complete(job_ref)))
        {
            let reason = format!("completion observer panicked: {}", panic_message(&*panic));
            tracing::error!(worker_id = %self.worker_id, job_id = %job.id(), "{}", reason);
            fault = Some(reason);
        }

        fault
    }

    async fn transcode_with_retries(&self, job: &mut JobRecord) -> TranscodeResult {
        loop {
            job.attempts += 1;
            let attempt = job.attempts;
            tracing::debug!(worker_id = %self.worker_id, job_id = %job.id(), attempt, "Transcoding {} -> {}", job.source, job.target);
            self.emit(JobEvent::JobStarted {
                job_id: job.id(),
                worker_id: self.worker_id.clone(),
                attempt,
                timestamp: Utc::now(),
            });

            match self.attempt(job).await {
                Err(error) if error.is_retryable() && attempt <= self.config.max_retries => {
                    let delay = backoff_delay(self.config.retry_backoff, attempt);
                    tracing::warn!(
                        worker_id = %self.worker_id,
                        job_id = %job.id(),
                        attempt,
                        error = %error,
                        ?delay,
                        "Transcode failed, retrying"
                    );
                    self.emit(JobEvent::JobRetrying {
                        job_id: job.id(),
                        worker_id: self.worker_id.clone(),
                        attempt,
                        error: error.to_string(),
                        timestamp: Utc::now(),
                    });
                    tokio::time::sleep(delay).await;
                }
                result => return result,
            }
        }
    }

    async fn attempt(&self, job: &JobRecord) -> TranscodeResult {
        let transcode = self.transcoder.transcode(&job.source, &job.target);
        match AssertUnwindSafe(transcode).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let reason = format!(
                    "transcoder {} panicked: {}",
                    self.transcoder.name(),
                    panic_message(&*panic)
                );
                tracing::error!(worker_id = %self.worker_id, job_id = %job.id(), "{}", reason);
                Err(TranscodeError::Internal { reason })
            }
        }
    }

    fn record_fault(&mut self, reason: String) -> Step {
        self.consecutive_faults += 1;
        tracing::error!(
            worker_id = %self.worker_id,
            consecutive_faults = self.consecutive_faults,
            error = %reason,
            "Worker fault"
        );

        let limit_reached = self
            .config
            .max_consecutive_faults
            .is_some_and(|limit| self.consecutive_faults >= limit);
        self.last_fault = Some(reason);
        if !limit_reached {
            return Step::Continue;
        }

        self.set_state(WorkerState::ShuttingDown);
        Step::Exit(WorkerExit::Faulted {
            consecutive_faults: self.consecutive_faults,
            last_error: self.last_fault.clone().unwrap_or_default(),
        })
    }

    fn set_state(&self, state: WorkerState) {
        let previous = self.state_tx.send_replace(state);
        if previous == state {
            return;
        }
        tracing::trace!(worker_id = %self.worker_id, from = %previous, to = %state, "Worker state changed");
        self.emit(JobEvent::WorkerStateChanged {
            worker_id: self.worker_id.clone(),
            state,
            timestamp: Utc::now(),
        });
    }

    fn emit(&self, event: JobEvent) {
        if let Some(ref tx) = self.event_tx {
            let _ = tx.send(event);
        }
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("worker_id", &self.worker_id)
            .field("state", &self.state())
            .field("transcoder", &self.transcoder.name())
            .field("processed", &self.processed)
            .finish()
    }
}

/// Linear backoff, saturating instead of overflowing on huge settings.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(attempt)
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use parking_lot::Mutex;

    use super::*;
    use crate::observer::FnObserver;
    use crate::transcoder::{FnTranscoder, NoopTranscoder, TranscodeFuture};

    type Finished = Arc<Mutex<Vec<JobRecord>>>;

    fn recording_observer() -> (Arc<dyn CompletionObserver>, Finished) {
        let finished: Finished = Arc::new(Mutex::new(Vec::new()));
        let sink = finished.clone();
        let observer = FnObserver::new(move |job: &JobRecord| sink.lock().push(job.clone()));
        (Arc::new(observer), finished)
    }

    fn closed_queue(jobs: &[(&str, &str)]) -> JobQueue {
        let queue = JobQueue::unbounded();
        for (source, target) in jobs {
            queue.try_enqueue(JobRecord::new(*source, *target)).unwrap();
        }
        queue.close();
        queue
    }

    struct PanickingTranscoder;

    impl Transcoder for PanickingTranscoder {
        fn name(&self) -> &str {
            "panicky"
        }

        fn transcode<'a>(&'a self, source: &'a str, _target: &'a str) -> TranscodeFuture<'a> {
            Box::pin(async move {
                if source.contains("boom") {
                    panic!("decoder exploded");
                }
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn drains_two_jobs_in_order() {
        let queue = closed_queue(&[("A", "A'"), ("B", "B'")]);
        let (observer, finished) = recording_observer();
        let worker = Worker::new("worker-1", queue.clone(), Arc::new(NoopTranscoder), observer);
        let mut states = worker.subscribe();

        let report = worker.run().await;

        let finished = finished.lock();
        assert_eq!(finished.len(), 2);
        assert_eq!(finished[0].source, "A");
        assert_eq!(finished[1].source, "B");
        assert!(finished.iter().all(|j| j.status() == JobStatus::Succeeded));
        assert!(finished.iter().all(|j| j.worker_id.as_deref() == Some("worker-1")));

        assert_eq!(report.exit, WorkerExit::Drained);
        assert_eq!((report.processed, report.succeeded, report.failed), (2, 2, 0));
        assert_eq!(*states.borrow_and_update(), WorkerState::Stopped);
        assert!(queue.stats().is_drained());
    }

    #[tokio::test]
    async fn process_failure_is_recorded_and_loop_continues() {
        let queue = closed_queue(&[("in.mkv", "out.mp4")]);
        let (observer, finished) = recording_observer();
        let transcoder = Arc::new(crate::transcoder!("failing", |_source, _target| {
            Err(TranscodeError::exit(1))
        }));

        let report = Worker::new("worker-1", queue, transcoder, observer).run().await;

        let finished = finished.lock();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].status(), JobStatus::Failed);
        assert_eq!(finished[0].last_error(), Some(&TranscodeError::exit(1)));
        assert_eq!(report.exit, WorkerExit::Drained);
        assert_eq!(report.failed, 1);
    }

    #[tokio::test]
    async fn failing_jobs_do_not_stop_the_worker() {
        let queue = closed_queue(&[
            ("bad-1", "o1"),
            ("bad-2", "o2"),
            ("bad-3", "o3"),
            ("good", "o4"),
        ]);
        let (observer, finished) = recording_observer();
        let transcoder = Arc::new(crate::transcoder!("picky", |source, _target| {
            if source.starts_with("bad") {
                Err(TranscodeError::SourceNotFound { locator: source })
            } else {
                Ok(())
            }
        }));

        let report = Worker::new("worker-1", queue, transcoder, observer).run().await;

        let statuses: Vec<_> = finished.lock().iter().map(|j| j.status()).collect();
        assert_eq!(
            statuses,
            vec![
                JobStatus::Failed,
                JobStatus::Failed,
                JobStatus::Failed,
                JobStatus::Succeeded
            ]
        );
        assert_eq!(report.exit, WorkerExit::Drained);
    }

    #[tokio::test]
    async fn retryable_errors_are_retried() {
        let queue = closed_queue(&[("flaky.mkv", "out.mp4")]);
        let (observer, finished) = recording_observer();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let transcoder = Arc::new(FnTranscoder::new(
            "flaky",
            move |_source: String, _target: String| {
                let call = counter.fetch_add(1, Ordering::SeqCst);
                Box::pin(async move {
                    if call < 2 {
                        Err(TranscodeError::Timeout { after_ms: 10 })
                    } else {
                        Ok(())
                    }
                })
            },
        ));
        let (tx, mut rx) = broadcast::channel(64);

        let report = Worker::new("worker-1", queue, transcoder, observer)
            .with_config(
                WorkerConfig::default()
                    .with_max_retries(2)
                    .with_retry_backoff(Duration::from_millis(1)),
            )
            .with_event_tx(tx)
            .run()
            .await;

        let finished = finished.lock();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].status(), JobStatus::Succeeded);
        assert_eq!(finished[0].attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(report.succeeded, 1);

        let mut retries = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, JobEvent::JobRetrying { .. }) {
                retries += 1;
            }
        }
        assert_eq!(retries, 2);
    }

    #[test]
    fn backoff_grows_linearly_and_saturates() {
        let base = Duration::from_millis(250);
        assert_eq!(backoff_delay(base, 1), base);
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(750));
        assert_eq!(backoff_delay(Duration::MAX, 2), Duration::MAX);
        assert_eq!(
            backoff_delay(Duration::from_millis(u64::MAX), u32::MAX),
            Duration::MAX
        );
    }

    #[tokio::test]
    async fn non_retryable_errors_are_not_retried() {
        let queue = closed_queue(&[("missing.mkv", "out.mp4")]);
        let (observer, finished) = recording_observer();
        let transcoder = Arc::new(crate::transcoder!("missing", |source, _target| {
            Err(TranscodeError::SourceNotFound { locator: source })
        }));

        Worker::new("worker-1", queue, transcoder, observer)
            .with_config(WorkerConfig::default().with_max_retries(3))
            .run()
            .await;

        assert_eq!(finished.lock()[0].attempts, 1);
    }

    #[tokio::test]
    async fn consecutive_faults_stop_the_worker() {
        let queue = closed_queue(&[("a", "1"), ("b", "2"), ("c", "3"), ("d", "4")]);
        let (observer, finished) = recording_observer();
        let transcoder = Arc::new(crate::transcoder!("broken", |_source, _target| {
            Err(TranscodeError::Spawn {
                program: "ffmpeg".into(),
                reason: "not found".into(),
            })
        }));

        let report = Worker::new("worker-1", queue.clone(), transcoder, observer)
            .with_config(WorkerConfig::default().with_max_consecutive_faults(Some(2)))
            .run()
            .await;

        match report.exit {
            WorkerExit::Faulted {
                consecutive_faults, ..
            } => assert_eq!(consecutive_faults, 2),
            other => panic!("expected fault exit, got {:?}", other),
        }
        assert_eq!(finished.lock().len(), 2);
        assert_eq!(queue.size(), 2);
    }

    #[tokio::test]
    async fn successes_reset_the_fault_count() {
        let queue = closed_queue(&[("boom-1", "1"), ("ok", "2"), ("boom-2", "3")]);
        let (observer, finished) = recording_observer();

        let report = Worker::new("worker-1", queue, Arc::new(PanickingTranscoder), observer)
            .with_config(WorkerConfig::default().with_max_consecutive_faults(Some(2)))
            .run()
            .await;

        assert_eq!(report.exit, WorkerExit::Drained);
        let finished = finished.lock();
        assert_eq!(finished.len(), 3);
        assert!(matches!(
            finished[0].last_error(),
            Some(TranscodeError::Internal { .. })
        ));
        assert_eq!(finished[1].status(), JobStatus::Succeeded);
    }

    #[tokio::test]
    async fn panicking_observer_is_contained() {
        let queue = closed_queue(&[("a", "1"), ("b", "2")]);
        let observer = Arc::new(FnObserver::new(|job: &JobRecord| {
            if job.source == "a" {
                panic!("observer bug");
            }
        }));

        let report = Worker::new("worker-1", queue, Arc::new(NoopTranscoder), observer)
            .run()
            .await;

        assert_eq!(report.exit, WorkerExit::Drained);
        assert_eq!(report.processed, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn blocked_worker_wakes_on_enqueue() {
        let queue = JobQueue::unbounded();
        let (observer, finished) = recording_observer();
        let worker = Worker::new("worker-1", queue.clone(), Arc::new(NoopTranscoder), observer);
        let mut states = worker.subscribe();
        let handle = tokio::spawn(worker.run());

        states
            .wait_for(|s| *s == WorkerState::Fetching)
            .await
            .unwrap();
        queue.enqueue(JobRecord::new("late.mkv", "late.mp4")).await.unwrap();
        queue.close();

        let report = handle.await.unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(finished.lock()[0].source, "late.mkv");
    }
}
