//! In-memory FIFO queue shared by producers and workers.

use std::collections::VecDeque;
use std::sync::Arc;

use job_core::{ConfigError, FullPolicy, JobRecord, QueueConfig, QueueError, QueueStats};
use parking_lot::Mutex;
use tokio::sync::Notify;

/// Mutable queue contents, only touched under the lock.
#[derive(Default)]
struct QueueState {
    pending: VecDeque<JobRecord>,
    closed: bool,
    enqueued: u64,
    dequeued: u64,
    rejected: u64,
}

struct Shared {
    config: QueueConfig,
    state: Mutex<QueueState>,
    /// Wakes consumers when a job arrives or the queue closes.
    not_empty: Notify,
    /// Wakes producers blocked on a full bounded queue.
    not_full: Notify,
}

enum Push {
    Done,
    /// Bounded queue is full; the job is handed back so the caller can wait.
    Full(JobRecord),
}

enum Pop {
    Job(JobRecord),
    Empty,
    Drained,
}

/// Thread-safe FIFO of [`JobRecord`]s.
///
/// Cloning the handle is cheap; every clone refers to the same queue. The
/// lock is only held for the push/pop itself, never across an `.await`, so a
/// slow consumer never holds up producers or other consumers.
#[derive(Clone)]
pub struct JobQueue {
    shared: Arc<Shared>,
}

impl JobQueue {
    /// Create a queue with the given configuration.
    pub fn new(config: QueueConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::with_valid_config(config))
    }

    /// Create an unbounded queue.
    pub fn unbounded() -> Self {
        Self::with_valid_config(QueueConfig::unbounded())
    }

    fn with_valid_config(config: QueueConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(QueueState::default()),
                not_empty: Notify::new(),
                not_full: Notify::new(),
            }),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.shared.config
    }

    pub fn capacity(&self) -> Option<usize> {
        self.shared.config.capacity
    }

    /// Append a job to the tail.
    ///
    /// Never waits on an unbounded queue. On a full bounded queue this waits
    /// for room under [`FullPolicy::Block`] and fails with
    /// [`QueueError::Full`] under [`FullPolicy::Reject`]. Fails with
    /// [`QueueError::Closed`] once [`close`](Self::close) has been called,
    /// including for callers already waiting for room.
    pub async fn enqueue(&self, job: JobRecord) -> Result<(), QueueError> {
        let wait = self.shared.config.full_policy == FullPolicy::Block;
        let mut job = job;
        loop {
            let notified = self.shared.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.push(job, wait)? {
                Push::Done => return Ok(()),
                Push::Full(returned) => {
                    job = returned;
                    notified.await;
                }
            }
        }
    }

    /// Append a job without ever waiting.
    ///
    /// A full bounded queue always yields [`QueueError::Full`] here,
    /// regardless of the configured policy.
    pub fn try_enqueue(&self, job: JobRecord) -> Result<(), QueueError> {
        self.push(job, false).map(|_| ())
    }

    /// Remove and return the head, waiting until a job is available.
    ///
    /// Returns `None` once the queue is closed and empty; jobs enqueued
    /// before the close are still handed out first.
    pub async fn dequeue(&self) -> Option<JobRecord> {
        loop {
            let notified = self.shared.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.pop() {
                Pop::Job(job) => return Some(job),
                Pop::Drained => return None,
                Pop::Empty => notified.await,
            }
        }
    }

    /// Remove and return the head if one is available right now.
    pub fn try_dequeue(&self) -> Option<JobRecord> {
        match self.pop() {
            Pop::Job(job) => Some(job),
            Pop::Empty | Pop::Drained => None,
        }
    }

    /// Stop accepting jobs and wake every blocked producer and consumer.
    ///
    /// Idempotent. Jobs already queued remain available to `dequeue`.
    pub fn close(&self) {
        let newly_closed = {
            let mut state = self.shared.state.lock();
            !std::mem::replace(&mut state.closed, true)
        };
        if newly_closed {
            tracing::info!(pending = self.size(), "Job queue closed");
        }
        self.shared.not_empty.notify_waiters();
        self.shared.not_full.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Current depth. Advisory only while other tasks are using the queue.
    pub fn size(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Snapshot of the queue's counters.
    pub fn stats(&self) -> QueueStats {
        let state = self.shared.state.lock();
        QueueStats {
            depth: state.pending.len(),
            enqueued: state.enqueued,
            dequeued: state.dequeued,
            rejected: state.rejected,
            capacity: self.shared.config.capacity,
            closed: state.closed,
        }
    }

    fn push(&self, job: JobRecord, wait_when_full: bool) -> Result<Push, QueueError> {
        {
            let mut state = self.shared.state.lock();
            if state.closed {
                state.rejected += 1;
                return Err(QueueError::Closed);
            }
            if let Some(capacity) = self.shared.config.capacity
                && state.pending.len() >= capacity
            {
                if wait_when_full {
                    return Ok(Push::Full(job));
                }
                state.rejected += 1;
                return Err(QueueError::Full { capacity });
            }
            tracing::debug!(job_id = %job.id(), depth = state.pending.len() + 1, "Job enqueued");
            state.pending.push_back(job);
            state.enqueued += 1;
        }
        self.shared.not_empty.notify_one();
        Ok(Push::Done)
    }

    fn pop(&self) -> Pop {
        let job = {
            let mut state = self.shared.state.lock();
            match state.pending.pop_front() {
                Some(job) => {
                    state.dequeued += 1;
                    job
                }
                None if state.closed => return Pop::Drained,
                None => return Pop::Empty,
            }
        };
        if self.shared.config.capacity.is_some() {
            self.shared.not_full.notify_one();
        }
        Pop::Job(job)
    }
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("config", &self.shared.config)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Duration;

    use super::*;
    use job_core::JobId;

    fn job(n: usize) -> JobRecord {
        JobRecord::new(format!("in-{n}.mkv"), format!("out-{n}.mp4"))
    }

    #[tokio::test]
    async fn dequeue_order_matches_enqueue_order() {
        let queue = JobQueue::unbounded();
        let mut expected = Vec::new();
        for n in 0..20 {
            let job = job(n);
            expected.push(job.id());
            queue.enqueue(job).await.unwrap();
        }
        queue.close();

        let mut seen = Vec::new();
        while let Some(job) = queue.dequeue().await {
            seen.push(job.id());
        }
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn closed_queue_still_drains_then_signals_end() {
        let queue = JobQueue::unbounded();
        queue.enqueue(job(1)).await.unwrap();
        queue.close();

        assert!(queue.dequeue().await.is_some());
        assert!(queue.dequeue().await.is_none());
        assert!(queue.dequeue().await.is_none());
        assert!(queue.stats().is_drained());
    }

    #[tokio::test]
    async fn enqueue_after_close_fails() {
        let queue = JobQueue::unbounded();
        queue.close();
        queue.close();

        assert_eq!(queue.enqueue(job(1)).await, Err(QueueError::Closed));
        assert_eq!(queue.try_enqueue(job(2)), Err(QueueError::Closed));
        assert_eq!(queue.size(), 0);
        assert_eq!(queue.stats().rejected, 2);
    }

    #[tokio::test]
    async fn blocked_dequeue_wakes_on_enqueue() {
        let queue = JobQueue::unbounded();
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue().await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!consumer.is_finished());

        let submitted = job(1);
        let id = submitted.id();
        queue.enqueue(submitted).await.unwrap();

        let got = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .expect("dequeue should wake up")
            .unwrap();
        assert_eq!(got.map(|j| j.id()), Some(id));
    }

    #[tokio::test]
    async fn close_wakes_all_blocked_dequeuers() {
        let queue = JobQueue::unbounded();
        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let queue = queue.clone();
                tokio::spawn(async move { queue.dequeue().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();

        for consumer in consumers {
            let got = tokio::time::timeout(Duration::from_secs(1), consumer)
                .await
                .expect("close should wake every consumer")
                .unwrap();
            assert!(got.is_none());
        }
    }

    #[tokio::test]
    async fn bounded_reject_fails_fast() {
        let queue = JobQueue::new(QueueConfig::bounded(2, FullPolicy::Reject)).unwrap();
        queue.enqueue(job(1)).await.unwrap();
        queue.enqueue(job(2)).await.unwrap();

        assert_eq!(
            queue.enqueue(job(3)).await,
            Err(QueueError::Full { capacity: 2 })
        );

        queue.try_dequeue().unwrap();
        queue.enqueue(job(4)).await.unwrap();
        assert_eq!(queue.size(), 2);
    }

    #[tokio::test]
    async fn bounded_block_waits_for_room() {
        let queue = JobQueue::new(QueueConfig::bounded(1, FullPolicy::Block)).unwrap();
        queue.enqueue(job(1)).await.unwrap();
        assert_eq!(
            queue.try_enqueue(job(2)),
            Err(QueueError::Full { capacity: 1 })
        );

        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.enqueue(job(3)).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!producer.is_finished());

        assert!(queue.dequeue().await.is_some());
        tokio::time::timeout(Duration::from_secs(1), producer)
            .await
            .expect("producer should get room")
            .unwrap()
            .unwrap();
        assert_eq!(queue.size(), 1);
    }

    #[tokio::test]
    async fn blocked_enqueue_fails_when_closed() {
        let queue = JobQueue::new(QueueConfig::bounded(1, FullPolicy::Block)).unwrap();
        queue.enqueue(job(1)).await.unwrap();

        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.enqueue(job(2)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();

        let result = tokio::time::timeout(Duration::from_secs(1), producer)
            .await
            .expect("close should wake blocked producers")
            .unwrap();
        assert_eq!(result, Err(QueueError::Closed));
        assert_eq!(queue.size(), 1);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(JobQueue::new(QueueConfig::bounded(0, FullPolicy::Block)).is_err());
    }

    #[test]
    fn unbounded_matches_new_with_unbounded_config() {
        let queue = JobQueue::unbounded();
        let configured = JobQueue::new(QueueConfig::unbounded()).unwrap();
        assert_eq!(queue.config(), configured.config());
        assert_eq!(queue.capacity(), None);

        for i in 0..100 {
            queue.try_enqueue(JobRecord::new(format!("in-{}", i), "out")).unwrap();
        }
        assert_eq!(queue.size(), 100);
        assert!(!queue.is_closed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_consumers_never_share_a_job() {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 250;

        let queue = JobQueue::new(QueueConfig::bounded(16, FullPolicy::Block)).unwrap();

        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let queue = queue.clone();
                tokio::spawn(async move {
                    let mut ids = Vec::new();
                    while let Some(job) = queue.dequeue().await {
                        ids.push(job.id());
                    }
                    ids
                })
            })
            .collect();

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let queue = queue.clone();
                tokio::spawn(async move {
                    for n in 0..PER_PRODUCER {
                        queue.enqueue(job(p * PER_PRODUCER + n)).await.unwrap();
                    }
                })
            })
            .collect();

        for producer in producers {
            producer.await.unwrap();
        }
        queue.close();

        let mut all: Vec<JobId> = Vec::new();
        for consumer in consumers {
            all.extend(consumer.await.unwrap());
        }
        let unique: HashSet<JobId> = all.iter().copied().collect();
        assert_eq!(all.len(), PRODUCERS * PER_PRODUCER);
        assert_eq!(unique.len(), all.len());

        let stats = queue.stats();
        assert_eq!(stats.enqueued, (PRODUCERS * PER_PRODUCER) as u64);
        assert_eq!(stats.dequeued, stats.enqueued);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn per_producer_order_is_preserved() {
        let queue = JobQueue::unbounded();

        let producers: Vec<_> = (0..3)
            .map(|p| {
                let queue = queue.clone();
                tokio::spawn(async move {
                    let mut ids = Vec::new();
                    for n in 0..100 {
                        let job = job(p * 100 + n);
                        ids.push(job.id());
                        queue.enqueue(job).await.unwrap();
                    }
                    ids
                })
            })
            .collect();

        let mut per_producer = Vec::new();
        for producer in producers {
            per_producer.push(producer.await.unwrap());
        }
        queue.close();

        let mut drained = Vec::new();
        while let Some(job) = queue.dequeue().await {
            drained.push(job.id());
        }

        for ids in per_producer {
            let positions: Vec<usize> = ids
                .iter()
                .map(|id| drained.iter().position(|d| d == id).unwrap())
                .collect();
            assert!(positions.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
