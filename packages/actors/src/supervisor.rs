//! Supervisor actor running a pool of workers against one queue.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use job_core::{JobEvent, PoolReport, WorkerConfig, WorkerReport, WorkerState};
use ractor::{Actor, ActorId, ActorProcessingErr, ActorRef, SupervisionEvent};
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;

use crate::messages::PoolMessage;
use crate::observer::CompletionObserver;
use crate::queue::JobQueue;
use crate::transcoder::Transcoder;
use crate::worker::Worker;
use crate::worker_actor::{WorkerActor, WorkerArgs};

const STATES_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors from starting or talking to a [`WorkerPool`].
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("a worker pool needs at least one worker")]
    NoWorkers,

    #[error("failed to spawn worker pool: {0}")]
    Spawn(String),

    #[error("worker pool did not answer: {0}")]
    Rpc(String),

    #[error("worker pool stopped before every worker reported")]
    Aborted,
}

/// Everything a pool needs to build its workers.
#[derive(Clone)]
pub struct PoolArgs {
    pub workers: usize,
    pub queue: JobQueue,
    pub transcoder: Arc<dyn Transcoder>,
    pub observer: Arc<dyn CompletionObserver>,
    pub config: WorkerConfig,
    pub event_tx: Option<broadcast::Sender<JobEvent>>,
}

impl PoolArgs {
    pub fn new(
        workers: usize,
        queue: JobQueue,
        transcoder: Arc<dyn Transcoder>,
        observer: Arc<dyn CompletionObserver>,
    ) -> Self {
        Self {
            workers,
            queue,
            transcoder,
            observer,
            config: WorkerConfig::default(),
            event_tx: None,
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
}

struct WorkerSlot {
    worker_id: String,
    states: watch::Receiver<WorkerState>,
    report: Option<WorkerReport>,
    terminated: bool,
    failure: Option<String>,
}

impl WorkerSlot {
    fn is_settled(&self) -> bool {
        self.terminated && self.report.is_some()
    }
}

/// State for the pool supervisor.
pub struct PoolState {
    slots: HashMap<ActorId, WorkerSlot>,
    /// Spawn order, for stable reporting.
    order: Vec<ActorId>,
    report_tx: Option<oneshot::Sender<PoolReport>>,
}

impl PoolState {
    fn is_finished(&self) -> bool {
        self.slots.values().all(WorkerSlot::is_settled)
    }

    fn report(&mut self) -> PoolReport {
        let workers = self
            .order
            .iter()
            .filter_map(|id| self.slots.remove(id))
            .filter_map(|slot| slot.report)
            .collect();
        PoolReport { workers }
    }
}

/// Supervisor startup arguments.
pub struct PoolStartup {
    args: PoolArgs,
    report_tx: oneshot::Sender<PoolReport>,
}

/// Supervisor actor owning the worker actors of one pool.
pub struct PoolSupervisor;

impl PoolSupervisor {
    fn finish_if_done(myself: &ActorRef<PoolMessage>, state: &PoolState) {
        if state.is_finished() {
            tracing::info!("All {} workers stopped", state.order.len());
            myself.stop(None);
        }
    }
}

impl Actor for PoolSupervisor {
    type Msg = PoolMessage;
    type State = PoolState;
    type Arguments = PoolStartup;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        startup: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let args = startup.args;
        tracing::info!(
            workers = args.workers,
            transcoder = args.transcoder.name(),
            "Starting worker pool"
        );

        let mut state = PoolState {
            slots: HashMap::with_capacity(args.workers),
            order: Vec::with_capacity(args.workers),
            report_tx: Some(startup.report_tx),
        };

        for n in 1..=args.workers {
            let worker_id = format!("worker-{}", n);
            let mut worker = Worker::new(
                worker_id.clone(),
                args.queue.clone(),
                args.transcoder.clone(),
                args.observer.clone(),
            )
            .with_config(args.config.clone());
            if let Some(ref tx) = args.event_tx {
                worker = worker.with_event_tx(tx.clone());
            }
            let states = worker.subscribe();

            let worker_args = WorkerArgs {
                worker,
                pool: myself.clone(),
            };
            let spawned =
                Actor::spawn_linked(None, WorkerActor, worker_args, myself.get_cell()).await;
            let (actor, _handle) = match spawned {
                Ok(spawned) => spawned,
                Err(e) => {
                    // Workers already spawned keep draining until the queue closes.
                    tracing::warn!("Pool start failed after {} workers", state.order.len());
                    return Err(ActorProcessingErr::from(format!(
                        "Failed to spawn {}: {}",
                        worker_id, e
                    )));
                }
            };

            let actor_id = actor.get_id();
            state.order.push(actor_id);
            state.slots.insert(
                actor_id,
                WorkerSlot {
                    worker_id,
                    states,
                    report: None,
                    terminated: false,
                    failure: None,
                },
            );
        }

        Ok(state)
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        if !state.is_finished() {
            tracing::warn!("Worker pool stopped with unsettled workers");
            return Ok(());
        }
        let report = state.report();
        if let Some(tx) = state.report_tx.take() {
            let _ = tx.send(report);
        }
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            PoolMessage::WorkerExited { actor_id, report } => {
                if let Some(slot) = state.slots.get_mut(&actor_id) {
                    tracing::debug!("Worker {} reported: {}", slot.worker_id, report.exit);
                    slot.report = Some(report);
                }
                Self::finish_if_done(&myself, state);
            }

            PoolMessage::Reap { actor_id } => {
                if let Some(slot) = state.slots.get_mut(&actor_id)
                    && slot.report.is_none()
                {
                    let reason = slot
                        .failure
                        .take()
                        .unwrap_or_else(|| "stopped without reporting".to_string());
                    tracing::error!("Worker {} crashed: {}", slot.worker_id, reason);
                    slot.report = Some(WorkerReport::crashed(slot.worker_id.clone(), reason));
                }
                Self::finish_if_done(&myself, state);
            }

            PoolMessage::States { reply } => {
                let states = state
                    .order
                    .iter()
                    .filter_map(|id| state.slots.get(id))
                    .map(|slot| (slot.worker_id.clone(), *slot.states.borrow()))
                    .collect();
                let _ = reply.send(states);
            }
        }

        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        myself: ActorRef<Self::Msg>,
        message: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        let (actor_id, failure) = match message {
            SupervisionEvent::ActorTerminated(cell, _, reason) => {
                tracing::debug!("Worker actor {} terminated: {:?}", cell.get_id(), reason);
                (cell.get_id(), None)
            }
            SupervisionEvent::ActorFailed(cell, err) => {
                tracing::error!("Worker actor {} failed: {}", cell.get_id(), err);
                (cell.get_id(), Some(err.to_string()))
            }
            _ => return Ok(()),
        };

        let Some(slot) = state.slots.get_mut(&actor_id) else {
            return Ok(());
        };
        slot.terminated = true;
        if slot.failure.is_none() {
            slot.failure = failure;
        }

        if slot.report.is_none() {
            // Supervision events jump the mailbox; a report sent just before
            // termination may still be queued behind this.
            myself.send_message(PoolMessage::Reap { actor_id })?;
        } else {
            Self::finish_if_done(&myself, state);
        }
        Ok(())
    }
}

/// Handle to a running pool of workers.
pub struct WorkerPool {
    actor: ActorRef<PoolMessage>,
    handle: JoinHandle<()>,
    report_rx: oneshot::Receiver<PoolReport>,
    size: usize,
}

impl WorkerPool {
    /// Spawn the supervisor and its workers.
    ///
    /// Workers start fetching immediately and stop once the queue is closed
    /// and drained.
    pub async fn start(args: PoolArgs) -> Result<Self, PoolError> {
        if args.workers == 0 {
            return Err(PoolError::NoWorkers);
        }
        let size = args.workers;
        let (report_tx, report_rx) = oneshot::channel();
        let (actor, handle) = Actor::spawn(None, PoolSupervisor, PoolStartup { args, report_tx })
            .await
            .map_err(|e| PoolError::Spawn(e.to_string()))?;

        Ok(Self {
            actor,
            handle,
            report_rx,
            size,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Current state of every worker, in spawn order.
    pub async fn states(&self) -> Result<Vec<(String, WorkerState)>, PoolError> {
        let result = ractor::rpc::call(
            &self.actor,
            |reply| PoolMessage::States { reply },
            Some(STATES_TIMEOUT),
        )
        .await
        .map_err(|e| PoolError::Rpc(e.to_string()))?;

        match result {
            ractor::rpc::CallResult::Success(states) => Ok(states),
            ractor::rpc::CallResult::Timeout => Err(PoolError::Rpc("timed out".into())),
            ractor::rpc::CallResult::SenderError => Err(PoolError::Rpc("reply dropped".into())),
        }
    }

    /// Wait for every worker to stop.
    pub async fn join(self) -> Result<PoolReport, PoolError> {
        let report = self.report_rx.await.map_err(|_| PoolError::Aborted)?;
        self.handle.await.map_err(|_| PoolError::Aborted)?;
        Ok(report)
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("actor", &self.actor.get_id())
            .field("size", &self.size)
            .finish()
    }
}
