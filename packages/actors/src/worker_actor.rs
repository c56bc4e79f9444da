//! Worker actor hosting one worker loop.

use ractor::{Actor, ActorProcessingErr, ActorRef};

use crate::messages::{PoolMessage, WorkerMessage};
use crate::worker::{Step, Worker};

/// State for the worker actor.
pub struct WorkerActorState {
    worker: Worker,
    pool: ActorRef<PoolMessage>,
}

/// Worker actor arguments.
pub struct WorkerArgs {
    pub worker: Worker,
    /// Receives the worker's report before it stops.
    pub pool: ActorRef<PoolMessage>,
}

/// Actor that drives a [`Worker`] one job per `Fetch` message.
///
/// Each iteration re-arms itself by sending `Fetch` again, so the loop runs
/// until the worker exits, after which the report goes to the pool and the
/// actor stops.
pub struct WorkerActor;

impl Actor for WorkerActor {
    type Msg = WorkerMessage;
    type State = WorkerActorState;
    type Arguments = WorkerArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting worker: {}", args.worker.worker_id());
        myself.send_message(WorkerMessage::Fetch)?;
        Ok(WorkerActorState {
            worker: args.worker,
            pool: args.pool,
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            WorkerMessage::Fetch => match state.worker.step().await {
                Step::Continue => myself.send_message(WorkerMessage::Fetch)?,
                Step::Exit(exit) => {
                    let report = state.worker.finish(exit);
                    let reason = report.exit.to_string();
                    state.pool.send_message(PoolMessage::WorkerExited {
                        actor_id: myself.get_id(),
                        report,
                    })?;
                    myself.stop(Some(reason));
                }
            },
        }

        Ok(())
    }
}
