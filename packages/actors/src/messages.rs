//! Message types for actor communication.

use job_core::{WorkerReport, WorkerState};
use ractor::{ActorId, RpcReplyPort};

/// Messages for the WorkerActor.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Run one iteration of the worker loop.
    Fetch,
}

/// Messages for the pool supervisor.
#[derive(Debug)]
pub enum PoolMessage {
    /// A worker finished its loop and is about to stop.
    WorkerExited {
        actor_id: ActorId,
        report: WorkerReport,
    },

    /// Settle a terminated worker that never sent its report.
    Reap { actor_id: ActorId },

    /// Current state of every worker, in spawn order.
    States {
        reply: RpcReplyPort<Vec<(String, WorkerState)>>,
    },
}
