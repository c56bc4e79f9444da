//! Runtime for the transcoding job pipeline.
//!
//! This crate provides the shared job queue, the transcoder capability,
//! completion observers, the worker loop and the Ractor-based worker pool.
//!
//! # Architecture
//!
//! - `JobQueue` - FIFO handoff between producers and workers
//! - `Transcoder` - capability that turns a source into a target
//! - `Worker` - dequeues, transcodes, records and reports one job at a time
//! - `WorkerActor` - hosts a `Worker` as a Ractor actor
//! - `PoolSupervisor` - spawns linked workers and collects their reports
//!
//! # Usage
//!
//! ```ignore
//! use actors::{JobQueue, NoopTranscoder, PoolArgs, TracingObserver, WorkerPool};
//!
//! let queue = JobQueue::unbounded();
//! let args = PoolArgs::new(2, queue.clone(), Arc::new(NoopTranscoder), Arc::new(TracingObserver));
//! let pool = WorkerPool::start(args).await?;
//!
//! queue.enqueue(JobRecord::new("in.mkv", "out.mp4")).await?;
//! queue.close();
//! let report = pool.join().await?;
//! ```

mod messages;
mod observer;
mod process;
mod queue;
mod supervisor;
mod transcoder;
mod worker;
mod worker_actor;

pub use messages::{PoolMessage, WorkerMessage};
pub use observer::{CompletionObserver, EventObserver, FnObserver, Observers, TracingObserver};
pub use process::{ProcessConfig, ProcessTranscoder, default_args};
pub use queue::JobQueue;
pub use supervisor::{PoolArgs, PoolError, PoolSupervisor, WorkerPool};
pub use transcoder::{FnTranscoder, NoopTranscoder, TranscodeFuture, TranscodeResult, Transcoder};
pub use worker::{Step, Worker};
pub use worker_actor::WorkerActor;

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef};
