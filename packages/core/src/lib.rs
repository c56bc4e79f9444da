//! Core domain types for the transcoding job pipeline.
//!
//! This crate contains shared types used across all packages:
//! - JobRecord and JobStatus for work items
//! - Queue and worker configuration
//! - Errors for queue, submission and transcode failures
//! - Events for observing the pipeline

mod error;
mod events;
mod job;
mod queue;
mod worker;

pub use error::{ConfigError, QueueError, SubmitError, TranscodeError, TransitionError};
pub use events::JobEvent;
pub use job::{JobId, JobRecord, JobStatus};
pub use queue::{FullPolicy, QueueConfig, QueueStats};
pub use worker::{PoolReport, WorkerConfig, WorkerExit, WorkerReport, WorkerState};
