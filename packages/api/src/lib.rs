//! Application layer for the transcoding pipeline.
//!
//! Reads configuration, assembles the queue, transcoder and workers, and
//! exposes the producer-side [`JobSubmitter`].

pub mod config;
pub mod init;
pub mod jobs;

pub use config::AppConfig;
pub use init::{CompositionRoot, InitError};
pub use jobs::JobSubmitter;
