#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use actors::{CompletionObserver, FnObserver, FnTranscoder, TranscodeFuture, Transcoder};
use api::AppConfig;
use job_core::{JobEvent, JobRecord, TranscodeError, WorkerConfig};
use parking_lot::Mutex;
use tokio::sync::broadcast;

pub type Finished = Arc<Mutex<Vec<JobRecord>>>;

/// Config with `workers` workers and no waiting between retries.
pub fn test_config(workers: usize) -> AppConfig {
    AppConfig::default()
        .with_workers(workers)
        .with_worker(WorkerConfig::default().with_retry_backoff(Duration::from_millis(1)))
}

/// Observer that keeps every finished job in completion order.
pub fn recorder() -> (Arc<dyn CompletionObserver>, Finished) {
    let finished: Finished = Arc::new(Mutex::new(Vec::new()));
    let sink = finished.clone();
    let observer = FnObserver::new(move |job: &JobRecord| sink.lock().push(job.clone()));
    (Arc::new(observer), finished)
}

/// Transcoder that succeeds unless the source starts with `fail`.
pub fn scripted() -> Arc<dyn Transcoder> {
    Arc::new(FnTranscoder::new(
        "scripted",
        |source: String, _target: String| -> TranscodeFuture<'static> {
            Box::pin(async move {
                if source.starts_with("fail") {
                    Err(TranscodeError::exit(1))
                } else {
                    Ok(())
                }
            })
        },
    ))
}

pub fn drain_events(rx: &mut broadcast::Receiver<JobEvent>) -> Vec<JobEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
