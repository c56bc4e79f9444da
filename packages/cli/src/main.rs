//! Transcoding worker binary.
//!
//! Reads `<source> <target>` pairs from stdin, one per line, runs them
//! through the worker pool and exits once every job has finished.

use std::error::Error;
use std::process::ExitCode;

use api::{CompositionRoot, JobSubmitter};
use job_core::{JobEvent, PoolReport, SubmitError};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn main() -> Result<ExitCode, Box<dyn Error>> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(run());
    // An interrupted stdin read still holds a blocking thread.
    runtime.shutdown_background();
    result
}

async fn run() -> Result<ExitCode, Box<dyn Error>> {
    // Logs go to stderr so stdout can carry JSON events.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(env_filter)
        .init();

    let root = CompositionRoot::from_env()?;
    let printer = root
        .config()
        .json_events
        .then(|| spawn_event_printer(root.subscribe()));

    let pool = root.start_workers().await?;

    let submitted = feed(
        BufReader::new(tokio::io::stdin()),
        root.submitter(),
        interrupted(),
    )
    .await;
    root.close();

    let report = pool.join().await?;
    drop(root);
    if let Some(printer) = printer {
        let _ = printer.await;
    }

    print_summary(submitted, &report);
    if report.is_clean() && report.failed() == 0 {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

/// Read jobs from `reader` until it ends or `interrupt` resolves, whichever
/// comes first; returns how many were accepted.
async fn feed<R, I>(reader: R, submitter: JobSubmitter, interrupt: I) -> u64
where
    R: AsyncBufRead + Unpin,
    I: Future<Output = ()>,
{
    let mut submitted = 0;
    tokio::select! {
        _ = read_jobs(reader, submitter, &mut submitted) => {}
        _ = interrupt => {}
    }
    submitted
}

/// Resolves on Ctrl-C; never resolves if the signal cannot be watched.
async fn interrupted() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::warn!("Interrupted, finishing in-flight jobs"),
        Err(e) => {
            tracing::error!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

/// Submit every well-formed line until EOF, a read error or a closed queue.
///
/// `submitted` is bumped per accepted job so the count survives the future
/// being dropped on interrupt.
async fn read_jobs<R>(mut reader: R, submitter: JobSubmitter, submitted: &mut u64)
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let mut line_no = 0;

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => line_no += 1,
            Err(e) => {
                tracing::error!(line = line_no + 1, "Failed to read input: {}", e);
                break;
            }
        }

        let Ok(line) = std::str::from_utf8(&buf) else {
            tracing::warn!(line = line_no, "Skipping line that is not valid UTF-8");
            continue;
        };
        let Some((source, target)) = parse_line(line) else {
            continue;
        };
        match submitter.submit(source, target).await {
            Ok(job_id) => {
                *submitted += 1;
                tracing::debug!(job_id = %job_id, line = line_no, "Submitted {} -> {}", source, target);
            }
            Err(SubmitError::Queue(e)) => {
                tracing::warn!(line = line_no, "Stopped reading input: {}", e);
                break;
            }
            Err(e) => tracing::warn!(line = line_no, "Skipping job: {}", e),
        }
    }
}

/// Split a line into source and target; `None` for blanks, comments and
/// malformed lines.
fn parse_line(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(source), Some(target), None) => Some((source, target)),
        _ => {
            tracing::warn!("Skipping malformed line (expected `<source> <target>`): {}", line);
            None
        }
    }
}

fn spawn_event_printer(mut rx: broadcast::Receiver<JobEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => println!("{}", json),
                    Err(e) => tracing::error!("Failed to encode event: {}", e),
                },
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!("Event output lagged, {} events dropped", missed);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn print_summary(submitted: u64, report: &PoolReport) {
    eprintln!(
        "{} submitted, {} succeeded, {} failed",
        submitted,
        report.succeeded(),
        report.failed()
    );
    for worker in report.workers.iter().filter(|w| !w.exit.is_graceful()) {
        eprintln!("{}: {}", worker.worker_id, worker.exit);
    }
}
