//! Transcoder backed by an external program such as ffmpeg.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use job_core::TranscodeError;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use crate::transcoder::{TranscodeFuture, Transcoder};

/// Placeholder replaced by the job's source locator.
pub const SOURCE_PLACEHOLDER: &str = "{source}";
/// Placeholder replaced by the job's target locator.
pub const TARGET_PLACEHOLDER: &str = "{target}";

/// Keep at most this much of the child's stderr in error reports.
const STDERR_TAIL_BYTES: usize = 2048;
/// Raw stderr kept while the child runs; trimmed to the tail afterwards.
const STDERR_CAPTURE_BYTES: usize = 2 * STDERR_TAIL_BYTES;

/// Configuration for [`ProcessTranscoder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessConfig {
    /// Program to run, looked up on `PATH` if not absolute.
    pub program: PathBuf,
    /// Argument template; `{source}` and `{target}` are substituted per job.
    pub args: Vec<String>,
    /// Kill the child and report `Timeout` after this long.
    pub timeout: Option<Duration>,
    /// Create the target's parent directory when it is missing.
    pub create_target_dir: bool,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            args: default_args(),
            timeout: None,
            create_target_dir: true,
        }
    }
}

impl ProcessConfig {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_create_target_dir(mut self, create: bool) -> Self {
        self.create_target_dir = create;
        self
    }
}

/// ffmpeg-style defaults: overwrite the target, never read stdin.
pub fn default_args() -> Vec<String> {
    ["-hide_banner", "-nostdin", "-y", "-i", SOURCE_PLACEHOLDER, TARGET_PLACEHOLDER]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Runs one external process per job.
#[derive(Debug, Clone)]
pub struct ProcessTranscoder {
    config: ProcessConfig,
    name: String,
}

impl ProcessTranscoder {
    pub fn new(config: ProcessConfig) -> Self {
        let name = config
            .program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| config.program.to_string_lossy().to_string());
        Self { config, name }
    }

    pub fn config(&self) -> &ProcessConfig {
        &self.config
    }

    /// Arguments for one job, with placeholders substituted.
    pub fn render_args(&self, source: &str, target: &str) -> Vec<String> {
        self.config
            .args
            .iter()
            .map(|arg| {
                arg.replace(SOURCE_PLACEHOLDER, source)
                    .replace(TARGET_PLACEHOLDER, target)
            })
            .collect()
    }

    async fn run(&self, source: &str, target: &str) -> Result<(), TranscodeError> {
        check_source(source).await?;
        self.prepare_target(target).await?;

        let mut cmd = Command::new(&self.config.program);
        cmd.args(self.render_args(source, target))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| TranscodeError::Spawn {
            program: self.name.clone(),
            reason: e.to_string(),
        })?;

        tracing::debug!(program = %self.name, pid = child.id(), source, target, "Spawned transcoder");

        let stderr = child.stderr.take();
        let running = &mut child;
        let finished = async move {
            let (status, stderr) = tokio::join!(running.wait(), async move {
                match stderr {
                    Some(pipe) => capture_tail(pipe, STDERR_CAPTURE_BYTES).await,
                    None => Vec::new(),
                }
            });
            status.map(|status| (status, stderr))
        };

        let (status, stderr) = match self.config.timeout {
            // The child is dropped on return, and kill_on_drop kills it.
            Some(timeout) => match tokio::time::timeout(timeout, finished).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(program = %self.name, source, ?timeout, "Transcoder timed out, killed");
                    return Err(TranscodeError::Timeout {
                        after_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    });
                }
            },
            None => finished.await,
        }
        .map_err(|e| TranscodeError::Internal {
            reason: format!("waiting for {} failed: {}", self.name, e),
        })?;

        if status.success() {
            Ok(())
        } else {
            Err(TranscodeError::ProcessFailure {
                exit_code: status.code(),
                stderr: stderr_tail(&stderr),
            })
        }
    }

    async fn prepare_target(&self, target: &str) -> Result<(), TranscodeError> {
        if is_remote(target) {
            return Ok(());
        }
        let unwritable = |reason: String| TranscodeError::TargetUnwritable {
            locator: target.to_string(),
            reason,
        };

        let path = Path::new(target);
        if tokio::fs::metadata(path)
            .await
            .is_ok_and(|meta| meta.is_dir())
        {
            return Err(unwritable("target is a directory".into()));
        }

        let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) else {
            return Ok(());
        };
        match tokio::fs::metadata(parent).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(unwritable(format!("{} is not a directory", parent.display()))),
            Err(_) if self.config.create_target_dir => tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| unwritable(format!("cannot create {}: {}", parent.display(), e))),
            Err(e) => Err(unwritable(format!("{}: {}", parent.display(), e))),
        }
    }
}

impl Transcoder for ProcessTranscoder {
    fn name(&self) -> &str {
        &self.name
    }

    fn transcode<'a>(&'a self, source: &'a str, target: &'a str) -> TranscodeFuture<'a> {
        Box::pin(self.run(source, target))
    }
}

/// URIs are opaque; only local paths are checked up front.
fn is_remote(locator: &str) -> bool {
    locator.contains("://")
}

async fn check_source(source: &str) -> Result<(), TranscodeError> {
    if is_remote(source) || tokio::fs::metadata(source).await.is_ok() {
        Ok(())
    } else {
        Err(TranscodeError::SourceNotFound {
            locator: source.to_string(),
        })
    }
}

/// Drain `reader` to EOF, keeping only the last `limit` bytes.
async fn capture_tail<R>(mut reader: R, limit: usize) -> Vec<u8>
where
    R: AsyncRead + Unpin,
{
    let mut tail = VecDeque::with_capacity(limit);
    let mut chunk = [0u8; 4096];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                tail.extend(&chunk[..n]);
                let excess = tail.len().saturating_sub(limit);
                tail.drain(..excess);
            }
        }
    }
    tail.into()
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.len() <= STDERR_TAIL_BYTES {
        return text.to_string();
    }
    let mut start = text.len() - STDERR_TAIL_BYTES;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}
