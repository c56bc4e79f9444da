//! Transcoder capability trait and simple implementations.

use std::future::Future;
use std::pin::Pin;

use job_core::TranscodeError;

/// Result type for transcoders.
pub type TranscodeResult = Result<(), TranscodeError>;

/// Future type for async transcoders.
pub type TranscodeFuture<'a> = Pin<Box<dyn Future<Output = TranscodeResult> + Send + 'a>>;

/// Capability that converts a source into a target.
///
/// Implementations hold no per-job state; each call is independent and may
/// run for an unbounded time. Transcoders never retry on their own.
pub trait Transcoder: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Convert `source` into `target`.
    fn transcode<'a>(&'a self, source: &'a str, target: &'a str) -> TranscodeFuture<'a>;
}

/// Transcoder that succeeds immediately without touching anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTranscoder;

impl Transcoder for NoopTranscoder {
    fn name(&self) -> &str {
        "noop"
    }

    fn transcode<'a>(&'a self, source: &'a str, target: &'a str) -> TranscodeFuture<'a> {
        Box::pin(async move {
            tracing::debug!(source, target, "noop transcode");
            Ok(())
        })
    }
}

/// A simple function-based transcoder.
///
/// The closure receives owned copies of the locators so it can move them
/// into the returned future.
pub struct FnTranscoder<F>
where
    F: Fn(String, String) -> TranscodeFuture<'static> + Send + Sync + 'static,
{
    name: String,
    transcode: F,
}

impl<F> FnTranscoder<F>
where
    F: Fn(String, String) -> TranscodeFuture<'static> + Send + Sync + 'static,
{
    /// Create a new function-based transcoder.
    pub fn new(name: impl Into<String>, transcode: F) -> Self {
        Self {
            name: name.into(),
            transcode,
        }
    }
}

impl<F> Transcoder for FnTranscoder<F>
where
    F: Fn(String, String) -> TranscodeFuture<'static> + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn transcode<'a>(&'a self, source: &'a str, target: &'a str) -> TranscodeFuture<'a> {
        (self.transcode)(source.to_string(), target.to_string())
    }
}

/// Helper macro for creating transcoders from async closures.
#[macro_export]
macro_rules! transcoder {
    ($name:expr, |$source:ident, $target:ident| $body:expr) => {
        $crate::FnTranscoder::new($name, |$source: String, $target: String| {
            Box::pin(async move {
                let result: $crate::TranscodeResult = $body;
                result
            })
        })
    };
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn noop_always_succeeds() {
        assert_eq!(NoopTranscoder.transcode("a", "b").await, Ok(()));
        assert_eq!(NoopTranscoder.name(), "noop");
    }

    #[tokio::test]
    async fn fn_transcoder_sees_locators() {
        let transcoder: Arc<dyn Transcoder> = Arc::new(crate::transcoder!(
            "picky",
            |source, target| {
                if source.ends_with(".mkv") && target.ends_with(".mp4") {
                    Ok(())
                } else {
                    Err(TranscodeError::exit(1))
                }
            }
        ));

        assert_eq!(transcoder.name(), "picky");
        assert!(transcoder.transcode("a.mkv", "a.mp4").await.is_ok());
        assert_eq!(
            transcoder.transcode("a.avi", "a.mp4").await,
            Err(TranscodeError::exit(1))
        );
    }
}
