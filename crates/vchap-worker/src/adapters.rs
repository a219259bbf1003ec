//! Model adapter traits.
//!
//! The pipeline depends on transcription and generation only through
//! these traits; HTTP-backed implementations live in `asr` and `llm`.

use async_trait::async_trait;

use vchap_models::TranscriptSegment;

use crate::error::WorkerResult;

/// Output of a transcription run.
#[derive(Debug, Clone)]
pub struct Transcription {
    /// Timestamped transcript segments
    pub segments: Vec<TranscriptSegment>,
    /// Media duration in seconds as reported by the model
    pub duration: f64,
    /// Detected language code, if the model reports one
    pub language: Option<String>,
}

/// Speech-to-text adapter.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TranscriptionAdapter: Send + Sync {
    /// Transcribe the audio at `media_path`.
    ///
    /// `on_progress` receives local progress in [0, 100] as segments are
    /// decoded; implementations may call it at any granularity.
    async fn transcribe<'a>(
        &self,
        media_path: &str,
        language: Option<&'a str>,
        initial_prompt: Option<&'a str>,
        on_progress: ProgressFn,
    ) -> WorkerResult<Transcription>;
}

/// Text generation adapter.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GenerationAdapter: Send + Sync {
    /// Run a single completion and return the raw model output.
    async fn generate(&self, system_prompt: &str, user_prompt: &str) -> WorkerResult<String>;
}

/// Progress callback passed into adapters. Local progress in [0, 100].
pub type ProgressFn = Box<dyn Fn(f64) + Send + Sync>;

/// A no-op progress callback.
pub fn noop_progress() -> ProgressFn {
    Box::new(|_| {})
}
