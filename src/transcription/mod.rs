//! Transcription / diarization / summarization collaborator seam.
//!
//! The recording core only sees this trait; the statistical models behind it
//! (local or remote) are someone else's problem.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod breaker;
pub mod remote;
pub mod summary;

pub use breaker::WarmupBreaker;
pub use remote::RemoteTranscriptionService;
pub use summary::fallback_summary;

/// One diarized segment of transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub speaker: Option<String>,
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// Result of warming up the transcription model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarmupOutcome {
    Completed,
    TimedOut,
    Failed(String),
}

/// A chunk of captured audio handed to the collaborator.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

#[async_trait]
pub trait TranscriptionService: Send + Sync {
    /// Transcribe and diarize one audio chunk.
    async fn transcribe(&self, chunk: &AudioChunk) -> Result<Vec<TranscriptSegment>>;

    /// Warm the model up. Never returns Err: timeouts and failures are
    /// outcomes, not errors (the caller's circuit breaker decides what to
    /// do with them).
    async fn warmup(&self) -> WarmupOutcome;

    /// Summarize a finished transcript. Callers fall back to
    /// [`fallback_summary`] when this fails.
    async fn summarize(
        &self,
        transcript: &str,
        segments: &[TranscriptSegment],
        template: &str,
    ) -> Result<String>;
}
