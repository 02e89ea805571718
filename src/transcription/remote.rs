//! Remote transcription service over the jobs HTTP API.
//!
//! Submits captured audio as WAV, polls job status until completion, and maps
//! the wire shapes onto [`TranscriptSegment`]. Warmup pings the health
//! endpoint under a timeout; failures become outcomes, never panics.

use std::io::Cursor;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use hound::{SampleFormat, WavSpec, WavWriter};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tokio::time::sleep;
use tracing::{info, warn};

use super::{AudioChunk, TranscriptSegment, TranscriptionService, WarmupOutcome};

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    #[serde(rename = "jobId")]
    job_id: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(default)]
    progress: u8,
}

#[derive(Debug, Deserialize)]
struct JobResponse {
    job: Job,
}

#[derive(Debug, Deserialize)]
struct Job {
    result: Option<JobResult>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JobResult {
    text: String,
    #[serde(default)]
    segments: Vec<WireSegment>,
}

#[derive(Debug, Deserialize)]
struct WireSegment {
    speaker: Option<String>,
    start: f64,
    end: f64,
    text: String,
}

#[derive(Debug, Deserialize)]
struct SummaryResponse {
    summary: String,
}

mod status {
    pub const COMPLETED: &str = "completed";
    pub const FAILED: &str = "failed";
    pub const CANCELLED: &str = "cancelled";
}

pub struct RemoteTranscriptionService {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    language: Option<String>,
    poll_interval: Duration,
    job_timeout: Duration,
    warmup_timeout: Duration,
}

impl RemoteTranscriptionService {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        language: Option<String>,
        job_timeout: Duration,
        warmup_timeout: Duration,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            language,
            poll_interval: Duration::from_secs(2),
            job_timeout,
            warmup_timeout,
        }
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }

    async fn submit(&self, wav_bytes: Vec<u8>) -> Result<String> {
        let part = Part::bytes(wav_bytes)
            .file_name("capture.wav")
            .mime_str("audio/wav")
            .context("Failed to build multipart body")?;

        let mut form = Form::new().part("file", part).text("diarize", "true");
        if let Some(language) = &self.language {
            form = form.text("language", language.clone());
        }

        let response = self
            .authorized(self.client.post(format!("{}/jobs", self.base_url)))
            .multipart(form)
            .send()
            .await
            .context("Failed to submit transcription job")?
            .error_for_status()
            .context("Transcription job submission rejected")?;

        let submitted: SubmitResponse = response
            .json()
            .await
            .context("Invalid job submission response")?;
        Ok(submitted.job_id)
    }

    async fn poll(&self, job_id: &str) -> Result<JobResult> {
        let max_attempts = (self.job_timeout.as_secs() / self.poll_interval.as_secs()).max(1);
        let mut last_status = String::new();

        for attempt in 0..max_attempts {
            let job_status: StatusResponse = self
                .authorized(
                    self.client
                        .get(format!("{}/jobs/{}/status", self.base_url, job_id)),
                )
                .send()
                .await
                .context("Failed to poll job status")?
                .json()
                .await
                .context("Invalid job status response")?;

            if job_status.status != last_status {
                info!(
                    "Transcription job {} status: {} ({}%)",
                    job_id, job_status.status, job_status.progress
                );
                last_status = job_status.status.clone();
            }

            match job_status.status.as_str() {
                status::COMPLETED => {
                    let job: JobResponse = self
                        .authorized(self.client.get(format!("{}/jobs/{}", self.base_url, job_id)))
                        .send()
                        .await
                        .context("Failed to fetch completed job")?
                        .json()
                        .await
                        .context("Invalid job response")?;
                    return job
                        .job
                        .result
                        .context("Job completed but no result available");
                }
                status::FAILED => {
                    let job: JobResponse = self
                        .authorized(self.client.get(format!("{}/jobs/{}", self.base_url, job_id)))
                        .send()
                        .await
                        .context("Failed to fetch failed job")?
                        .json()
                        .await
                        .context("Invalid job response")?;
                    bail!(
                        "Transcription failed: {}",
                        job.job.error.unwrap_or_else(|| "Unknown error".to_string())
                    );
                }
                status::CANCELLED => bail!("Transcription job was cancelled"),
                _ => {
                    if attempt > 0 && attempt % 30 == 0 {
                        warn!(
                            "Transcription job {} still running after {}s",
                            job_id,
                            attempt * self.poll_interval.as_secs()
                        );
                    }
                    sleep(self.poll_interval).await;
                }
            }
        }

        bail!(
            "Transcription timed out after {} seconds",
            self.job_timeout.as_secs()
        );
    }

    fn encode_wav(chunk: &AudioChunk) -> Result<Vec<u8>> {
        let spec = WavSpec {
            channels: 1,
            sample_rate: chunk.sample_rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };

        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer =
                WavWriter::new(&mut cursor, spec).context("Failed to create WAV writer")?;
            for &sample in &chunk.samples {
                writer.write_sample(sample)?;
            }
            writer.finalize().context("Failed to finalize WAV data")?;
        }
        Ok(cursor.into_inner())
    }
}

#[async_trait]
impl TranscriptionService for RemoteTranscriptionService {
    async fn transcribe(&self, chunk: &AudioChunk) -> Result<Vec<TranscriptSegment>> {
        let wav_bytes = Self::encode_wav(chunk)?;
        info!(
            "Submitting {} samples ({} bytes WAV) for transcription",
            chunk.samples.len(),
            wav_bytes.len()
        );

        let job_id = self.submit(wav_bytes).await?;
        let result = self.poll(&job_id).await?;

        info!(
            "Transcription complete: {} chars, {} segments",
            result.text.len(),
            result.segments.len()
        );

        Ok(result
            .segments
            .into_iter()
            .map(|s| TranscriptSegment {
                speaker: s.speaker,
                start: s.start,
                end: s.end,
                text: s.text,
            })
            .collect())
    }

    async fn warmup(&self) -> WarmupOutcome {
        let request = self
            .authorized(self.client.get(format!("{}/warmup", self.base_url)))
            .send();

        match tokio::time::timeout(self.warmup_timeout, request).await {
            Ok(Ok(response)) if response.status().is_success() => WarmupOutcome::Completed,
            Ok(Ok(response)) => WarmupOutcome::Failed(format!(
                "warmup endpoint returned {}",
                response.status()
            )),
            Ok(Err(e)) => WarmupOutcome::Failed(e.to_string()),
            Err(_) => WarmupOutcome::TimedOut,
        }
    }

    async fn summarize(
        &self,
        transcript: &str,
        segments: &[TranscriptSegment],
        template: &str,
    ) -> Result<String> {
        let response = self
            .authorized(self.client.post(format!("{}/summarize", self.base_url)))
            .json(&serde_json::json!({
                "transcript": transcript,
                "segments": segments,
                "template": template,
            }))
            .send()
            .await
            .context("Failed to request summary")?
            .error_for_status()
            .context("Summary request rejected")?;

        let summary: SummaryResponse =
            response.json().await.context("Invalid summary response")?;
        Ok(summary.summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_wav_produces_riff_header() {
        let chunk = AudioChunk {
            samples: vec![0.0, 0.5, -0.5, 1.0],
            sample_rate: 16000,
        };
        let bytes = RemoteTranscriptionService::encode_wav(&chunk).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let service = RemoteTranscriptionService::new(
            "https://example.com/api/",
            None,
            None,
            Duration::from_secs(60),
            Duration::from_secs(5),
        );
        assert_eq!(service.base_url, "https://example.com/api");
    }
}
