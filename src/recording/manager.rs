//! Recording lifecycle orchestrator.
//!
//! Drives idle → capturing → transcribing → completed/failed, owns the notes
//! save queue and the streaming health monitor, and is the authoritative
//! status source for every observer. All collaborators are injected behind
//! traits.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::audio::{spawn_capture_thread, BufferPool, CaptureEngine, CaptureThread, ObserverId};
use crate::config::{CaptureConfig, NotesConfig, StreamingConfig};
use crate::notify::Notifier;
use crate::store::{TranscriptRecord, TranscriptStore};
use crate::transcription::{
    fallback_summary, AudioChunk, TranscriptSegment, TranscriptionService, WarmupBreaker,
    WarmupOutcome,
};

use super::health::{HealthDecision, StreamingMonitor};
use super::notes::{NotesSaveQueue, NotesSaveState};
use super::status::{RecordingPhase, RecordingState, RecordingStatusHandle};

/// Live transcription keeps at most this many recent segments in memory.
pub const MAX_LIVE_SEGMENTS: usize = 1000;

const SUMMARY_TEMPLATE: &str = "meeting";
const NOTES_RETRY_SWEEP: Duration = Duration::from_secs(2);

/// Abstract recording capability the coordinator (and tests) program against.
#[async_trait]
pub trait RecordingManager: Send + Sync {
    async fn start(&self) -> Result<()>;
    async fn stop(&self, stopped_early: bool) -> Result<()>;
    async fn status(&self) -> RecordingState;
    async fn update_notes(&self, text: String) -> Result<()>;
    async fn summary(&self) -> Option<String>;
}

/// A notes retry is only permitted when there is something to save, the
/// queue is settled (idle or failed), and no retry or save unit of work is
/// already outstanding.
pub fn should_retry_notes(
    pending: Option<&str>,
    state: &NotesSaveState,
    retry_in_flight: bool,
    save_in_flight: bool,
) -> bool {
    let has_pending = pending.is_some_and(|text| !text.is_empty());
    let state_allows = matches!(
        state,
        NotesSaveState::Idle | NotesSaveState::Failed { .. }
    );
    has_pending && state_allows && !retry_in_flight && !save_in_flight
}

/// Exponential backoff `base * 2^min(retries, 4)`, capped at 60 seconds.
pub fn health_retry_delay(base: Duration, retries: u32) -> Duration {
    let delay = base * 2u32.pow(retries.min(4));
    delay.min(Duration::from_secs(60))
}

/// Sort segments by start time. The flag reports whether the input was
/// already sorted, so the caller can log an upstream data-quality warning.
pub fn normalize_speaker_segments(
    mut segments: Vec<TranscriptSegment>,
) -> (Vec<TranscriptSegment>, bool) {
    let was_sorted = segments
        .windows(2)
        .all(|pair| pair[0].start <= pair[1].start);
    if !was_sorted {
        segments.sort_by(|a, b| {
            a.start
                .partial_cmp(&b.start)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    }
    (segments, !was_sorted)
}

/// Keep only the most recent [`MAX_LIVE_SEGMENTS`] segments, dropping the
/// oldest, to bound memory during long live transcriptions.
pub fn trim_to_live_segment_limit(mut segments: Vec<TranscriptSegment>) -> Vec<TranscriptSegment> {
    if segments.len() > MAX_LIVE_SEGMENTS {
        segments.drain(..segments.len() - MAX_LIVE_SEGMENTS);
    }
    segments
}

pub struct MeetingRecorder {
    engine: Arc<CaptureEngine>,
    pool: Arc<BufferPool>,
    transcription: Arc<dyn TranscriptionService>,
    store: Arc<dyn TranscriptStore>,
    notifier: Arc<dyn Notifier>,
    status: RecordingStatusHandle,
    notes_queue: NotesSaveQueue,
    streaming_cfg: StreamingConfig,
    capture_cfg: CaptureConfig,
    notes_cfg: NotesConfig,
    title: Option<String>,
    app_name: Option<String>,

    /// Bumped on every start and stop; stale monitor/live-loop continuations
    /// compare against it and discard themselves.
    generation: Arc<AtomicU64>,
    capture_thread: StdMutex<Option<CaptureThread>>,
    observer_id: StdMutex<Option<ObserverId>>,
    monitor: Arc<StdMutex<Option<StreamingMonitor>>>,
    all_samples: Arc<StdMutex<Vec<f32>>>,
    pending_samples: Arc<StdMutex<Vec<f32>>>,
    live_segments: Arc<StdMutex<Vec<TranscriptSegment>>>,
    breaker: StdMutex<WarmupBreaker>,
    record_id: Arc<StdMutex<Option<i64>>>,
    pending_notes: Arc<StdMutex<Option<String>>>,
    retry_in_flight: Arc<AtomicBool>,
    notes_retries: Arc<AtomicU32>,
    last_summary: StdMutex<Option<String>>,
}

impl MeetingRecorder {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        engine: Arc<CaptureEngine>,
        pool: Arc<BufferPool>,
        transcription: Arc<dyn TranscriptionService>,
        store: Arc<dyn TranscriptStore>,
        notifier: Arc<dyn Notifier>,
        capture_cfg: CaptureConfig,
        streaming_cfg: StreamingConfig,
        notes_cfg: NotesConfig,
        warmup_cooldown: Duration,
        title: Option<String>,
        app_name: Option<String>,
    ) -> Self {
        Self {
            engine,
            pool,
            transcription,
            store,
            notifier,
            status: RecordingStatusHandle::default(),
            notes_queue: NotesSaveQueue::new(),
            streaming_cfg,
            capture_cfg,
            notes_cfg,
            title,
            app_name,
            generation: Arc::new(AtomicU64::new(0)),
            capture_thread: StdMutex::new(None),
            observer_id: StdMutex::new(None),
            monitor: Arc::new(StdMutex::new(None)),
            all_samples: Arc::new(StdMutex::new(Vec::new())),
            pending_samples: Arc::new(StdMutex::new(Vec::new())),
            live_segments: Arc::new(StdMutex::new(Vec::new())),
            breaker: StdMutex::new(WarmupBreaker::new(warmup_cooldown)),
            record_id: Arc::new(StdMutex::new(None)),
            pending_notes: Arc::new(StdMutex::new(None)),
            retry_in_flight: Arc::new(AtomicBool::new(false)),
            notes_retries: Arc::new(AtomicU32::new(0)),
            last_summary: StdMutex::new(None),
        }
    }

    /// Replace the default status handle with a shared one, so observers
    /// outside the recorder (API handlers, coordinators) see live state.
    pub fn with_status_handle(mut self, status: RecordingStatusHandle) -> Self {
        self.status = status;
        self
    }

    pub fn status_handle(&self) -> RecordingStatusHandle {
        self.status.clone()
    }

    /// Explicit reset back to idle from a terminal phase.
    pub async fn reset(&self) -> bool {
        self.status.reset().await
    }

    async fn warm_up(&self) {
        let now = Instant::now();
        let attempt = {
            let breaker = self.lock(&self.breaker);
            breaker.should_attempt(now)
        };
        if !attempt {
            debug!("Warmup suppressed by cooldown window");
            return;
        }

        match self.transcription.warmup().await {
            WarmupOutcome::Completed => {
                self.lock(&self.breaker).record_success();
            }
            WarmupOutcome::TimedOut => {
                warn!("Transcription warmup timed out");
                self.lock(&self.breaker).record_failure(Instant::now());
            }
            WarmupOutcome::Failed(reason) => {
                warn!("Transcription warmup failed: {}", reason);
                self.lock(&self.breaker).record_failure(Instant::now());
            }
        }
    }

    fn spawn_monitor_loop(&self, generation: u64) {
        let gen_counter = self.generation.clone();
        let monitor = self.monitor.clone();
        let status = self.status.clone();
        let poll = self.streaming_cfg.poll_interval();

        tokio::spawn(async move {
            loop {
                sleep(poll).await;
                if gen_counter.load(Ordering::SeqCst) != generation {
                    return;
                }

                let decision = {
                    let mut guard = monitor.lock().unwrap_or_else(|e| e.into_inner());
                    match guard.as_mut() {
                        Some(monitor) => monitor.tick(Instant::now()),
                        None => return,
                    }
                };

                match decision {
                    HealthDecision::NoChange => {}
                    HealthDecision::Transition { health, message } => {
                        if let Some(message) = message {
                            warn!("{}", message);
                        }
                        status.set_streaming_health((&health).into()).await;
                    }
                    HealthDecision::StopMonitoring => {
                        info!("Streaming monitor exceeded its maximum lifetime, stopping");
                        return;
                    }
                }
            }
        });
    }

    fn spawn_live_loop(&self, generation: u64) {
        let gen_counter = self.generation.clone();
        let pending = self.pending_samples.clone();
        let transcription = self.transcription.clone();
        let monitor = self.monitor.clone();
        let live_segments = self.live_segments.clone();
        let interval = self.streaming_cfg.live_chunk_interval();
        let retry_base = self.streaming_cfg.retry_base();
        let sample_rate = self.capture_cfg.sample_rate;

        tokio::spawn(async move {
            let mut retries = 0u32;
            loop {
                sleep(interval).await;
                if gen_counter.load(Ordering::SeqCst) != generation {
                    return;
                }

                let samples = {
                    let mut pending = pending.lock().unwrap_or_else(|e| e.into_inner());
                    std::mem::take(&mut *pending)
                };
                if samples.is_empty() {
                    continue;
                }

                let chunk = AudioChunk {
                    samples,
                    sample_rate,
                };
                match transcription.transcribe(&chunk).await {
                    Ok(segments) => {
                        // The transcription may have outlived this cycle.
                        if gen_counter.load(Ordering::SeqCst) != generation {
                            return;
                        }
                        retries = 0;

                        let (normalized, was_unsorted) = normalize_speaker_segments(segments);
                        if was_unsorted {
                            warn!("Upstream returned unsorted speaker segments");
                        }

                        {
                            let mut live =
                                live_segments.lock().unwrap_or_else(|e| e.into_inner());
                            live.extend(normalized);
                            let trimmed = trim_to_live_segment_limit(std::mem::take(&mut *live));
                            *live = trimmed;
                        }
                        {
                            let mut guard = monitor.lock().unwrap_or_else(|e| e.into_inner());
                            if let Some(monitor) = guard.as_mut() {
                                monitor.record_update(Instant::now());
                            }
                        }
                    }
                    Err(e) => {
                        let delay = health_retry_delay(retry_base, retries);
                        retries += 1;
                        warn!(
                            "Live transcription failed (retrying in {}s): {}",
                            delay.as_secs(),
                            e
                        );
                        sleep(delay).await;
                    }
                }
            }
        });
    }

    fn spawn_notes_retry_loop(&self, generation: u64) {
        let gen_counter = self.generation.clone();
        let pending_notes = self.pending_notes.clone();
        let retry_in_flight = self.retry_in_flight.clone();
        let notes_retries = self.notes_retries.clone();
        let queue = self.notes_queue.clone();
        let store = self.store.clone();
        let record_id = self.record_id.clone();
        let retry_base = Duration::from_secs(self.notes_cfg.retry_base_seconds);

        tokio::spawn(async move {
            loop {
                sleep(NOTES_RETRY_SWEEP).await;
                if gen_counter.load(Ordering::SeqCst) != generation {
                    return;
                }

                let pending = {
                    let guard = pending_notes.lock().unwrap_or_else(|e| e.into_inner());
                    guard.clone()
                };
                let state = queue.state();
                // Only a failed save leaves pending text behind; a retry is
                // gated on the queue being settled with no work outstanding.
                if !matches!(state, NotesSaveState::Failed { .. }) {
                    continue;
                }
                if !should_retry_notes(
                    pending.as_deref(),
                    &state,
                    retry_in_flight.load(Ordering::SeqCst),
                    queue.is_saving(),
                ) {
                    continue;
                }

                retry_in_flight.store(true, Ordering::SeqCst);
                let retries = notes_retries.fetch_add(1, Ordering::SeqCst);
                let delay = health_retry_delay(retry_base, retries);
                info!("Retrying notes save in {}s", delay.as_secs());
                sleep(delay).await;

                if gen_counter.load(Ordering::SeqCst) == generation {
                    if let Some(text) = pending {
                        queue.enqueue(save_notes_op(
                            store.clone(),
                            record_id.clone(),
                            pending_notes.clone(),
                            text,
                        ));
                    }
                }
                retry_in_flight.store(false, Ordering::SeqCst);
            }
        });
    }

    async fn process_transcript(&self) -> Result<()> {
        let samples = {
            let mut all = self.lock(&self.all_samples);
            std::mem::take(&mut *all)
        };

        let segments = if samples.is_empty() {
            self.take_live_segments()
        } else {
            let chunk = AudioChunk {
                samples,
                sample_rate: self.capture_cfg.sample_rate,
            };
            match self.transcription.transcribe(&chunk).await {
                Ok(segments) => segments,
                Err(e) => {
                    let live = self.take_live_segments();
                    if live.is_empty() {
                        return Err(e).context("Transcription failed with no live segments");
                    }
                    warn!(
                        "Final transcription failed, keeping {} live segments: {}",
                        live.len(),
                        e
                    );
                    live
                }
            }
        };

        if segments.is_empty() {
            bail!("No transcript produced");
        }

        let (normalized, was_unsorted) = normalize_speaker_segments(segments);
        if was_unsorted {
            warn!("Upstream returned unsorted speaker segments");
        }

        let transcript = render_transcript(&normalized);
        let summary = match self
            .transcription
            .summarize(&transcript, &normalized, SUMMARY_TEMPLATE)
            .await
        {
            Ok(summary) => summary,
            Err(e) => {
                warn!("Summarization unavailable, using heuristic summary: {}", e);
                fallback_summary(&transcript, &normalized)
            }
        };

        {
            let mut last = self.lock(&self.last_summary);
            *last = Some(summary.clone());
        }

        let duration = self.status.get().await.duration_seconds();
        if let Some(id) = *self.lock(&self.record_id) {
            self.store
                .update(id, &|record| {
                    record.status = "completed".to_string();
                    record.transcript_text = Some(transcript.clone());
                    record.summary = Some(summary.clone());
                    record.duration_seconds = duration.map(|d| d as i64);
                    record.completed_at = Some(chrono::Utc::now().to_rfc3339());
                })
                .context("Failed to persist completed transcript")?;
        }

        let title = self.title.clone().unwrap_or_else(|| "Meeting".to_string());
        self.notifier
            .send_recording_completed(&title, !transcript.is_empty())
            .await;

        Ok(())
    }

    fn take_live_segments(&self) -> Vec<TranscriptSegment> {
        let mut live = self.lock(&self.live_segments);
        std::mem::take(&mut *live)
    }

    async fn mark_failed(&self, reason: String) {
        if let Some(id) = *self.lock(&self.record_id) {
            let result = self.store.update(id, &|record| {
                record.status = "failed".to_string();
                record.error = Some(reason.clone());
                record.completed_at = Some(chrono::Utc::now().to_rfc3339());
            });
            if let Err(e) = result {
                error!("Failed to persist failure state: {}", e);
            }
        }
        self.status
            .set_phase(RecordingPhase::Failed { reason })
            .await;
    }

    fn lock<'a, T>(&self, mutex: &'a StdMutex<T>) -> std::sync::MutexGuard<'a, T> {
        mutex.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn render_transcript(segments: &[TranscriptSegment]) -> String {
    segments
        .iter()
        .filter(|s| !s.text.trim().is_empty())
        .map(|s| match &s.speaker {
            Some(speaker) => format!("[{}] {}", speaker, s.text.trim()),
            None => s.text.trim().to_string(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build the save operation the notes queue runs: persist the text and clear
/// the pending slot if no newer edit replaced it meanwhile.
fn save_notes_op(
    store: Arc<dyn TranscriptStore>,
    record_id: Arc<StdMutex<Option<i64>>>,
    pending_notes: Arc<StdMutex<Option<String>>>,
    text: String,
) -> impl std::future::Future<Output = Result<()>> + Send + 'static {
    async move {
        let id = {
            let guard = record_id.lock().unwrap_or_else(|e| e.into_inner());
            (*guard).context("No transcript record for notes")?
        };
        store.update(id, &|record| {
            record.notes = Some(text.clone());
        })?;

        let mut pending = pending_notes.lock().unwrap_or_else(|e| e.into_inner());
        if pending.as_deref() == Some(text.as_str()) {
            *pending = None;
        }
        Ok(())
    }
}

#[async_trait]
impl RecordingManager for MeetingRecorder {
    async fn start(&self) -> Result<()> {
        let phase = self.status.phase().await;
        if phase != RecordingPhase::Idle {
            bail!("Recording already in progress (phase: {})", phase.as_str());
        }

        self.warm_up().await;

        let session = self.engine.begin_session();
        {
            let mut all = self.lock(&self.all_samples);
            all.clear();
        }
        {
            let mut pending = self.lock(&self.pending_samples);
            pending.clear();
        }
        self.take_live_segments();

        let all = self.all_samples.clone();
        let pending = self.pending_samples.clone();
        let observer = self
            .engine
            .register_observer(Arc::new(move |buffer| {
                let samples = buffer.samples();
                {
                    let mut all = all.lock().unwrap_or_else(|e| e.into_inner());
                    all.extend_from_slice(samples);
                }
                let mut pending = pending.lock().unwrap_or_else(|e| e.into_inner());
                pending.extend_from_slice(samples);
            }))
            .context("Failed to register capture observer")?;
        {
            let mut slot = self.lock(&self.observer_id);
            *slot = Some(observer);
        }

        let thread = match spawn_capture_thread(
            self.engine.clone(),
            self.pool.clone(),
            session.id,
            self.capture_cfg.sample_rate,
        ) {
            Ok(thread) => thread,
            Err(e) => {
                // Device/permission failure is fatal to this session.
                self.engine.finalize_recording(true).await;
                self.mark_failed(e.to_string()).await;
                return Err(e).context("Failed to start audio capture");
            }
        };
        {
            let mut slot = self.lock(&self.capture_thread);
            *slot = Some(thread);
        }

        let record = TranscriptRecord {
            title: self.title.clone(),
            app_name: self.app_name.clone(),
            status: "capturing".to_string(),
            ..Default::default()
        };
        match self.store.save(&record) {
            Ok(id) => {
                let mut slot = self.lock(&self.record_id);
                *slot = Some(id);
            }
            Err(e) => warn!("Failed to create transcript record: {}", e),
        }

        {
            let mut monitor = self.lock(&self.monitor);
            *monitor = Some(StreamingMonitor::new(
                Instant::now(),
                self.streaming_cfg.stall_threshold(),
                self.streaming_cfg.first_token_grace(),
                self.streaming_cfg.max_monitor_elapsed(),
            ));
        }
        self.notes_retries.store(0, Ordering::SeqCst);

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.status.begin_capture(session.id, self.title.clone()).await;
        self.spawn_monitor_loop(generation);
        self.spawn_live_loop(generation);
        self.spawn_notes_retry_loop(generation);

        info!("Recording started (session {})", session.id);
        Ok(())
    }

    async fn stop(&self, stopped_early: bool) -> Result<()> {
        let phase = self.status.phase().await;
        if phase != RecordingPhase::Capturing {
            bail!("No recording in progress (phase: {})", phase.as_str());
        }

        // Invalidate monitor/live/retry cycles before tearing down capture.
        self.generation.fetch_add(1, Ordering::SeqCst);

        let thread = {
            let mut slot = self.lock(&self.capture_thread);
            slot.take()
        };
        if let Some(thread) = thread {
            tokio::task::spawn_blocking(move || thread.stop())
                .await
                .ok();
        }

        if let Some(id) = self.lock(&self.observer_id).take() {
            self.engine.unregister_observer(id);
        }

        // Capture resources are released regardless of what downstream
        // processing does.
        let summary = self.engine.finalize_recording(stopped_early).await;
        if summary.drain_timed_out {
            warn!("Capture finalize drained with a timeout");
        }
        {
            let mut monitor = self.lock(&self.monitor);
            *monitor = None;
        }

        self.status.set_phase(RecordingPhase::Transcribing).await;
        if let Some(id) = *self.lock(&self.record_id) {
            let result = self.store.update(id, &|record| {
                record.status = "transcribing".to_string();
            });
            if let Err(e) = result {
                warn!("Failed to persist transcribing state: {}", e);
            }
        }

        match self.process_transcript().await {
            Ok(()) => {
                self.status.set_phase(RecordingPhase::Completed).await;
                info!("Recording completed");
                Ok(())
            }
            Err(e) => {
                error!("Recording processing failed: {}", e);
                self.mark_failed(e.to_string()).await;
                Err(e)
            }
        }
    }

    async fn status(&self) -> RecordingState {
        let mut state = self.status.get().await;
        state.notes_state = self.notes_queue.state();
        state
    }

    async fn update_notes(&self, text: String) -> Result<()> {
        {
            let mut pending = self.lock(&self.pending_notes);
            *pending = Some(text.clone());
        }
        self.notes_queue.enqueue(save_notes_op(
            self.store.clone(),
            self.record_id.clone(),
            self.pending_notes.clone(),
            text,
        ));
        Ok(())
    }

    async fn summary(&self) -> Option<String> {
        self.lock(&self.last_summary).clone()
    }
}
