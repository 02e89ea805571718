//! Service wiring and the command loop.
//!
//! `run_service` builds every component from config, spawns the API server,
//! and then drives the command loop. The loop is the single writer for the
//! manual recording session; automatic sessions belong to the coordinator.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::api::{ApiCommand, ApiServer};
use crate::audio::{BufferPool, CaptureEngine};
use crate::config::Config;
use crate::notify::{LogNotifier, Notifier};
use crate::recording::{
    AutoRecordCoordinator, ManualRecordingProbe, MeetingRecorder, RecordingGate, RecordingManager,
    RecordingManagerFactory, RecordingStatusHandle,
};
use crate::store::{SqliteTranscriptStore, TranscriptStore};
use crate::transcription::{RemoteTranscriptionService, TranscriptionService};

/// Shared construction inputs for recorders, manual and automatic alike.
struct RecorderDeps {
    engine: Arc<CaptureEngine>,
    pool: Arc<BufferPool>,
    transcription: Arc<dyn TranscriptionService>,
    store: Arc<dyn TranscriptStore>,
    notifier: Arc<dyn Notifier>,
    status: RecordingStatusHandle,
    config: Config,
}

impl RecorderDeps {
    fn build_recorder(&self, title: Option<String>, app_name: Option<String>) -> MeetingRecorder {
        MeetingRecorder::new(
            self.engine.clone(),
            self.pool.clone(),
            self.transcription.clone(),
            self.store.clone(),
            self.notifier.clone(),
            self.config.capture.clone(),
            self.config.streaming.clone(),
            self.config.notes.clone(),
            Duration::from_secs(self.config.transcription.warmup_cooldown_seconds),
            title,
            app_name,
        )
        .with_status_handle(self.status.clone())
    }
}

struct ServiceRecorderFactory {
    deps: Arc<RecorderDeps>,
}

#[async_trait]
impl RecordingManagerFactory for ServiceRecorderFactory {
    async fn create(&self, app_name: &str, title: &str) -> Result<Arc<dyn RecordingManager>> {
        // A terminal phase left by a previous session would reject the start.
        self.deps.status.reset().await;
        let title = if title.is_empty() {
            None
        } else {
            Some(title.to_string())
        };
        let recorder = self
            .deps
            .build_recorder(title, Some(app_name.to_string()));
        Ok(Arc::new(recorder))
    }
}

struct GateProbe {
    gate: Arc<RecordingGate>,
}

#[async_trait]
impl ManualRecordingProbe for GateProbe {
    async fn is_recording(&self) -> bool {
        self.gate.is_manual_active()
    }
}

pub async fn run_service() -> Result<()> {
    info!("Starting confab service");

    let config = Config::load()?;

    let store: Arc<dyn TranscriptStore> = Arc::new(SqliteTranscriptStore::open_default()?);
    let transcription = build_transcription(&config)?;
    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);

    let engine = Arc::new(CaptureEngine::new(
        config.capture.max_pending_buffers,
        config.capture.log_burst,
        config.capture.log_stride,
    ));
    let pool = Arc::new(BufferPool::new());
    let gate = Arc::new(RecordingGate::new());
    let status = RecordingStatusHandle::default();

    let deps = Arc::new(RecorderDeps {
        engine,
        pool,
        transcription,
        store: store.clone(),
        notifier: notifier.clone(),
        status: status.clone(),
        config: config.clone(),
    });

    let coordinator = AutoRecordCoordinator::new(
        gate.clone(),
        Arc::new(GateProbe { gate: gate.clone() }),
        Arc::new(ServiceRecorderFactory { deps: deps.clone() }),
        notifier,
        config.auto_record.clone(),
    );

    let (tx, rx) = mpsc::channel::<ApiCommand>(32);
    let api_server = ApiServer::new(tx, status.clone(), store, config.api.port);
    tokio::spawn(async move {
        if let Err(e) = api_server.start().await {
            error!("API server failed: {}", e);
        }
    });

    info!("confab is ready!");
    info!(
        "Test manually: curl -X POST http://127.0.0.1:{}/start",
        config.api.port
    );

    command_loop(rx, deps, gate, coordinator).await;

    Ok(())
}

async fn command_loop(
    mut rx: mpsc::Receiver<ApiCommand>,
    deps: Arc<RecorderDeps>,
    gate: Arc<RecordingGate>,
    coordinator: AutoRecordCoordinator,
) {
    let mut manual: Option<Arc<MeetingRecorder>> = None;

    while let Some(command) = rx.recv().await {
        match command {
            ApiCommand::StartRecording { title, force } => {
                if manual.is_some() {
                    warn!("Manual start ignored: manual recording already active");
                    continue;
                }
                let claimed = if force {
                    coordinator.notify_manual_started().await;
                    gate.force_manual();
                    true
                } else {
                    gate.begin_manual()
                };
                if !claimed {
                    warn!("Manual start rejected: auto recording active (use force to override)");
                    continue;
                }

                deps.status.reset().await;
                let recorder = Arc::new(deps.build_recorder(title, None));
                match recorder.start().await {
                    Ok(()) => {
                        info!("Manual recording started");
                        manual = Some(recorder);
                    }
                    Err(e) => {
                        error!("Failed to start manual recording: {}", e);
                        gate.end_manual();
                    }
                }
            }
            ApiCommand::StopRecording => {
                if let Some(recorder) = manual.take() {
                    if let Err(e) = recorder.stop(false).await {
                        error!("Manual recording stop failed: {}", e);
                    }
                    gate.end_manual();
                } else {
                    coordinator.stop_recording().await;
                }
            }
            ApiCommand::UpdateNotes(text) => {
                let result = match &manual {
                    Some(recorder) => recorder.update_notes(text).await,
                    None => coordinator.update_notes(text).await,
                };
                if let Err(e) = result {
                    warn!("Notes update dropped: {}", e);
                }
            }
            ApiCommand::Detection { app_name, title } => {
                coordinator.on_detection(&app_name, &title).await;
            }
            ApiCommand::DetectionCleared => {
                coordinator.on_no_detection().await;
            }
        }
    }
}

fn build_transcription(config: &Config) -> Result<Arc<dyn TranscriptionService>> {
    let endpoint = config
        .transcription
        .api_endpoint
        .as_deref()
        .context("No transcription endpoint configured (set transcription.api_endpoint)")?;

    Ok(Arc::new(RemoteTranscriptionService::new(
        endpoint,
        config.transcription.api_key.clone(),
        config.transcription.language.clone(),
        Duration::from_secs(config.transcription.job_timeout_seconds),
        Duration::from_secs(config.transcription.warmup_timeout_seconds),
    )))
}
