//! Auto-recording coordinator.
//!
//! Turns meeting-window detection events into start/stop calls against a
//! recording manager, deferring to manual sessions through the gate. Every
//! detection cycle and scheduled stop carries a generation number; a
//! continuation whose generation no longer matches is discarded as a no-op.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::AutoRecordConfig;
use crate::notify::Notifier;

use super::gate::RecordingGate;
use super::manager::RecordingManager;
use super::status::RecordingPhase;

/// Minimal query for deferring to user-initiated sessions.
#[async_trait]
pub trait ManualRecordingProbe: Send + Sync {
    async fn is_recording(&self) -> bool;
}

/// Builds a recording manager for one detected meeting. Construction is
/// asynchronous and may race with a manual override.
#[async_trait]
pub trait RecordingManagerFactory: Send + Sync {
    async fn create(&self, app_name: &str, title: &str) -> Result<Arc<dyn RecordingManager>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoRecordState {
    Idle,
    Starting,
    Recording,
    Stopping,
}

struct CoordinatorInner {
    state: AutoRecordState,
    /// Current detection-cycle generation.
    generation: u64,
    /// Token sequence for scheduled stops.
    stop_seq: u64,
    pending_stop: Option<u64>,
    manager: Option<Arc<dyn RecordingManager>>,
    started_at: Option<Instant>,
}

#[derive(Clone)]
pub struct AutoRecordCoordinator {
    inner: Arc<Mutex<CoordinatorInner>>,
    gate: Arc<RecordingGate>,
    manual: Arc<dyn ManualRecordingProbe>,
    factory: Arc<dyn RecordingManagerFactory>,
    notifier: Arc<dyn Notifier>,
    config: AutoRecordConfig,
}

impl AutoRecordCoordinator {
    pub fn new(
        gate: Arc<RecordingGate>,
        manual: Arc<dyn ManualRecordingProbe>,
        factory: Arc<dyn RecordingManagerFactory>,
        notifier: Arc<dyn Notifier>,
        config: AutoRecordConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CoordinatorInner {
                state: AutoRecordState::Idle,
                generation: 0,
                stop_seq: 0,
                pending_stop: None,
                manager: None,
                started_at: None,
            })),
            gate,
            manual,
            factory,
            notifier,
            config,
        }
    }

    pub async fn state(&self) -> AutoRecordState {
        self.inner.lock().await.state
    }

    /// A meeting window was detected. Ignored outright while a manual
    /// session is active; otherwise cancels any pending stop and, when
    /// idle, begins one start cycle.
    pub async fn on_detection(&self, app_name: &str, title: &str) {
        if self.manual.is_recording().await || self.gate.is_manual_active() {
            debug!("Ignoring detection: manual recording active");
            return;
        }

        let generation = {
            let mut inner = self.inner.lock().await;
            if inner.pending_stop.take().is_some() {
                debug!("Detection cancelled pending stop");
            }
            if inner.state != AutoRecordState::Idle {
                return;
            }
            if !self.gate.begin_auto() {
                debug!("Detection rejected by recording gate");
                return;
            }
            inner.state = AutoRecordState::Starting;
            inner.generation = inner.generation.wrapping_add(1);
            inner.generation
        };

        self.notifier.send_meeting_prompt(app_name, title).await;

        let coordinator = self.clone();
        let app_name = app_name.to_string();
        let title = title.to_string();
        tokio::spawn(async move {
            coordinator.run_start(generation, app_name, title).await;
        });
    }

    /// The meeting window is gone. Schedules a stop after the grace period
    /// instead of stopping immediately, to absorb transient focus changes.
    pub async fn on_no_detection(&self) {
        let token = {
            let mut inner = self.inner.lock().await;
            if inner.state != AutoRecordState::Recording {
                return;
            }
            if inner.pending_stop.is_some() {
                return;
            }
            inner.stop_seq += 1;
            inner.pending_stop = Some(inner.stop_seq);
            inner.stop_seq
        };

        let grace = self.config.stop_grace();
        info!("Scheduling auto-recording stop in {}s", grace.as_secs());

        let coordinator = self.clone();
        tokio::spawn(async move {
            sleep(grace).await;
            let fire = {
                let mut inner = coordinator.inner.lock().await;
                if inner.pending_stop == Some(token) {
                    inner.pending_stop = None;
                    true
                } else {
                    // A newer detection cycle cancelled or replaced this stop.
                    false
                }
            };
            if fire {
                info!("Stop grace period elapsed, stopping auto recording");
                coordinator.stop_recording().await;
            }
        });
    }

    /// Forward a notes update to the active auto recording, if any.
    pub async fn update_notes(&self, text: String) -> Result<()> {
        let manager = self.inner.lock().await.manager.clone();
        match manager {
            Some(manager) => manager.update_notes(text).await,
            None => anyhow::bail!("No active auto recording"),
        }
    }

    /// Stop the current auto recording. No-op unless recording.
    pub async fn stop_recording(&self) {
        let manager = {
            let mut inner = self.inner.lock().await;
            if inner.state != AutoRecordState::Recording {
                return;
            }
            inner.state = AutoRecordState::Stopping;
            inner.manager.clone()
        };

        if let Some(manager) = manager {
            if let Err(e) = manager.stop(false).await {
                warn!("Auto recording stop reported: {}", e);
            }
        }

        let mut inner = self.inner.lock().await;
        if inner.state == AutoRecordState::Stopping {
            Self::clear_locked(&mut inner);
            self.gate.end_auto();
        }
    }

    /// A manual recording is taking over: abort any in-flight auto cycle and
    /// stop a partially-started manager.
    pub async fn notify_manual_started(&self) {
        let manager = {
            let mut inner = self.inner.lock().await;
            let manager = inner.manager.take();
            let had_work = inner.state != AutoRecordState::Idle;
            Self::clear_locked(&mut inner);
            if had_work {
                info!("Manual recording override: aborting auto recording");
            }
            manager
        };
        self.gate.end_auto();
        if let Some(manager) = manager {
            let _ = manager.stop(true).await;
        }
    }

    async fn run_start(&self, generation: u64, app_name: String, title: String) {
        let manager = match self.factory.create(&app_name, &title).await {
            Ok(manager) => manager,
            Err(e) => {
                warn!("Failed to construct recording manager: {}", e);
                self.abort_start(generation).await;
                return;
            }
        };

        // A manual session may have begun while we were constructing.
        if self.is_stale(generation).await || self.manual.is_recording().await {
            info!("Auto start superseded during manager construction");
            let _ = manager.stop(true).await;
            self.abort_start(generation).await;
            return;
        }

        if let Err(e) = manager.start().await {
            warn!("Auto recording failed to start: {}", e);
            self.abort_start(generation).await;
            return;
        }

        {
            let mut inner = self.inner.lock().await;
            if inner.generation != generation || inner.state != AutoRecordState::Starting {
                drop(inner);
                let _ = manager.stop(true).await;
                self.abort_start(generation).await;
                return;
            }
            inner.state = AutoRecordState::Recording;
            inner.manager = Some(manager);
            inner.started_at = Some(Instant::now());
        }

        info!("Auto recording started for {}: {}", app_name, title);
        self.spawn_status_monitor(generation);
    }

    async fn is_stale(&self, generation: u64) -> bool {
        let inner = self.inner.lock().await;
        inner.generation != generation || inner.state != AutoRecordState::Starting
    }

    async fn abort_start(&self, generation: u64) {
        let mut inner = self.inner.lock().await;
        if inner.generation == generation {
            Self::clear_locked(&mut inner);
            self.gate.end_auto();
        }
    }

    /// Polls the manager's status, clearing state on completion and
    /// enforcing the hard duration ceiling.
    fn spawn_status_monitor(&self, generation: u64) {
        let coordinator = self.clone();
        let poll = self.config.status_poll();
        let ceiling = self.config.hard_ceiling();

        tokio::spawn(async move {
            loop {
                sleep(poll).await;

                let (manager, started_at) = {
                    let inner = coordinator.inner.lock().await;
                    if inner.generation != generation
                        || inner.state != AutoRecordState::Recording
                    {
                        return;
                    }
                    (inner.manager.clone(), inner.started_at)
                };
                let Some(manager) = manager else { return };

                if let Some(started_at) = started_at {
                    if started_at.elapsed() >= ceiling {
                        warn!("Auto recording exceeded the hard duration ceiling, forcing stop");
                        coordinator.stop_recording().await;
                        return;
                    }
                }

                let state = manager.status().await;
                match state.phase {
                    RecordingPhase::Completed
                    | RecordingPhase::Failed { .. }
                    | RecordingPhase::Idle => {
                        info!("Auto recording finished ({})", state.phase.as_str());
                        let mut inner = coordinator.inner.lock().await;
                        if inner.generation == generation {
                            Self::clear_locked(&mut inner);
                            coordinator.gate.end_auto();
                        }
                        return;
                    }
                    RecordingPhase::Capturing | RecordingPhase::Transcribing => {}
                }
            }
        });
    }

    fn clear_locked(inner: &mut CoordinatorInner) {
        inner.state = AutoRecordState::Idle;
        inner.manager = None;
        inner.started_at = None;
        inner.pending_stop = None;
        // Wraps like the atomic counters do; staleness checks only compare
        // for equality.
        inner.generation = inner.generation.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::status::RecordingState;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    pub(crate) struct MockManager {
        pub starts: AtomicUsize,
        pub stops: AtomicUsize,
        pub phase: std::sync::Mutex<RecordingPhase>,
    }

    impl MockManager {
        pub fn new() -> Self {
            Self {
                starts: AtomicUsize::new(0),
                stops: AtomicUsize::new(0),
                phase: std::sync::Mutex::new(RecordingPhase::Idle),
            }
        }
    }

    #[async_trait]
    impl RecordingManager for MockManager {
        async fn start(&self) -> Result<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            *self.phase.lock().unwrap() = RecordingPhase::Capturing;
            Ok(())
        }

        async fn stop(&self, _stopped_early: bool) -> Result<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            *self.phase.lock().unwrap() = RecordingPhase::Completed;
            Ok(())
        }

        async fn status(&self) -> RecordingState {
            RecordingState {
                phase: self.phase.lock().unwrap().clone(),
                ..Default::default()
            }
        }

        async fn update_notes(&self, _text: String) -> Result<()> {
            Ok(())
        }

        async fn summary(&self) -> Option<String> {
            None
        }
    }

    pub(crate) struct MockFactory {
        pub manager: Arc<MockManager>,
        pub creates: AtomicUsize,
    }

    #[async_trait]
    impl RecordingManagerFactory for MockFactory {
        async fn create(&self, _app: &str, _title: &str) -> Result<Arc<dyn RecordingManager>> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            Ok(self.manager.clone())
        }
    }

    pub(crate) struct MockProbe {
        pub recording: AtomicBool,
    }

    #[async_trait]
    impl ManualRecordingProbe for MockProbe {
        async fn is_recording(&self) -> bool {
            self.recording.load(Ordering::SeqCst)
        }
    }

    fn coordinator(
        manual_recording: bool,
    ) -> (AutoRecordCoordinator, Arc<MockManager>, Arc<MockFactory>) {
        let manager = Arc::new(MockManager::new());
        let factory = Arc::new(MockFactory {
            manager: manager.clone(),
            creates: AtomicUsize::new(0),
        });
        let probe = Arc::new(MockProbe {
            recording: AtomicBool::new(manual_recording),
        });
        let coordinator = AutoRecordCoordinator::new(
            Arc::new(RecordingGate::new()),
            probe,
            factory.clone(),
            Arc::new(crate::notify::LogNotifier),
            AutoRecordConfig {
                stop_grace_seconds: 1,
                ..Default::default()
            },
        );
        (coordinator, manager, factory)
    }

    async fn settle() {
        // Let spawned start tasks run.
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_two_rapid_detections_start_once() {
        let (coordinator, manager, factory) = coordinator(false);

        coordinator.on_detection("zoom", "Standup").await;
        coordinator.on_detection("zoom", "Standup").await;
        settle().await;

        assert_eq!(factory.creates.load(Ordering::SeqCst), 1);
        assert_eq!(manager.starts.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.state().await, AutoRecordState::Recording);
    }

    #[tokio::test]
    async fn test_generation_wraps_without_breaking_staleness() {
        let (coordinator, manager, _factory) = coordinator(false);
        coordinator.inner.lock().await.generation = u64::MAX;

        coordinator.on_detection("zoom", "Standup").await;
        settle().await;

        assert_eq!(manager.starts.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.state().await, AutoRecordState::Recording);
        assert_eq!(coordinator.inner.lock().await.generation, 0);
    }

    #[tokio::test]
    async fn test_detection_ignored_while_manual_active() {
        let (coordinator, manager, _factory) = coordinator(true);

        coordinator.on_detection("meet", "1:1").await;
        settle().await;

        assert_eq!(manager.starts.load(Ordering::SeqCst), 0);
        assert_eq!(coordinator.state().await, AutoRecordState::Idle);
    }

    #[tokio::test]
    async fn test_stop_recording_noop_when_idle() {
        let (coordinator, manager, _factory) = coordinator(false);
        coordinator.stop_recording().await;
        assert_eq!(manager.stops.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stop_clears_state_and_releases_gate() {
        let (coordinator, manager, _factory) = coordinator(false);

        coordinator.on_detection("zoom", "Standup").await;
        settle().await;
        coordinator.stop_recording().await;

        assert_eq!(manager.stops.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.state().await, AutoRecordState::Idle);
        assert!(coordinator.gate.begin_auto());
    }

    #[tokio::test]
    async fn test_manual_override_aborts_and_stops_manager() {
        let (coordinator, manager, _factory) = coordinator(false);

        coordinator.on_detection("zoom", "Standup").await;
        settle().await;
        assert_eq!(coordinator.state().await, AutoRecordState::Recording);

        coordinator.notify_manual_started().await;
        assert_eq!(coordinator.state().await, AutoRecordState::Idle);
        assert_eq!(manager.stops.load(Ordering::SeqCst), 1);
    }
}
