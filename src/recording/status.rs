//! Recording lifecycle status, authoritative for all observers.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::audio::SessionId;
use crate::recording::health::StreamingHealthKind;
use crate::recording::notes::NotesSaveState;

/// Phase of the recording lifecycle. Transitions move forward only
/// (idle → capturing → transcribing → completed/failed); the only way back
/// to idle is an explicit reset from a terminal phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum RecordingPhase {
    Idle,
    Capturing,
    Transcribing,
    Completed,
    Failed { reason: String },
}

impl RecordingPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Capturing => "capturing",
            Self::Transcribing => "transcribing",
            Self::Completed => "completed",
            Self::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed { .. })
    }
}

/// Snapshot of recording state, readable by API handlers and coordinators.
#[derive(Debug, Clone)]
pub struct RecordingState {
    pub phase: RecordingPhase,
    pub session: Option<SessionId>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub title: Option<String>,
    pub notes_state: NotesSaveState,
    pub streaming_health: Option<StreamingHealthKind>,
    pub last_error: Option<String>,
}

impl Default for RecordingState {
    fn default() -> Self {
        Self {
            phase: RecordingPhase::Idle,
            session: None,
            started_at: None,
            title: None,
            notes_state: NotesSaveState::Idle,
            streaming_health: None,
            last_error: None,
        }
    }
}

impl RecordingState {
    pub fn duration_seconds(&self) -> Option<u64> {
        self.started_at.map(|started| {
            let elapsed = chrono::Utc::now() - started;
            elapsed.num_seconds().max(0) as u64
        })
    }
}

/// Thread-safe handle sharing recording state between the manager and its
/// observers. The manager is the only writer.
#[derive(Clone, Default)]
pub struct RecordingStatusHandle {
    inner: Arc<Mutex<RecordingState>>,
}

impl RecordingStatusHandle {
    pub async fn get(&self) -> RecordingState {
        self.inner.lock().await.clone()
    }

    pub async fn phase(&self) -> RecordingPhase {
        self.inner.lock().await.phase.clone()
    }

    pub async fn begin_capture(&self, session: SessionId, title: Option<String>) {
        let mut state = self.inner.lock().await;
        state.phase = RecordingPhase::Capturing;
        state.session = Some(session);
        state.started_at = Some(chrono::Utc::now());
        state.title = title;
        state.streaming_health = Some(StreamingHealthKind::Connecting);
        state.last_error = None;
    }

    pub async fn set_phase(&self, phase: RecordingPhase) {
        let mut state = self.inner.lock().await;
        if let RecordingPhase::Failed { reason } = &phase {
            state.last_error = Some(reason.clone());
        }
        state.phase = phase;
    }

    pub async fn set_notes_state(&self, notes_state: NotesSaveState) {
        let mut state = self.inner.lock().await;
        state.notes_state = notes_state;
    }

    pub async fn set_streaming_health(&self, health: StreamingHealthKind) {
        let mut state = self.inner.lock().await;
        state.streaming_health = Some(health);
    }

    /// Reset back to idle, permitted only from a terminal phase.
    pub async fn reset(&self) -> bool {
        let mut state = self.inner.lock().await;
        if !state.phase.is_terminal() {
            return false;
        }
        *state = RecordingState::default();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_as_str() {
        assert_eq!(RecordingPhase::Idle.as_str(), "idle");
        assert_eq!(RecordingPhase::Capturing.as_str(), "capturing");
        assert_eq!(RecordingPhase::Transcribing.as_str(), "transcribing");
        assert_eq!(RecordingPhase::Completed.as_str(), "completed");
        assert_eq!(
            RecordingPhase::Failed {
                reason: "x".to_string()
            }
            .as_str(),
            "failed"
        );
    }

    #[test]
    fn test_phase_serialization() {
        let json = serde_json::to_string(&RecordingPhase::Capturing).unwrap();
        assert_eq!(json, r#"{"phase":"capturing"}"#);

        let failed = RecordingPhase::Failed {
            reason: "device gone".to_string(),
        };
        let json = serde_json::to_string(&failed).unwrap();
        assert!(json.contains("failed"));
        assert!(json.contains("device gone"));
    }

    #[tokio::test]
    async fn test_begin_capture_sets_session_and_health() {
        let handle = RecordingStatusHandle::default();
        let session = SessionId::new();
        handle.begin_capture(session, Some("Standup".to_string())).await;

        let state = handle.get().await;
        assert_eq!(state.phase, RecordingPhase::Capturing);
        assert_eq!(state.session, Some(session));
        assert_eq!(state.streaming_health, Some(StreamingHealthKind::Connecting));
        assert!(state.started_at.is_some());
    }

    #[tokio::test]
    async fn test_failed_phase_records_error() {
        let handle = RecordingStatusHandle::default();
        handle
            .set_phase(RecordingPhase::Failed {
                reason: "permission denied".to_string(),
            })
            .await;

        let state = handle.get().await;
        assert_eq!(state.last_error, Some("permission denied".to_string()));
    }

    #[tokio::test]
    async fn test_reset_only_from_terminal() {
        let handle = RecordingStatusHandle::default();
        handle.begin_capture(SessionId::new(), None).await;
        assert!(!handle.reset().await);
        assert_eq!(handle.get().await.phase, RecordingPhase::Capturing);

        handle.set_phase(RecordingPhase::Completed).await;
        assert!(handle.reset().await);
        assert_eq!(handle.get().await.phase, RecordingPhase::Idle);
    }
}
