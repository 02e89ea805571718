//! Notification routing seam.
//!
//! Fire-and-forget: the core never depends on a return value, and delivery
//! failures are the implementation's problem to log.

use async_trait::async_trait;
use tracing::info;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// A meeting window was detected; prompt the user.
    async fn send_meeting_prompt(&self, app_name: &str, title: &str);

    /// A recording finished processing.
    async fn send_recording_completed(&self, title: &str, transcript_ready: bool);
}

/// Default notifier that routes everything to the log.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_meeting_prompt(&self, app_name: &str, title: &str) {
        info!("Meeting detected in {}: {}", app_name, title);
    }

    async fn send_recording_completed(&self, title: &str, transcript_ready: bool) {
        info!(
            "Recording completed: {} (transcript {})",
            title,
            if transcript_ready { "ready" } else { "unavailable" }
        );
    }
}
