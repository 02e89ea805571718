//! Streaming-health classification for the live transcription stream.
//!
//! The decision logic is pure (`compute_streaming_health` takes `now`
//! explicitly); [`StreamingMonitor`] wraps it with the mutable snapshot the
//! recording manager's poll loop drives.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Health of the transcription stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamingHealth {
    /// No token received yet.
    Connecting,
    /// Tokens flowing; `last_update` is the most recent one.
    Active { last_update: Instant },
    /// No progress past the stall threshold.
    Stalled { last_update: Option<Instant> },
}

/// Instant-free view of [`StreamingHealth`] for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamingHealthKind {
    Connecting,
    Active,
    Stalled,
}

impl From<&StreamingHealth> for StreamingHealthKind {
    fn from(health: &StreamingHealth) -> Self {
        match health {
            StreamingHealth::Connecting => Self::Connecting,
            StreamingHealth::Active { .. } => Self::Active,
            StreamingHealth::Stalled { .. } => Self::Stalled,
        }
    }
}

/// Everything the transition function needs to know about the monitor.
#[derive(Debug, Clone)]
pub struct HealthSnapshot {
    pub started_at: Instant,
    pub last_update: Option<Instant>,
    pub health: StreamingHealth,
    pub stall_threshold: Duration,
    pub first_token_grace: Duration,
    pub max_elapsed: Duration,
    /// Latch: the pre-token stall is logged exactly once.
    pub pre_token_stall_logged: bool,
}

/// Outcome of one health evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum HealthDecision {
    NoChange,
    Transition {
        health: StreamingHealth,
        message: Option<String>,
    },
    /// The monitor has exceeded its maximum lifetime; stop it entirely.
    StopMonitoring,
}

/// Classify stream health at `now`.
///
/// Before the first token, silence within the grace period is never a stall;
/// past the grace period it is, logged once via the latch. After the first
/// token, silence past the stall threshold stalls the stream, and any fresh
/// update while stalled brings it back to active with a recovery message.
pub fn compute_streaming_health(snapshot: &HealthSnapshot, now: Instant) -> HealthDecision {
    if now.duration_since(snapshot.started_at) > snapshot.max_elapsed {
        return HealthDecision::StopMonitoring;
    }

    let Some(last_update) = snapshot.last_update else {
        // Pre-first-token: only the grace period matters.
        if now.duration_since(snapshot.started_at) <= snapshot.first_token_grace {
            return HealthDecision::NoChange;
        }
        if snapshot.pre_token_stall_logged {
            return HealthDecision::NoChange;
        }
        return HealthDecision::Transition {
            health: StreamingHealth::Stalled { last_update: None },
            message: Some(format!(
                "No transcription tokens after {}s grace period",
                snapshot.first_token_grace.as_secs()
            )),
        };
    };

    let since_update = now.duration_since(last_update);
    match snapshot.health {
        // Any update newer than the one we stalled on recovers the stream,
        // no matter how late the evaluation runs.
        StreamingHealth::Stalled {
            last_update: stalled_at,
        } if stalled_at.is_none_or(|at| last_update > at) => HealthDecision::Transition {
            health: StreamingHealth::Active { last_update },
            message: Some("Transcription stream recovered".to_string()),
        },
        StreamingHealth::Connecting if since_update <= snapshot.stall_threshold => {
            HealthDecision::Transition {
                health: StreamingHealth::Active { last_update },
                message: None,
            }
        }
        StreamingHealth::Active { .. } | StreamingHealth::Connecting
            if since_update > snapshot.stall_threshold =>
        {
            HealthDecision::Transition {
                health: StreamingHealth::Stalled {
                    last_update: Some(last_update),
                },
                message: Some(format!(
                    "Transcription stream stalled ({}s without updates)",
                    since_update.as_secs()
                )),
            }
        }
        _ => HealthDecision::NoChange,
    }
}

/// Mutable monitor state driven by the manager's poll loop.
#[derive(Debug)]
pub struct StreamingMonitor {
    snapshot: HealthSnapshot,
    pub first_token_latency: Option<Duration>,
}

impl StreamingMonitor {
    pub fn new(
        now: Instant,
        stall_threshold: Duration,
        first_token_grace: Duration,
        max_elapsed: Duration,
    ) -> Self {
        Self {
            snapshot: HealthSnapshot {
                started_at: now,
                last_update: None,
                health: StreamingHealth::Connecting,
                stall_threshold,
                first_token_grace,
                max_elapsed,
                pre_token_stall_logged: false,
            },
            first_token_latency: None,
        }
    }

    /// Record a stream update (e.g. a new transcript segment arrived).
    pub fn record_update(&mut self, now: Instant) {
        if self.first_token_latency.is_none() {
            self.first_token_latency = Some(now.duration_since(self.snapshot.started_at));
        }
        self.snapshot.last_update = Some(now);
    }

    pub fn health(&self) -> StreamingHealth {
        self.snapshot.health
    }

    pub fn kind(&self) -> StreamingHealthKind {
        (&self.snapshot.health).into()
    }

    /// Evaluate at `now`, applying any transition to the snapshot. The
    /// returned decision carries the message for the caller to log.
    pub fn tick(&mut self, now: Instant) -> HealthDecision {
        let decision = compute_streaming_health(&self.snapshot, now);
        if let HealthDecision::Transition { health, .. } = &decision {
            if matches!(health, StreamingHealth::Stalled { last_update: None }) {
                self.snapshot.pre_token_stall_logged = true;
            }
            self.snapshot.health = *health;
        }
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(started_at: Instant) -> HealthSnapshot {
        HealthSnapshot {
            started_at,
            last_update: None,
            health: StreamingHealth::Connecting,
            stall_threshold: Duration::from_secs(8),
            first_token_grace: Duration::from_secs(30),
            max_elapsed: Duration::from_secs(3600),
            pre_token_stall_logged: false,
        }
    }

    #[test]
    fn test_silence_within_grace_is_not_a_stall() {
        let t0 = Instant::now();
        let snap = snapshot(t0);
        let decision = compute_streaming_health(&snap, t0 + Duration::from_secs(20));
        assert_eq!(decision, HealthDecision::NoChange);
    }

    #[test]
    fn test_pre_token_stall_fires_exactly_once() {
        let t0 = Instant::now();
        let mut monitor = StreamingMonitor::new(
            t0,
            Duration::from_secs(8),
            Duration::from_secs(30),
            Duration::from_secs(3600),
        );

        // 40s with no token on an 8s threshold / 30s grace: one stall.
        let first = monitor.tick(t0 + Duration::from_secs(40));
        assert!(matches!(
            first,
            HealthDecision::Transition {
                health: StreamingHealth::Stalled { last_update: None },
                message: Some(_)
            }
        ));

        // Latched: no duplicate log on later ticks.
        let second = monitor.tick(t0 + Duration::from_secs(41));
        assert_eq!(second, HealthDecision::NoChange);
    }

    #[test]
    fn test_active_stream_stalls_past_threshold() {
        let t0 = Instant::now();
        let mut snap = snapshot(t0);
        let token_at = t0 + Duration::from_secs(10);
        snap.last_update = Some(token_at);
        snap.health = StreamingHealth::Active {
            last_update: token_at,
        };

        let decision = compute_streaming_health(&snap, token_at + Duration::from_secs(9));
        assert!(matches!(
            decision,
            HealthDecision::Transition {
                health: StreamingHealth::Stalled { .. },
                message: Some(_)
            }
        ));
    }

    #[test]
    fn test_update_while_stalled_recovers() {
        let t0 = Instant::now();
        let mut monitor = StreamingMonitor::new(
            t0,
            Duration::from_secs(5),
            Duration::from_secs(1),
            Duration::from_secs(3600),
        );
        monitor.record_update(t0 + Duration::from_secs(2));

        // Stall it.
        let stalled = monitor.tick(t0 + Duration::from_secs(10));
        assert!(matches!(
            stalled,
            HealthDecision::Transition {
                health: StreamingHealth::Stalled { .. },
                ..
            }
        ));

        // Fresh update within 9s: back to active with a recovery message.
        monitor.record_update(t0 + Duration::from_secs(11));
        let recovered = monitor.tick(t0 + Duration::from_secs(12));
        match recovered {
            HealthDecision::Transition {
                health: StreamingHealth::Active { .. },
                message: Some(message),
            } => assert!(message.contains("recovered")),
            other => panic!("expected recovery, got {:?}", other),
        }
    }

    #[test]
    fn test_late_evaluation_of_update_while_stalled_still_recovers() {
        let t0 = Instant::now();
        let mut monitor = StreamingMonitor::new(
            t0,
            Duration::from_secs(5),
            Duration::from_secs(1),
            Duration::from_secs(3600),
        );
        monitor.record_update(t0 + Duration::from_secs(2));
        monitor.tick(t0 + Duration::from_secs(10));
        assert_eq!(monitor.kind(), StreamingHealthKind::Stalled);

        // The update lands at t+11 but the poll loop only gets around to it
        // at t+20, well past the 5s threshold. It must still recover.
        monitor.record_update(t0 + Duration::from_secs(11));
        let recovered = monitor.tick(t0 + Duration::from_secs(20));
        match recovered {
            HealthDecision::Transition {
                health: StreamingHealth::Active { .. },
                message: Some(message),
            } => assert!(message.contains("recovered")),
            other => panic!("expected recovery, got {:?}", other),
        }
    }

    #[test]
    fn test_first_token_transitions_connecting_to_active() {
        let t0 = Instant::now();
        let mut monitor = StreamingMonitor::new(
            t0,
            Duration::from_secs(8),
            Duration::from_secs(30),
            Duration::from_secs(3600),
        );
        monitor.record_update(t0 + Duration::from_secs(3));

        let decision = monitor.tick(t0 + Duration::from_secs(4));
        assert!(matches!(
            decision,
            HealthDecision::Transition {
                health: StreamingHealth::Active { .. },
                message: None
            }
        ));
        assert_eq!(monitor.first_token_latency, Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_max_elapsed_stops_monitoring() {
        let t0 = Instant::now();
        let mut snap = snapshot(t0);
        snap.max_elapsed = Duration::from_secs(100);
        let decision = compute_streaming_health(&snap, t0 + Duration::from_secs(101));
        assert_eq!(decision, HealthDecision::StopMonitoring);
    }

    #[test]
    fn test_stop_takes_priority_over_stall() {
        let t0 = Instant::now();
        let mut snap = snapshot(t0);
        snap.max_elapsed = Duration::from_secs(35);
        // Past both grace and max elapsed: stopping wins.
        let decision = compute_streaming_health(&snap, t0 + Duration::from_secs(40));
        assert_eq!(decision, HealthDecision::StopMonitoring);
    }
}
