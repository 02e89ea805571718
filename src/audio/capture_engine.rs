//! Capture engine: session identity, observer fan-out, backpressure.
//!
//! The engine sits between the real-time capture callback and everything
//! downstream. Buffers are validated against the active session, counted
//! against a backpressure limit, and fanned out to registered observers.
//! `notify_observers` runs on the capture thread and must never block;
//! everything else is called from async context.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::buffer_pool::{CaptureSession, PooledBuffer, SessionId};

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no input device available")]
    DeviceUnavailable,
    #[error("microphone permission denied")]
    PermissionDenied,
    #[error("capture session is finalizing, registration rejected")]
    Finalizing,
    #[error("audio stream error: {0}")]
    Stream(String),
}

pub type ObserverId = u64;

/// Buffer delivery callback. Runs on the capture thread; implementations are
/// expected to hand off quickly (e.g. a channel try_send).
pub type BufferObserver = Arc<dyn Fn(PooledBuffer) + Send + Sync>;

/// True iff the buffer belongs to the session the observer registered for
/// and capture is actually running. Stale-session buffers are never
/// processed, even if they arrive after a new session has started.
pub fn should_process_buffer(
    is_recording: bool,
    observer_session: SessionId,
    buffer_session: SessionId,
) -> bool {
    is_recording && observer_session == buffer_session
}

/// True (drop the buffer) iff `pending` has already reached the cap.
pub fn backpressure_drop_decision(pending: u64, max: u64) -> bool {
    pending >= max
}

/// Buffer-logging policy: log every one of the first `burst` buffers, then
/// every `stride`-th buffer thereafter.
#[derive(Debug, Default, Clone)]
pub struct BufferLogState {
    pub total_seen: u32,
    pub burst_done: bool,
}

impl BufferLogState {
    /// Advance by one buffer and decide whether this one gets logged.
    ///
    /// The counter wraps back to `burst` instead of overflowing; the wrap
    /// marks the burst as already completed so it cannot re-trigger another
    /// full burst of logs.
    pub fn advance_logging_decision(&mut self, burst: u32, stride: u32) -> bool {
        self.total_seen = match self.total_seen.checked_add(1) {
            Some(n) => n,
            None => {
                self.burst_done = true;
                burst
            }
        };

        if !self.burst_done && self.total_seen <= burst {
            if self.total_seen == burst {
                self.burst_done = true;
            }
            return true;
        }

        self.burst_done = true;
        stride > 0 && self.total_seen % stride == 0
    }
}

struct ObserverRegistry {
    next_id: ObserverId,
    observers: Vec<(ObserverId, BufferObserver)>,
    accepting: bool,
}

impl ObserverRegistry {
    fn new() -> Self {
        Self {
            next_id: 1,
            observers: Vec::new(),
            accepting: false,
        }
    }
}

/// Outcome of finalizing a capture session, for logging and diagnostics.
#[derive(Debug, Clone)]
pub struct FinalizeSummary {
    pub session: Option<SessionId>,
    pub stopped_early: bool,
    pub buffers_dropped: u64,
    pub counter_underflows: u64,
    pub drain_timed_out: bool,
}

/// Single owner of capture-session state. All mutation goes through its
/// public operations; the only state shared beyond it is the buffer pool's
/// reference count.
pub struct CaptureEngine {
    session: Mutex<Option<CaptureSession>>,
    registry: Mutex<ObserverRegistry>,
    pending: AtomicU64,
    dropped: AtomicU64,
    underflows: AtomicU64,
    max_pending: u64,
    log_state: Mutex<BufferLogState>,
    log_burst: u32,
    log_stride: u32,
}

/// Bound on waiting for in-flight dispatches during finalize. A stuck
/// observer must not wedge shutdown; past this we clear anyway.
const DRAIN_WAIT_MAX: Duration = Duration::from_secs(2);
const DRAIN_POLL: Duration = Duration::from_millis(5);

impl CaptureEngine {
    pub fn new(max_pending: u64, log_burst: u32, log_stride: u32) -> Self {
        Self {
            session: Mutex::new(None),
            registry: Mutex::new(ObserverRegistry::new()),
            pending: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            underflows: AtomicU64::new(0),
            max_pending,
            log_state: Mutex::new(BufferLogState::default()),
            log_burst,
            log_stride,
        }
    }

    /// Begin a new capture session, superseding any previous one. Buffers
    /// tagged with the old session id will be dropped from here on.
    pub fn begin_session(&self) -> CaptureSession {
        let session = CaptureSession::new();

        {
            let mut registry = self.lock_registry();
            registry.accepting = true;
        }
        {
            let mut log_state = self.lock_log_state();
            *log_state = BufferLogState::default();
        }
        self.pending.store(0, Ordering::SeqCst);
        self.dropped.store(0, Ordering::SeqCst);
        self.underflows.store(0, Ordering::SeqCst);

        let mut current = self.lock_session();
        *current = Some(session.clone());
        info!("Capture session {} started", session.id);
        session
    }

    pub fn current_session(&self) -> Option<SessionId> {
        self.lock_session().as_ref().map(|s| s.id)
    }

    pub fn is_recording(&self) -> bool {
        self.lock_session().is_some()
    }

    /// Register a buffer observer for the active session.
    pub fn register_observer(&self, observer: BufferObserver) -> Result<ObserverId, CaptureError> {
        let mut registry = self.lock_registry();
        if !registry.accepting {
            return Err(CaptureError::Finalizing);
        }
        let id = registry.next_id;
        registry.next_id += 1;
        registry.observers.push((id, observer));
        debug!("Observer {} registered", id);
        Ok(id)
    }

    pub fn unregister_observer(&self, id: ObserverId) {
        let mut registry = self.lock_registry();
        registry.observers.retain(|(oid, _)| *oid != id);
    }

    pub fn observer_count(&self) -> usize {
        self.lock_registry().observers.len()
    }

    pub fn pending_count(&self) -> u64 {
        self.pending.load(Ordering::SeqCst)
    }

    /// Deliver one buffer to all observers.
    ///
    /// Buffers that fail session validation are dropped unconditionally.
    /// Buffers over the backpressure cap are dropped without touching the
    /// counter. Runs on the capture thread.
    pub fn notify_observers(&self, buffer: PooledBuffer, buffer_session: SessionId) {
        let (is_recording, observer_session) = {
            let session = self.lock_session();
            match session.as_ref() {
                Some(s) => (true, s.id),
                None => (false, buffer_session),
            }
        };

        if !should_process_buffer(is_recording, observer_session, buffer_session) {
            debug!("Dropping buffer from stale session {}", buffer_session);
            return;
        }

        // Check-and-increment is one atomic step so concurrent notifies can
        // never push the counter past the cap.
        let admitted = self
            .pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |pending| {
                if backpressure_drop_decision(pending, self.max_pending) {
                    None
                } else {
                    Some(pending + 1)
                }
            });
        let pending = match admitted {
            Ok(prev) => prev,
            Err(prev) => {
                let dropped = self.dropped.fetch_add(1, Ordering::SeqCst) + 1;
                debug!(
                    "Backpressure drop ({} pending, {} dropped total)",
                    prev, dropped
                );
                return;
            }
        };

        let should_log = {
            let mut log_state = self.lock_log_state();
            log_state.advance_logging_decision(self.log_burst, self.log_stride)
        };
        if should_log {
            let total = self.lock_log_state().total_seen;
            debug!(
                "Buffer {} for session {}: {} samples, {} in flight",
                total,
                buffer_session,
                buffer.samples().len(),
                pending
            );
        }

        {
            let registry = self.lock_registry();
            for (_, observer) in &registry.observers {
                observer(buffer.clone());
            }
        }

        self.decrement_pending();
    }

    /// Stop the session: refuse new registrations, wait for in-flight
    /// dispatches to drain, then clear every observer. An observer racing
    /// with finalize never survives it.
    pub async fn finalize_recording(&self, stopped_early: bool) -> FinalizeSummary {
        let session = {
            let mut current = self.lock_session();
            current.take().map(|s| s.id)
        };

        {
            let mut registry = self.lock_registry();
            registry.accepting = false;
        }

        let mut drain_timed_out = false;
        let mut waited = Duration::ZERO;
        while self.pending.load(Ordering::SeqCst) > 0 {
            if waited >= DRAIN_WAIT_MAX {
                drain_timed_out = true;
                warn!(
                    "Finalize drain timed out with {} buffers still in flight",
                    self.pending.load(Ordering::SeqCst)
                );
                break;
            }
            tokio::time::sleep(DRAIN_POLL).await;
            waited += DRAIN_POLL;
        }

        let cleared = {
            let mut registry = self.lock_registry();
            let n = registry.observers.len();
            registry.observers.clear();
            n
        };

        let summary = FinalizeSummary {
            session,
            stopped_early,
            buffers_dropped: self.dropped.load(Ordering::SeqCst),
            counter_underflows: self.underflows.load(Ordering::SeqCst),
            drain_timed_out,
        };

        if summary.counter_underflows > 0 {
            warn!(
                "Capture finalized with {} counter underflow(s) recorded",
                summary.counter_underflows
            );
        }
        info!(
            "Capture finalized (session {:?}, {} observers cleared, {} buffers dropped)",
            summary.session, cleared, summary.buffers_dropped
        );
        summary
    }

    /// Decrement the in-flight counter, clamping at zero. An underflow means
    /// a double-decrement upstream; it is recorded, not raised.
    fn decrement_pending(&self) {
        let prev = self
            .pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                Some(n.saturating_sub(1))
            })
            .unwrap_or(0);
        if prev == 0 {
            let count = self.underflows.fetch_add(1, Ordering::SeqCst) + 1;
            warn!("Pending-buffer counter underflow clamped to zero ({} total)", count);
        }
    }

    fn lock_session(&self) -> std::sync::MutexGuard<'_, Option<CaptureSession>> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_registry(&self) -> std::sync::MutexGuard<'_, ObserverRegistry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_log_state(&self) -> std::sync::MutexGuard<'_, BufferLogState> {
        self.log_state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
