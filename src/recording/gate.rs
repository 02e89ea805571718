//! Exclusivity arbiter between manual and automatic recording.
//!
//! Manual and auto can never both hold the gate. Every read and write goes
//! through this single owner; callers never see the flags directly.

use std::sync::{Mutex, MutexGuard};

use tracing::{debug, info};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct GateState {
    manual_active: bool,
    auto_active: bool,
}

#[derive(Debug, Default)]
pub struct RecordingGate {
    state: Mutex<GateState>,
}

impl RecordingGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the gate for a manual recording. Fails if an auto recording
    /// holds it.
    pub fn begin_manual(&self) -> bool {
        let mut state = self.lock();
        if state.auto_active {
            debug!("Manual recording rejected: auto recording active");
            return false;
        }
        state.manual_active = true;
        true
    }

    /// Claim the gate for an auto recording. Fails if anything holds it.
    pub fn begin_auto(&self) -> bool {
        let mut state = self.lock();
        if state.manual_active || state.auto_active {
            debug!("Auto recording rejected: gate already held");
            return false;
        }
        state.auto_active = true;
        true
    }

    pub fn end_manual(&self) {
        let mut state = self.lock();
        state.manual_active = false;
    }

    pub fn end_auto(&self) {
        let mut state = self.lock();
        state.auto_active = false;
    }

    /// Unconditionally claim manual, clearing auto. Used when the user
    /// explicitly overrides an in-progress automatic session.
    pub fn force_manual(&self) {
        let mut state = self.lock();
        if state.auto_active {
            info!("Manual recording overriding active auto recording");
        }
        state.auto_active = false;
        state.manual_active = true;
    }

    pub fn is_manual_active(&self) -> bool {
        self.lock().manual_active
    }

    pub fn is_auto_active(&self) -> bool {
        self.lock().auto_active
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
