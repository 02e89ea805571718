//! Shared-ownership audio buffers and the capture session identity.
//!
//! The pool deduplicates by underlying-buffer identity: two wrap requests for
//! the same buffer id hand back the same shared handle instead of copying the
//! samples. The buffer is released exactly when the last holder drops.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Identity of one capture session. Buffers are only valid for the session
/// that was active when they were produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone)]
pub struct CaptureSession {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
}

impl CaptureSession {
    pub fn new() -> Self {
        Self {
            id: SessionId::new(),
            created_at: Utc::now(),
        }
    }
}

impl Default for CaptureSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Identity of the raw buffer handed to the pool. The capture backend derives
/// this from the callback buffer (for cpal, a per-callback sequence number).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub u64);

/// Raw audio payload, tagged with the session that produced it.
#[derive(Debug)]
pub struct AudioBuffer {
    pub session: SessionId,
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// Reference-counted handle to an [`AudioBuffer`]. Cloning shares ownership;
/// the buffer is freed when the last clone drops.
#[derive(Debug, Clone)]
pub struct PooledBuffer {
    inner: Arc<AudioBuffer>,
}

impl PooledBuffer {
    pub fn session(&self) -> SessionId {
        self.inner.session
    }

    pub fn samples(&self) -> &[f32] {
        &self.inner.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.inner.sample_rate
    }

    /// True when both handles share the same underlying buffer.
    pub fn shares_buffer_with(&self, other: &PooledBuffer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Pool of live buffers keyed by buffer identity.
///
/// Entries are weak: the pool never keeps a buffer alive on its own, it only
/// guarantees that concurrent wrap requests for the same id share one
/// allocation. Dead entries are pruned on the next wrap.
#[derive(Default)]
pub struct BufferPool {
    live: Mutex<HashMap<BufferId, Weak<AudioBuffer>>>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the shared handle for `id`, building the buffer with `make`
    /// only if no live handle exists.
    pub fn wrap(&self, id: BufferId, make: impl FnOnce() -> AudioBuffer) -> PooledBuffer {
        let mut live = self.live.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(existing) = live.get(&id).and_then(Weak::upgrade) {
            return PooledBuffer { inner: existing };
        }

        live.retain(|_, weak| weak.strong_count() > 0);

        let inner = Arc::new(make());
        live.insert(id, Arc::downgrade(&inner));
        PooledBuffer { inner }
    }

    /// Number of buffers currently kept alive by at least one holder.
    pub fn live_count(&self) -> usize {
        let live = self.live.lock().unwrap_or_else(|e| e.into_inner());
        live.values().filter(|w| w.strong_count() > 0).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(session: SessionId) -> AudioBuffer {
        AudioBuffer {
            session,
            samples: vec![0.0; 160],
            sample_rate: 16000,
        }
    }

    #[test]
    fn test_same_id_shares_one_allocation() {
        let pool = BufferPool::new();
        let session = SessionId::new();

        let a = pool.wrap(BufferId(7), || buffer(session));
        let b = pool.wrap(BufferId(7), || panic!("must not rebuild a live buffer"));

        assert!(a.shares_buffer_with(&b));
        assert_eq!(pool.live_count(), 1);
    }

    #[test]
    fn test_distinct_ids_get_distinct_buffers() {
        let pool = BufferPool::new();
        let session = SessionId::new();

        let a = pool.wrap(BufferId(1), || buffer(session));
        let b = pool.wrap(BufferId(2), || buffer(session));

        assert!(!a.shares_buffer_with(&b));
        assert_eq!(pool.live_count(), 2);
    }

    #[test]
    fn test_released_id_is_rebuilt() {
        let pool = BufferPool::new();
        let session = SessionId::new();

        let a = pool.wrap(BufferId(3), || buffer(session));
        drop(a);

        // Last holder dropped, so a new wrap must build again.
        let mut built = false;
        let _b = pool.wrap(BufferId(3), || {
            built = true;
            buffer(session)
        });
        assert!(built);
        assert_eq!(pool.live_count(), 1);
    }

    #[test]
    fn test_clone_keeps_buffer_alive() {
        let pool = BufferPool::new();
        let session = SessionId::new();

        let a = pool.wrap(BufferId(4), || buffer(session));
        let b = a.clone();
        drop(a);

        assert_eq!(pool.live_count(), 1);
        drop(b);
        assert_eq!(pool.live_count(), 0);
    }

    #[test]
    fn test_session_ids_are_unique() {
        assert_ne!(SessionId::new(), SessionId::new());
    }
}
