//! Coalescing save queue for user-edited meeting notes.
//!
//! Autosave fires on every edit, so the queue deliberately loses the middle:
//! the operation observed while idle runs, the most recently enqueued
//! operation runs, and anything in between is superseded without running.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

type SaveOp = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Externally visible state of the save queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum NotesSaveState {
    Idle,
    /// A save is in flight and `depth` further enqueues are coalesced into
    /// the single pending slot.
    Queued { depth: u64 },
    Saving,
    Failed { reason: String },
}

struct QueueInner {
    in_flight: bool,
    pending: Option<SaveOp>,
    coalesced: u64,
    state: NotesSaveState,
}

#[derive(Clone)]
pub struct NotesSaveQueue {
    inner: Arc<Mutex<QueueInner>>,
}

impl Default for NotesSaveQueue {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(QueueInner {
                in_flight: false,
                pending: None,
                coalesced: 0,
                state: NotesSaveState::Idle,
            })),
        }
    }
}

impl NotesSaveQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> NotesSaveState {
        self.lock().state.clone()
    }

    pub fn is_saving(&self) -> bool {
        self.lock().in_flight
    }

    /// Enqueue a save operation.
    ///
    /// If the queue is idle the operation starts immediately; otherwise it
    /// replaces whatever was pending, and runs once the in-flight operation
    /// completes.
    pub fn enqueue<F>(&self, op: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let op: SaveOp = Box::pin(op);
        let mut inner = self.lock();

        if inner.in_flight {
            if inner.pending.replace(op).is_some() {
                debug!("Notes save superseded by a newer edit");
            }
            inner.coalesced += 1;
            inner.state = NotesSaveState::Queued {
                depth: inner.coalesced,
            };
            return;
        }

        inner.in_flight = true;
        inner.state = NotesSaveState::Saving;
        drop(inner);

        let queue = self.clone();
        tokio::spawn(async move {
            queue.run(op).await;
        });
    }

    async fn run(&self, first: SaveOp) {
        let mut op = first;
        loop {
            let result = op.await;

            let mut inner = self.lock();
            if let Err(e) = &result {
                warn!("Notes save failed: {}", e);
                inner.state = NotesSaveState::Failed {
                    reason: e.to_string(),
                };
            }

            match inner.pending.take() {
                Some(next) => {
                    inner.coalesced = 0;
                    inner.state = NotesSaveState::Saving;
                    drop(inner);
                    op = next;
                }
                None => {
                    inner.in_flight = false;
                    inner.coalesced = 0;
                    if result.is_ok() {
                        inner.state = NotesSaveState::Idle;
                    }
                    break;
                }
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_idle_enqueue_runs_immediately() {
        let queue = NotesSaveQueue::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let ran_clone = ran.clone();

        queue.enqueue(async move {
            ran_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(queue.state(), NotesSaveState::Idle);
    }

    #[tokio::test]
    async fn test_busy_enqueues_coalesce_to_latest() {
        let queue = NotesSaveQueue::new();
        let (block_tx, block_rx) = tokio::sync::oneshot::channel::<()>();
        let executed = Arc::new(Mutex::new(Vec::new()));

        let executed_first = executed.clone();
        queue.enqueue(async move {
            block_rx.await.ok();
            executed_first.lock().unwrap().push("first");
            Ok(())
        });

        // Wait for the first op to be in flight before piling on.
        tokio::time::sleep(Duration::from_millis(20)).await;
        for label in ["second", "third", "fourth", "last"] {
            let executed = executed.clone();
            queue.enqueue(async move {
                executed.lock().unwrap().push(label);
                Ok(())
            });
        }

        assert_eq!(queue.state(), NotesSaveState::Queued { depth: 4 });

        block_tx.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let executed = executed.lock().unwrap().clone();
        assert_eq!(executed, vec!["first", "last"]);
        assert_eq!(queue.state(), NotesSaveState::Idle);
    }

    #[tokio::test]
    async fn test_failure_surfaces_in_state() {
        let queue = NotesSaveQueue::new();
        queue.enqueue(async { anyhow::bail!("disk full") });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            queue.state(),
            NotesSaveState::Failed {
                reason: "disk full".to_string()
            }
        );
        assert!(!queue.is_saving());
    }

    #[tokio::test]
    async fn test_pending_runs_after_failure() {
        let queue = NotesSaveQueue::new();
        let (block_tx, block_rx) = tokio::sync::oneshot::channel::<()>();
        let ran = Arc::new(AtomicUsize::new(0));

        queue.enqueue(async move {
            block_rx.await.ok();
            anyhow::bail!("save rejected")
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let ran_clone = ran.clone();
        queue.enqueue(async move {
            ran_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        block_tx.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(queue.state(), NotesSaveState::Idle);
    }
}
