//! Concurrency behavior of the capture engine under contention.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use confab::audio::{AudioBuffer, BufferId, BufferPool, CaptureEngine, SessionId};

fn make_buffer(pool: &BufferPool, id: u64, session: SessionId) -> confab::audio::PooledBuffer {
    pool.wrap(BufferId(id), || AudioBuffer {
        session,
        samples: vec![0.0; 160],
        sample_rate: 16000,
    })
}

#[tokio::test]
async fn concurrent_notifies_never_exceed_pending_cap() {
    const MAX_PENDING: u64 = 4;
    const THREADS: usize = 8;
    const BUFFERS_PER_THREAD: u64 = 50;

    let engine = Arc::new(CaptureEngine::new(MAX_PENDING, 5, 50));
    let pool = Arc::new(BufferPool::new());
    let session = engine.begin_session();

    let max_observed = Arc::new(AtomicU64::new(0));
    let delivered = Arc::new(AtomicUsize::new(0));

    let observed = max_observed.clone();
    let count = delivered.clone();
    let probe = engine.clone();
    engine
        .register_observer(Arc::new(move |_| {
            let pending = probe.pending_count();
            observed.fetch_max(pending, Ordering::SeqCst);
            count.fetch_add(1, Ordering::SeqCst);
            // Hold buffers in flight long enough for contention to build.
            thread::sleep(Duration::from_millis(2));
        }))
        .unwrap();

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let engine = engine.clone();
            let pool = pool.clone();
            let session_id = session.id;
            thread::spawn(move || {
                for i in 0..BUFFERS_PER_THREAD {
                    let id = (t as u64) * BUFFERS_PER_THREAD + i;
                    engine.notify_observers(make_buffer(&pool, id, session_id), session_id);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(
        max_observed.load(Ordering::SeqCst) <= MAX_PENDING,
        "pending counter exceeded the cap: {}",
        max_observed.load(Ordering::SeqCst)
    );
    assert!(delivered.load(Ordering::SeqCst) > 0);
    assert_eq!(engine.pending_count(), 0);

    let summary = engine.finalize_recording(false).await;
    assert_eq!(summary.counter_underflows, 0);
}

#[tokio::test]
async fn observer_racing_finalize_never_survives_it() {
    let engine = Arc::new(CaptureEngine::new(32, 5, 50));
    engine.begin_session();

    let racer = engine.clone();
    let registrations = thread::spawn(move || {
        let mut accepted = 0u32;
        loop {
            match racer.register_observer(Arc::new(|_| {})) {
                Ok(_) => accepted += 1,
                Err(_) => return accepted,
            }
            thread::sleep(Duration::from_micros(100));
        }
    });

    tokio::time::sleep(Duration::from_millis(5)).await;
    engine.finalize_recording(false).await;

    // The racer stops as soon as registration is refused.
    registrations.join().unwrap();
    assert_eq!(engine.observer_count(), 0);
}

#[tokio::test]
async fn buffers_after_new_session_ignore_old_tag() {
    let engine = Arc::new(CaptureEngine::new(32, 5, 50));
    let pool = BufferPool::new();

    let first = engine.begin_session();
    let second = engine.begin_session();

    let seen = Arc::new(AtomicUsize::new(0));
    let seen_clone = seen.clone();
    engine
        .register_observer(Arc::new(move |_| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();

    engine.notify_observers(make_buffer(&pool, 1, first.id), first.id);
    engine.notify_observers(make_buffer(&pool, 2, second.id), second.id);

    assert_eq!(seen.load(Ordering::SeqCst), 1);
}
