//! Microphone capture via cpal, wired to the capture engine.
//!
//! The cpal callback wraps each chunk through the buffer pool (so the
//! observer fan-out shares one allocation per chunk) and hands it to
//! `CaptureEngine::notify_observers` tagged with the session that was
//! active when the stream started.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{debug, error, info};

use super::buffer_pool::{AudioBuffer, BufferId, BufferPool, SessionId};
use super::capture_engine::{CaptureEngine, CaptureError};

/// Backend errors don't expose a permission variant; cpal reports denial as
/// a backend-specific message, so we classify by description.
fn is_permission_denial(description: &str) -> bool {
    let lower = description.to_ascii_lowercase();
    lower.contains("permission") || lower.contains("denied") || lower.contains("not permitted")
}

fn classify_build_error(err: cpal::BuildStreamError) -> CaptureError {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => CaptureError::DeviceUnavailable,
        cpal::BuildStreamError::BackendSpecific { ref err }
            if is_permission_denial(&err.description) =>
        {
            CaptureError::PermissionDenied
        }
        other => CaptureError::Stream(other.to_string()),
    }
}

fn classify_play_error(err: cpal::PlayStreamError) -> CaptureError {
    match err {
        cpal::PlayStreamError::DeviceNotAvailable => CaptureError::DeviceUnavailable,
        cpal::PlayStreamError::BackendSpecific { ref err }
            if is_permission_denial(&err.description) =>
        {
            CaptureError::PermissionDenied
        }
        other => CaptureError::Stream(other.to_string()),
    }
}

pub struct MicSource {
    device: cpal::Device,
    config: cpal::StreamConfig,
    stream: Option<cpal::Stream>,
    active: bool,
    sample_rate: u32,
}

impl MicSource {
    /// Create a mic source using the default input device.
    pub fn new(sample_rate: u32) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or(CaptureError::DeviceUnavailable)
            .context("No input device available for capture")?;

        info!(
            "Mic source using device: {}",
            device.name().unwrap_or_else(|_| "unknown".to_string())
        );

        let config = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        Ok(Self {
            device,
            config,
            stream: None,
            active: false,
            sample_rate,
        })
    }

    /// Start streaming buffers for `session` into `engine`.
    pub fn start(
        &mut self,
        engine: Arc<CaptureEngine>,
        pool: Arc<BufferPool>,
        session: SessionId,
    ) -> Result<()> {
        if self.active {
            anyhow::bail!("Mic source already capturing");
        }

        let sample_rate = self.sample_rate;
        let chunk_seq = AtomicU64::new(0);
        let err_fn = |err| error!("Mic stream error: {}", err);

        let stream = self
            .device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let id = BufferId(chunk_seq.fetch_add(1, Ordering::Relaxed));
                    let samples = data.to_vec();
                    let buffer = pool.wrap(id, || AudioBuffer {
                        session,
                        samples,
                        sample_rate,
                    });
                    engine.notify_observers(buffer, session);
                },
                err_fn,
                None,
            )
            .map_err(classify_build_error)
            .context("Failed to build input stream")?;

        stream
            .play()
            .map_err(classify_play_error)
            .context("Failed to start input stream")?;
        self.stream = Some(stream);
        self.active = true;

        info!("Mic capture started for session {}", session);
        Ok(())
    }

    /// Stop streaming. The engine's finalize handles observer teardown.
    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            debug!("Stopping mic stream");
            drop(stream);
        }
        self.active = false;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Drop for MicSource {
    fn drop(&mut self) {
        if self.active {
            debug!("Dropping active MicSource, cleaning up");
            self.stop();
        }
    }
}

/// Handle to a capture thread. cpal streams are not `Send`, so the stream
/// lives on its own thread and is torn down through this handle.
pub struct CaptureThread {
    stop_tx: std::sync::mpsc::Sender<()>,
    join: Option<std::thread::JoinHandle<()>>,
}

impl CaptureThread {
    pub fn stop(mut self) {
        let _ = self.stop_tx.send(());
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                error!("Capture thread panicked during shutdown");
            }
        }
    }
}

impl Drop for CaptureThread {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Spawn a thread that captures mic audio for `session` into `engine` until
/// stopped. Device and permission errors surface to the caller.
pub fn spawn_capture_thread(
    engine: Arc<CaptureEngine>,
    pool: Arc<BufferPool>,
    session: SessionId,
    sample_rate: u32,
) -> Result<CaptureThread> {
    let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();
    let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<()>>();

    let join = std::thread::Builder::new()
        .name("confab-capture".to_string())
        .spawn(move || {
            let mut source = match MicSource::new(sample_rate) {
                Ok(source) => source,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            if let Err(e) = source.start(engine, pool, session) {
                let _ = ready_tx.send(Err(e));
                return;
            }
            let _ = ready_tx.send(Ok(()));

            // Hold the stream until asked to stop (or the sender drops).
            let _ = stop_rx.recv();
            source.stop();
        })
        .context("Failed to spawn capture thread")?;

    ready_rx
        .recv_timeout(std::time::Duration::from_secs(5))
        .context("Capture thread did not report readiness")??;

    Ok(CaptureThread {
        stop_tx,
        join: Some(join),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend_error(description: &str) -> cpal::BackendSpecificError {
        cpal::BackendSpecificError {
            description: description.to_string(),
        }
    }

    #[test]
    fn test_missing_device_maps_to_device_unavailable() {
        let err = classify_build_error(cpal::BuildStreamError::DeviceNotAvailable);
        assert!(matches!(err, CaptureError::DeviceUnavailable));
    }

    #[test]
    fn test_permission_denial_maps_to_permission_denied() {
        let err = classify_build_error(cpal::BuildStreamError::BackendSpecific {
            err: backend_error("Microphone access denied by the user"),
        });
        assert!(matches!(err, CaptureError::PermissionDenied));

        let err = classify_play_error(cpal::PlayStreamError::BackendSpecific {
            err: backend_error("Operation not permitted"),
        });
        assert!(matches!(err, CaptureError::PermissionDenied));
    }

    #[test]
    fn test_other_backend_errors_map_to_stream() {
        let err = classify_build_error(cpal::BuildStreamError::StreamConfigNotSupported);
        assert!(matches!(err, CaptureError::Stream(_)));

        let err = classify_play_error(cpal::PlayStreamError::BackendSpecific {
            err: backend_error("Device disconnected mid stream"),
        });
        assert!(matches!(err, CaptureError::Stream(_)));
    }
}
