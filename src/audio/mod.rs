pub mod buffer_pool;
pub mod capture_engine;
pub mod mic_source;

pub use buffer_pool::{AudioBuffer, BufferId, BufferPool, CaptureSession, PooledBuffer, SessionId};
pub use capture_engine::{
    backpressure_drop_decision, should_process_buffer, BufferLogState, BufferObserver,
    CaptureEngine, CaptureError, FinalizeSummary, ObserverId,
};
pub use mic_source::{spawn_capture_thread, CaptureThread, MicSource};
