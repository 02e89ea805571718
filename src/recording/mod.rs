pub mod coordinator;
pub mod gate;
pub mod health;
pub mod manager;
pub mod notes;
pub mod status;

pub use coordinator::{
    AutoRecordCoordinator, AutoRecordState, ManualRecordingProbe, RecordingManagerFactory,
};
pub use gate::RecordingGate;
pub use health::{StreamingHealth, StreamingHealthKind, StreamingMonitor};
pub use manager::{MeetingRecorder, RecordingManager};
pub use notes::{NotesSaveQueue, NotesSaveState};
pub use status::{RecordingPhase, RecordingState, RecordingStatusHandle};
