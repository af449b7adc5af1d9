pub mod recorder;
pub mod types;

pub use recorder::{CaptureOutcome, CaptureService, PendingWrite, Rejection, SocketRecorder};
pub use types::{HttpCapture, RawHttpRequest, SocketEvent};
