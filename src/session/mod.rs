//! Capture session orchestration

pub mod controller;
pub mod state;

pub use controller::{SessionController, StartRequest, DEFAULT_FORMAT};
pub use state::{CaptureSession, SessionError, SessionEvent, SessionPhase, SessionStatus};
