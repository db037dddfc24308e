//! Screen capture
//!
//! The capture source grants a live video track; the recorder consumes it.

pub mod permissions;
pub mod screen;
pub mod traits;

pub use screen::{get_displays, ScreenCaptureSource};
pub use traits::{
    check_origin, CaptureError, CaptureRequest, CaptureResult, CaptureSource, DisplayInfo,
    TrackInput, VideoTrack,
};
