//! Recording system module
//!
//! - Codec selection over whatever encoders the host supports
//! - EncoderBackend trait with an ffmpeg implementation
//! - Recorder driving one encoder per capture
//! - Recording buffer and assembly into a finished recording

pub mod buffer;
pub mod codec;
pub mod coordinator;
pub mod encoder;
pub mod state;

pub use buffer::{assemble, AssembleError, FinishedRecording, MediaFormat, RecordingBuffer, UnsupportedFormat};
pub use codec::Codec;
pub use coordinator::Recorder;
pub use encoder::{EncoderBackend, EncoderControl, EncoderEvent, EncoderHandle, FfmpegEncoderBackend};
pub use state::{RecorderError, RecorderOptions, RecorderResult, RecorderState};
