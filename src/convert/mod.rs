//! Format conversion
//!
//! Turns a finished recording into another container/codec or a GIF.

pub mod ffmpeg;
pub mod gif;
pub mod pipeline;
pub mod types;

pub use ffmpeg::{probe_media, MediaProbe, MediaTools};
pub use pipeline::{FormatConverter, ProgressCallback};
pub use types::{ConversionProgress, ConversionStatus, ConvertError};
