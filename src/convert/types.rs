//! Conversion types and planning
//!
//! This module defines the errors, progress reports and output plans used by
//! the format converter. Planning is pure so every numeric policy (sampling
//! rate, output size, duration bound) can be checked without ffmpeg.

use crate::recorder::{AssembleError, UnsupportedFormat};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Duration assumed when the container reports none (or a non-finite one)
pub const DEFAULT_DURATION_SECS: f64 = 5.0;

/// GIF output width; height follows the source aspect ratio
pub const GIF_WIDTH: u32 = 480;
/// GIF sampling rate
pub const GIF_FPS: u32 = 8;
/// Longest stretch of source rendered into a GIF
pub const GIF_MAX_DURATION_SECS: f64 = 8.0;
/// Fewest frames a GIF is built from
pub const GIF_MIN_FRAMES: u32 = 8;

/// Codec conversion frame rate
pub const CODEC_FPS: u32 = 30;
/// Longest stretch of source re-encoded by a codec conversion
pub const CODEC_MAX_DURATION_SECS: f64 = 30.0;

/// Conversion errors
#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Source is unreadable: {0}")]
    SourceUnreadable(String),

    #[error("Conversion timed out after {0:?}")]
    ConversionTimedOut(Duration),

    #[error("Conversion cancelled")]
    Cancelled,

    #[error("Decoding error: {0}")]
    Decoding(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Conversion produced no data")]
    EmptyRecording,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConvertError {
    pub fn code(&self) -> &'static str {
        match self {
            ConvertError::UnsupportedFormat(_) => "UNSUPPORTED_FORMAT",
            ConvertError::SourceUnreadable(_) => "SOURCE_UNREADABLE",
            ConvertError::ConversionTimedOut(_) => "CONVERSION_TIMED_OUT",
            ConvertError::Cancelled => "CANCELLED",
            ConvertError::EmptyRecording => "EMPTY_RECORDING",
            ConvertError::Decoding(_) | ConvertError::Encoding(_) => "INTERNAL_ERROR",
            ConvertError::Io(_) => "IO_ERROR",
        }
    }
}

impl From<UnsupportedFormat> for ConvertError {
    fn from(error: UnsupportedFormat) -> Self {
        ConvertError::UnsupportedFormat(error.0)
    }
}

impl From<AssembleError> for ConvertError {
    fn from(error: AssembleError) -> Self {
        match error {
            AssembleError::EmptyRecording => ConvertError::EmptyRecording,
        }
    }
}

/// Conversion stages reported to the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversionStatus {
    /// Loading and probing the source
    Loading,
    /// Sampling frames out of the source
    Processing,
    /// Writing the output container or animation
    Encoding,
    /// Output is ready
    Complete,
}

/// Conversion progress information
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConversionProgress {
    pub status: ConversionStatus,
    /// Fraction in `[0, 1]`
    pub progress: f32,
}

impl ConversionProgress {
    pub fn new(status: ConversionStatus, progress: f32) -> Self {
        Self {
            status,
            progress: progress.clamp(0.0, 1.0),
        }
    }

    /// GIF sampling occupies 0.1..0.8
    pub fn gif_sampling(done: u32, total: u32) -> Self {
        Self::new(ConversionStatus::Processing, 0.1 + 0.7 * fraction(done, total))
    }

    /// GIF encoding occupies 0.8..1.0
    pub fn gif_encoding(done: u32, total: u32) -> Self {
        Self::new(ConversionStatus::Encoding, 0.8 + 0.2 * fraction(done, total))
    }

    /// Codec conversion sampling occupies 0.5..0.9
    pub fn codec_sampling(done: u32, total: u32) -> Self {
        Self::new(ConversionStatus::Processing, 0.5 + 0.4 * fraction(done, total))
    }

    pub fn complete() -> Self {
        Self::new(ConversionStatus::Complete, 1.0)
    }
}

fn fraction(done: u32, total: u32) -> f32 {
    if total == 0 {
        return 1.0;
    }
    (done.min(total) as f32) / (total as f32)
}

/// Output plan for a GIF conversion
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GifPlan {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Seconds of source that will be sampled
    pub span_secs: f64,
    pub frame_count: u32,
    /// Source seconds between consecutive samples
    pub interval_secs: f64,
    /// Display time of each frame
    pub delay_ms: u32,
}

/// Output plan for a codec conversion
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CodecPlan {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub span_secs: f64,
    pub frame_count: u32,
}

/// Plan a GIF for a source of the given geometry and duration
pub fn plan_gif(source_width: u32, source_height: u32, duration_secs: f64) -> GifPlan {
    let span_secs = resolve_span(duration_secs, GIF_MAX_DURATION_SECS);
    let frame_count = ((span_secs * GIF_FPS as f64).floor() as u32).max(GIF_MIN_FRAMES);

    GifPlan {
        width: GIF_WIDTH,
        height: scaled_height(source_width, source_height, GIF_WIDTH),
        fps: GIF_FPS,
        span_secs,
        frame_count,
        interval_secs: span_secs / frame_count as f64,
        delay_ms: (1000.0 / GIF_FPS as f64).round() as u32,
    }
}

/// Plan a codec conversion; geometry is kept
pub fn plan_codec(source_width: u32, source_height: u32, duration_secs: f64) -> CodecPlan {
    let span_secs = resolve_span(duration_secs, CODEC_MAX_DURATION_SECS);

    CodecPlan {
        width: source_width,
        height: source_height,
        fps: CODEC_FPS,
        span_secs,
        frame_count: ((span_secs * CODEC_FPS as f64).ceil() as u32).max(1),
    }
}

/// Replace an unusable duration with the default
pub fn resolve_duration(duration: Option<f64>) -> f64 {
    match duration {
        Some(d) if d.is_finite() && d > 0.0 => d,
        _ => DEFAULT_DURATION_SECS,
    }
}

/// Seconds of source a conversion samples, at most `max_secs`
///
/// An unbounded duration (live-muxed streams report none) samples up to the
/// bound; only a nonsensical one falls back to the default.
fn resolve_span(duration_secs: f64, max_secs: f64) -> f64 {
    if duration_secs == f64::INFINITY {
        return max_secs;
    }
    resolve_duration(Some(duration_secs)).min(max_secs)
}

/// Height for `target_width` preserving the source aspect ratio
fn scaled_height(source_width: u32, source_height: u32, target_width: u32) -> u32 {
    if source_width == 0 || source_height == 0 {
        return target_width * 9 / 16;
    }
    let height = (target_width as f64 * source_height as f64 / source_width as f64).round() as u32;
    height.max(1)
}
