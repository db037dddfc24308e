//! Watermark overlay
//!
//! Text, image or timestamp overlays composited onto a finished recording.

pub mod anchor;
pub mod compositor;
pub mod config;
pub mod font;

pub use anchor::anchor_origin;
pub use compositor::{Overlay, WatermarkCompositor};
pub use config::{
    decode_data_url, parse_hex_color, WatermarkConfig, WatermarkError, WatermarkKind, WatermarkPosition,
};
