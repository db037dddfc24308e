//! Watermark configuration
//!
//! Read once when a session starts; the session keeps its own copy.

use crate::convert::ConvertError;
use crate::recorder::AssembleError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Watermark errors
#[derive(Error, Debug)]
pub enum WatermarkError {
    #[error("Invalid color: {0}")]
    InvalidColor(String),

    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Image watermark has no image data")]
    MissingImage,

    #[error("Frame is {actual} bytes, expected {expected}")]
    FrameSize { expected: usize, actual: usize },

    #[error(transparent)]
    Media(#[from] ConvertError),

    #[error("Watermarked output is empty")]
    Empty(#[from] AssembleError),

    #[error("Compositor task failed: {0}")]
    Task(String),
}

/// What the overlay shows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WatermarkKind {
    #[default]
    Text,
    Image,
    Timestamp,
}

/// Named anchor for the overlay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum WatermarkPosition {
    TopLeft,
    TopRight,
    BottomLeft,
    #[default]
    BottomRight,
    Center,
}

impl WatermarkPosition {
    pub const ALL: [WatermarkPosition; 5] = [
        WatermarkPosition::TopLeft,
        WatermarkPosition::TopRight,
        WatermarkPosition::BottomLeft,
        WatermarkPosition::BottomRight,
        WatermarkPosition::Center,
    ];
}

/// Watermark settings as stored under `watermarkSettings`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WatermarkConfig {
    pub enabled: bool,

    #[serde(rename = "type")]
    pub kind: WatermarkKind,

    pub position: WatermarkPosition,

    /// 0.0 (invisible) to 1.0 (opaque)
    pub opacity: f32,

    pub text: String,

    /// CSS-style hex color, `#rgb` or `#rrggbb`
    pub color: String,

    /// Encoded image bytes; stored separately under `watermarkImageData`
    #[serde(skip)]
    pub image_data: Option<Bytes>,
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            kind: WatermarkKind::Text,
            position: WatermarkPosition::BottomRight,
            opacity: 0.8,
            text: "Screen Recording".to_string(),
            color: "#ffffff".to_string(),
            image_data: None,
        }
    }
}

impl WatermarkConfig {
    /// Opacity clamped into `[0, 1]`
    pub fn effective_opacity(&self) -> f32 {
        if self.opacity.is_finite() {
            self.opacity.clamp(0.0, 1.0)
        } else {
            1.0
        }
    }

    pub fn with_image(mut self, data: Bytes) -> Self {
        self.image_data = Some(data);
        self
    }
}

/// Parse `#rgb`, `#rrggbb` (leading `#` optional)
pub fn parse_hex_color(value: &str) -> Result<[u8; 3], WatermarkError> {
    let hex = value.trim().trim_start_matches('#');
    let invalid = || WatermarkError::InvalidColor(value.to_string());

    let expanded: String = match hex.len() {
        3 => hex.chars().flat_map(|c| [c, c]).collect(),
        6 => hex.to_string(),
        _ => return Err(invalid()),
    };

    let mut rgb = [0u8; 3];
    for (i, channel) in rgb.iter_mut().enumerate() {
        *channel = u8::from_str_radix(&expanded[i * 2..i * 2 + 2], 16).map_err(|_| invalid())?;
    }
    Ok(rgb)
}

/// Decode a `data:<mime>;base64,<payload>` URL (a bare base64 payload is accepted too)
pub fn decode_data_url(value: &str) -> Result<Vec<u8>, WatermarkError> {
    let payload = match value.strip_prefix("data:") {
        Some(rest) => {
            let (meta, data) = rest
                .split_once(',')
                .ok_or_else(|| WatermarkError::InvalidImage("malformed data URL".to_string()))?;
            if !meta.ends_with(";base64") {
                return Err(WatermarkError::InvalidImage(
                    "data URL is not base64 encoded".to_string(),
                ));
            }
            data
        }
        None => value,
    };

    STANDARD
        .decode(payload.trim())
        .map_err(|e| WatermarkError::InvalidImage(e.to_string()))
}
