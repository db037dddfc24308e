//! Capture trait definitions
//!
//! Platform-agnostic capture source contract and the live video track it produces.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use uuid::Uuid;

/// Origins that may never be captured (browser-internal pages)
pub const DISALLOWED_ORIGIN_PREFIXES: &[&str] = &[
    "chrome://",
    "chrome-extension://",
    "edge://",
    "about:",
    "devtools://",
    "view-source:",
];

/// Capture errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("No video track available: {0}")]
    NoTrackAvailable(String),

    #[error("Capture is not allowed on {0}")]
    DisallowedOrigin(String),
}

impl CaptureError {
    pub fn code(&self) -> &'static str {
        match self {
            CaptureError::PermissionDenied(_) => "PERMISSION_DENIED",
            CaptureError::NoTrackAvailable(_) => "NO_TRACK_AVAILABLE",
            CaptureError::DisallowedOrigin(_) => "DISALLOWED_ORIGIN",
        }
    }
}

pub type CaptureResult<T> = Result<T, CaptureError>;

/// Information about a display/screen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayInfo {
    /// Unique display ID
    pub id: u32,

    /// Display name
    pub name: String,

    /// Width in pixels
    pub width: u32,

    /// Height in pixels
    pub height: u32,

    /// Whether this is the primary display
    pub is_primary: bool,
}

/// What the user asked to capture
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureRequest {
    /// Origin (URL) of the page the request came from, if any
    pub origin: Option<String>,

    /// Display to capture; the primary display when absent
    pub display_id: Option<u32>,
}

/// ffmpeg input description for a live track
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackInput {
    /// Input device/demuxer (`x11grab`, `avfoundation`, `gdigrab`, ...)
    pub format: String,

    /// Input option pairs placed before `-i`
    pub options: Vec<(String, String)>,

    /// The `-i` argument
    pub target: String,
}

impl TrackInput {
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec!["-f".to_string(), self.format.clone()];
        for (key, value) in &self.options {
            args.push(format!("-{}", key));
            args.push(value.clone());
        }
        args.push("-i".to_string());
        args.push(self.target.clone());
        args
    }
}

/// A live video track
///
/// Clones share the same "ended" signal: ending any clone ends them all.
#[derive(Debug, Clone)]
pub struct VideoTrack {
    pub id: Uuid,
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub input: TrackInput,
    ended: Arc<watch::Sender<bool>>,
}

impl VideoTrack {
    pub fn new(label: impl Into<String>, width: u32, height: u32, frame_rate: u32, input: TrackInput) -> Self {
        let (ended, _) = watch::channel(false);
        Self {
            id: Uuid::new_v4(),
            label: label.into(),
            width,
            height,
            frame_rate,
            input,
            ended: Arc::new(ended),
        }
    }

    /// Mark the track as ended (source gone or capture released)
    pub fn end(&self) {
        if !self.ended.send_replace(true) {
            tracing::debug!("Track {} ({}) ended", self.id, self.label);
        }
    }

    pub fn is_ended(&self) -> bool {
        *self.ended.borrow()
    }

    /// Resolves once the track has ended
    pub async fn ended(&self) {
        let mut rx = self.ended.subscribe();
        // The sender lives as long as `self`, so this cannot fail
        let _ = rx.wait_for(|ended| *ended).await;
    }
}

/// Reject capture of browser-internal pages
pub fn check_origin(origin: Option<&str>) -> CaptureResult<()> {
    let Some(origin) = origin else {
        return Ok(());
    };
    let lowered = origin.trim().to_ascii_lowercase();
    if DISALLOWED_ORIGIN_PREFIXES
        .iter()
        .any(|prefix| lowered.starts_with(prefix))
    {
        return Err(CaptureError::DisallowedOrigin(origin.to_string()));
    }
    Ok(())
}

/// A source of live screen video
#[async_trait]
pub trait CaptureSource: Send + Sync {
    /// Run the platform permission flow and return the granted tracks
    async fn request_tracks(&self, request: &CaptureRequest) -> CaptureResult<Vec<VideoTrack>>;

    /// Validate the request, prompt, and return exactly one live video track
    async fn start_capture(&self, request: &CaptureRequest) -> CaptureResult<VideoTrack> {
        check_origin(request.origin.as_deref())?;

        let mut tracks = self.request_tracks(request).await?.into_iter();
        let track = tracks.next().ok_or_else(|| {
            CaptureError::NoTrackAvailable("capture returned no video tracks".to_string())
        })?;

        // Only one track is recorded; release any extras
        for extra in tracks {
            extra.end();
        }

        tracing::info!(
            "Capturing track {} ({}x{} @ {}fps)",
            track.label,
            track.width,
            track.height,
            track.frame_rate
        );
        Ok(track)
    }
}
