//! Capture session state
//!
//! At most one capture session exists at a time. Its lifecycle is
//! `idle → starting → recording → stopping → idle`.

use crate::capture::{CaptureError, VideoTrack};
use crate::convert::{ConversionProgress, ConvertError};
use crate::delivery::{DeliveryError, DeliveryOutcome};
use crate::recorder::{Codec, Recorder, RecorderError};
use crate::settings::SettingsError;
use crate::watermark::WatermarkCompositor;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Where the single session slot stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    #[default]
    Idle,
    /// Permission prompt and encoder start in flight
    Starting,
    Recording,
    /// Final flush, watermark, conversion and delivery in flight
    Stopping,
}

/// Session status snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub phase: SessionPhase,
    pub is_recording: bool,
    pub session_id: Option<Uuid>,
    pub started_at: Option<DateTime<Utc>>,
    pub format: Option<String>,
    pub codec: Option<Codec>,
    pub buffered_bytes: usize,
}

impl SessionStatus {
    pub fn idle() -> Self {
        Self {
            phase: SessionPhase::Idle,
            is_recording: false,
            session_id: None,
            started_at: None,
            format: None,
            codec: None,
            buffered_bytes: 0,
        }
    }
}

/// One capture from permission grant until stop
pub struct CaptureSession {
    pub id: Uuid,
    pub track: VideoTrack,
    pub recorder: Recorder,
    /// Snapshot of the watermark settings taken at start
    pub watermark: WatermarkCompositor,
    /// Output format requested at start, used when stop names none
    pub requested_format: String,
    pub started_at: DateTime<Utc>,
}

/// Session errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("A recording is already in progress")]
    AlreadyRecording,

    #[error("Not recording")]
    NotRecording,

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Recorder(#[from] RecorderError),

    #[error(transparent)]
    Convert(#[from] ConvertError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),
}

impl SessionError {
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::AlreadyRecording => "ALREADY_RECORDING",
            SessionError::NotRecording => "NOT_RECORDING",
            SessionError::Capture(e) => e.code(),
            SessionError::Recorder(e) => e.code(),
            SessionError::Convert(e) => e.code(),
            SessionError::Delivery(e) => e.code(),
            SessionError::Settings(_) => "INTERNAL_ERROR",
        }
    }
}

/// Notifications published by the session controller
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StatusChanged { is_recording: bool },
    ConversionProgress(ConversionProgress),
    Delivered(DeliveryOutcome),
    Failed { code: &'static str, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_pass_through() {
        assert_eq!(SessionError::AlreadyRecording.code(), "ALREADY_RECORDING");
        assert_eq!(
            SessionError::from(RecorderError::EmptyRecording).code(),
            "EMPTY_RECORDING"
        );
        assert_eq!(
            SessionError::from(CaptureError::PermissionDenied("no".to_string())).code(),
            "PERMISSION_DENIED"
        );
    }

    #[test]
    fn test_idle_status_serialization() {
        let json = serde_json::to_value(SessionStatus::idle()).unwrap();
        assert_eq!(json["phase"], "idle");
        assert_eq!(json["isRecording"], false);
        assert!(json["sessionId"].is_null());
    }
}
