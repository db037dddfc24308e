//! Message shapes exchanged with the extension
//!
//! Requests carry an `action` tag and an optional `requestId` that is echoed
//! in the matching response. Events are pushed unprompted and are tagged the
//! same way.

use crate::convert::ConversionStatus;
use crate::delivery::{format_file_size, DeliveryOutcome, ReviewHandle, SavedRecording};
use crate::recorder::{FinishedRecording, MediaFormat};
use crate::session::SessionEvent;
use crate::utils::ErrorResponse;
use crate::watermark::WatermarkConfig;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use thiserror::Error;

/// Largest recording sent inline as base64; bigger ones go by file URL
pub const INLINE_DATA_LIMIT: usize = 512 * 1024;

/// Protocol errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Message of {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: usize, limit: usize },
}

/// Requests understood by the host
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum HostRequest {
    StartRecording {
        #[serde(default)]
        format: Option<String>,
        #[serde(default, rename = "watermarkSettings")]
        watermark_settings: Option<WatermarkConfig>,
        #[serde(default)]
        origin: Option<String>,
        #[serde(default, rename = "displayId")]
        display_id: Option<u32>,
    },
    StopRecording {
        #[serde(default)]
        format: Option<String>,
    },
    GetStatus,
    /// One-shot hand-off of the recording under review
    GetRecordingData,
    GetRecordingDuration,
    ConvertRecording {
        format: String,
    },
    CancelConversion,
    SaveRecording {
        format: String,
    },
}

/// A request plus its correlation id
#[derive(Debug, Clone, Deserialize)]
pub struct RequestEnvelope {
    #[serde(default, rename = "requestId")]
    pub request_id: Option<Value>,
    #[serde(flatten)]
    pub request: HostRequest,
}

/// Reply to one request
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HostResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Value>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_recording: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl HostResponse {
    pub fn ok() -> Self {
        Self {
            request_id: None,
            success: true,
            error: None,
            code: None,
            is_recording: None,
            data: None,
        }
    }

    pub fn failure(error: ErrorResponse) -> Self {
        Self {
            success: false,
            error: Some(error.message),
            code: Some(error.code),
            ..Self::ok()
        }
    }

    pub fn with_recording(mut self, is_recording: bool) -> Self {
        self.is_recording = Some(is_recording);
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_request_id(mut self, request_id: Option<Value>) -> Self {
        self.request_id = request_id;
        self
    }
}

/// Notifications pushed to the extension
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum HostEvent {
    /// Recording bytes inline, base64 encoded
    RecordingData {
        data: String,
        size: usize,
        format: MediaFormat,
        timestamp: DateTime<Utc>,
    },
    /// Recording too large to inline, referenced by file URL
    RecordingDataUrl {
        #[serde(rename = "blobUrl")]
        blob_url: String,
        size: usize,
        format: MediaFormat,
        timestamp: DateTime<Utc>,
    },
    ConversionProgress {
        status: ConversionStatus,
        progress: f32,
    },
    RecordingStatus {
        #[serde(rename = "isRecording")]
        is_recording: bool,
    },
    RecordingSaved {
        path: PathBuf,
        size: usize,
        #[serde(rename = "formattedSize")]
        formatted_size: String,
        format: MediaFormat,
    },
    /// A recording is staged and waits for `get-recording-data`
    ReviewReady {
        size: usize,
        format: MediaFormat,
        timestamp: DateTime<Utc>,
    },
    RecordingError {
        code: String,
        message: String,
    },
}

impl HostEvent {
    /// Recording data for the review page, inline when small enough
    pub fn recording_data(handle: &ReviewHandle) -> Self {
        if handle.size <= INLINE_DATA_LIMIT {
            HostEvent::RecordingData {
                data: STANDARD.encode(&handle.recording.data),
                size: handle.size,
                format: handle.format,
                timestamp: handle.timestamp,
            }
        } else {
            HostEvent::RecordingDataUrl {
                blob_url: handle.blob_url.clone(),
                size: handle.size,
                format: handle.format,
                timestamp: handle.timestamp,
            }
        }
    }

    pub fn saved(saved: &SavedRecording) -> Self {
        HostEvent::RecordingSaved {
            path: saved.path.clone(),
            size: saved.size,
            formatted_size: format_file_size(saved.size as u64),
            format: saved.format,
        }
    }

    pub fn from_session(event: &SessionEvent) -> Self {
        match event {
            SessionEvent::StatusChanged { is_recording } => HostEvent::RecordingStatus {
                is_recording: *is_recording,
            },
            SessionEvent::ConversionProgress(progress) => HostEvent::ConversionProgress {
                status: progress.status,
                progress: progress.progress,
            },
            SessionEvent::Delivered(DeliveryOutcome::Saved(saved)) => HostEvent::saved(saved),
            SessionEvent::Delivered(DeliveryOutcome::Review(handle)) => HostEvent::ReviewReady {
                size: handle.size,
                format: handle.format,
                timestamp: handle.timestamp,
            },
            SessionEvent::Failed { code, message } => HostEvent::RecordingError {
                code: code.to_string(),
                message: message.clone(),
            },
        }
    }
}

/// Summary of a converted recording returned by `convert-recording`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertedSummary {
    pub size: usize,
    pub formatted_size: String,
    pub format: MediaFormat,
    pub mime_type: String,
}

impl From<&FinishedRecording> for ConvertedSummary {
    fn from(recording: &FinishedRecording) -> Self {
        Self {
            size: recording.size(),
            formatted_size: format_file_size(recording.size() as u64),
            format: recording.format,
            mime_type: recording.mime_type.clone(),
        }
    }
}

/// Reply to `get-recording-duration`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DurationInfo {
    pub seconds: f64,
    pub formatted: String,
}

impl DurationInfo {
    pub fn new(seconds: f64) -> Self {
        Self {
            seconds,
            formatted: crate::delivery::format_duration(seconds),
        }
    }
}

/// Anything written to the extension
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Outgoing {
    Response(HostResponse),
    Event(HostEvent),
}
