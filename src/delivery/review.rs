//! Review surface
//!
//! A recording staged for review is handed to the review page exactly once.
//! While it stays open the user can re-convert it and save it.

use super::save::{Delivery, DeliveryError, SavedRecording};
use crate::convert::{probe_media, ConversionProgress, ConvertError, FormatConverter, MediaTools};
use crate::recorder::{FinishedRecording, MediaFormat};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Bitrate assumed when estimating duration from size
pub const ESTIMATE_BITS_PER_SECOND: f64 = 2_500_000.0;

/// One-shot handle given to the review page
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewHandle {
    pub blob_url: String,
    pub size: usize,
    pub format: MediaFormat,
    pub timestamp: DateTime<Utc>,
    #[serde(skip)]
    pub path: PathBuf,
    #[serde(skip)]
    pub recording: FinishedRecording,
}

impl ReviewHandle {
    pub fn new(path: PathBuf, recording: FinishedRecording) -> Self {
        Self {
            blob_url: file_url(&path),
            size: recording.size(),
            format: recording.format,
            timestamp: recording.created_at,
            path,
            recording,
        }
    }
}

/// An open review: the staged recording plus any re-converted version
#[derive(Debug)]
pub struct ReviewSession {
    handle: ReviewHandle,
    handed_off: bool,
    converted: Option<FinishedRecording>,
}

impl ReviewSession {
    pub fn new(handle: ReviewHandle) -> Self {
        Self {
            handle,
            handed_off: false,
            converted: None,
        }
    }

    pub fn handle(&self) -> &ReviewHandle {
        &self.handle
    }

    /// The handle, the first time only
    pub fn take_handle(&mut self) -> Option<ReviewHandle> {
        if self.handed_off {
            return None;
        }
        self.handed_off = true;
        Some(self.handle.clone())
    }

    /// Duration in seconds, estimated from size when metadata is unreliable
    pub async fn duration(&self, tools: &MediaTools) -> f64 {
        match probe_media(tools, &self.handle.path).await {
            Ok(probe) => match probe.duration {
                Some(duration) => duration,
                None => estimate_duration(self.handle.size),
            },
            Err(e) => {
                tracing::debug!("Duration probe failed, estimating from size: {}", e);
                estimate_duration(self.handle.size)
            }
        }
    }

    /// Re-convert the staged recording; the result is kept for saving
    pub async fn convert<F>(
        &mut self,
        converter: &FormatConverter,
        target: &str,
        on_progress: F,
    ) -> Result<FinishedRecording, ConvertError>
    where
        F: Fn(ConversionProgress) + Send + Sync + 'static,
    {
        let converted = converter.convert(&self.handle.recording, target, on_progress).await?;
        self.converted = Some(converted.clone());
        Ok(converted)
    }

    /// Save in `target` format
    ///
    /// The staged recording is saved as-is when it already has that format; a
    /// failed conversion saves the original instead.
    pub async fn save<F>(
        &mut self,
        delivery: &Delivery,
        converter: &FormatConverter,
        target: &str,
        on_progress: F,
    ) -> Result<SavedRecording, DeliveryError>
    where
        F: Fn(ConversionProgress) + Send + Sync + 'static,
    {
        let recording = self.pick_for_save(converter, target, on_progress).await;
        delivery.save(&recording).await
    }

    async fn pick_for_save<F>(&mut self, converter: &FormatConverter, target: &str, on_progress: F) -> FinishedRecording
    where
        F: Fn(ConversionProgress) + Send + Sync + 'static,
    {
        let original = &self.handle.recording;
        let Ok(format) = target.parse::<MediaFormat>() else {
            tracing::warn!("Unsupported save format {:?}, saving original", target);
            return original.clone();
        };

        if format == original.format {
            return original.clone();
        }
        if let Some(converted) = self.converted.as_ref().filter(|c| c.format == format) {
            return converted.clone();
        }

        match self.convert(converter, target, on_progress).await {
            Ok(converted) => converted,
            Err(e) => {
                tracing::warn!("Conversion before save failed, saving original: {}", e);
                self.handle.recording.clone()
            }
        }
    }

    /// Remove the staged file
    pub async fn discard(self) {
        if let Err(e) = tokio::fs::remove_file(&self.handle.path).await {
            tracing::debug!("Failed to remove review file {:?}: {}", self.handle.path, e);
        }
    }
}

/// Seconds of video `size` bytes hold at the assumed bitrate
pub fn estimate_duration(size: usize) -> f64 {
    size as f64 * 8.0 / ESTIMATE_BITS_PER_SECOND
}

/// Human-readable size: B, KB, MB or GB with one decimal
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 3] = ["KB", "MB", "GB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

/// `m:ss`
pub fn format_duration(seconds: f64) -> String {
    if !seconds.is_finite() || seconds < 0.0 {
        return "0:00".to_string();
    }
    let total = seconds.floor() as u64;
    format!("{}:{:02}", total / 60, total % 60)
}

/// `file://` URL for a local path
fn file_url(path: &Path) -> String {
    let raw = path.to_string_lossy().replace('\\', "/");
    let encoded: Vec<String> = raw
        .split('/')
        .map(|segment| {
            // Keep drive letters such as `C:` readable
            if segment.len() == 2 && segment.ends_with(':') {
                segment.to_string()
            } else {
                urlencoding::encode(segment).into_owned()
            }
        })
        .collect();
    let joined = encoded.join("/");
    if joined.starts_with('/') {
        format!("file://{}", joined)
    } else {
        format!("file:///{}", joined)
    }
}
