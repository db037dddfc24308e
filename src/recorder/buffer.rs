//! Recording buffer and assembly
//!
//! Encoded chunks are appended in emission order while recording and consumed
//! exactly once into a [`FinishedRecording`] when recording stops.

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Assembly errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssembleError {
    /// No chunks, or chunks that add up to zero bytes
    #[error("Recording is empty")]
    EmptyRecording,
}

/// A format name outside the supported table
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unsupported format: {0}")]
pub struct UnsupportedFormat(pub String);

/// Container format of a finished recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MediaFormat {
    #[default]
    Webm,
    Mp4,
    Gif,
}

impl MediaFormat {
    /// Get the file extension for this format
    pub fn extension(&self) -> &'static str {
        match self {
            MediaFormat::Webm => "webm",
            MediaFormat::Mp4 => "mp4",
            MediaFormat::Gif => "gif",
        }
    }

    /// Generic MIME type for this format
    pub fn mime_type(&self) -> &'static str {
        match self {
            MediaFormat::Webm => "video/webm",
            MediaFormat::Mp4 => "video/mp4",
            MediaFormat::Gif => "image/gif",
        }
    }

    /// Derive the format from a MIME type such as `video/webm;codecs=vp8`
    pub fn from_mime(mime: &str) -> Self {
        let essence = mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        match essence.as_str() {
            "video/mp4" => MediaFormat::Mp4,
            "image/gif" => MediaFormat::Gif,
            _ => MediaFormat::Webm,
        }
    }
}

impl FromStr for MediaFormat {
    type Err = UnsupportedFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "webm" => Ok(MediaFormat::Webm),
            "mp4" => Ok(MediaFormat::Mp4),
            "gif" => Ok(MediaFormat::Gif),
            _ => Err(UnsupportedFormat(s.to_string())),
        }
    }
}

impl fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Ordered, append-only collection of encoded chunks
#[derive(Debug, Default)]
pub struct RecordingBuffer {
    chunks: Vec<Bytes>,
    total_bytes: usize,
}

impl RecordingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk; empty chunks carry nothing and are dropped
    pub fn push(&mut self, chunk: Bytes) {
        if chunk.is_empty() {
            return;
        }
        self.total_bytes += chunk.len();
        self.chunks.push(chunk);
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn is_empty(&self) -> bool {
        self.total_bytes == 0
    }

    /// Take every chunk, leaving the buffer empty
    pub fn take(&mut self) -> Vec<Bytes> {
        self.total_bytes = 0;
        std::mem::take(&mut self.chunks)
    }
}

/// Immutable assembled output of one capture or conversion pass
///
/// `data` is reference counted, so clones hand off the same bytes.
#[derive(Debug, Clone)]
pub struct FinishedRecording {
    pub data: Bytes,
    pub mime_type: String,
    pub format: MediaFormat,
    pub created_at: DateTime<Utc>,
}

impl FinishedRecording {
    pub fn new(data: Bytes, mime_type: impl Into<String>) -> Self {
        let mime_type = mime_type.into();
        Self {
            format: MediaFormat::from_mime(&mime_type),
            data,
            mime_type,
            created_at: Utc::now(),
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Concatenate chunks in arrival order into one finished recording
pub fn assemble(chunks: &[Bytes], mime_type: &str) -> Result<FinishedRecording, AssembleError> {
    let total: usize = chunks.iter().map(Bytes::len).sum();
    if chunks.is_empty() || total == 0 {
        return Err(AssembleError::EmptyRecording);
    }

    let data = match chunks {
        [single] => single.clone(),
        _ => {
            let mut data = BytesMut::with_capacity(total);
            for chunk in chunks {
                data.extend_from_slice(chunk);
            }
            data.freeze()
        }
    };

    tracing::debug!(
        "Assembled {} chunks into {} bytes ({})",
        chunks.len(),
        data.len(),
        mime_type
    );

    Ok(FinishedRecording::new(data, mime_type))
}
