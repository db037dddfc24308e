//! Recorder state management
//!
//! Defines the recorder state machine (`idle → recording → stopping → idle`),
//! its errors and its tunables.

use super::buffer::AssembleError;
use super::codec::{Codec, RECORDING_PREFERENCE};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Current state of the recorder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RecorderState {
    /// No recording in progress
    #[default]
    Idle,
    /// Encoder running, chunks accumulating
    Recording,
    /// Final flush requested, waiting for the last chunks
    Stopping,
}

/// Recorder errors
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("Already recording")]
    AlreadyRecording,

    #[error("Not recording")]
    NotRecording,

    #[error("Recording is empty")]
    EmptyRecording,

    #[error("Encoder error: {0}")]
    Encoder(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<AssembleError> for RecorderError {
    fn from(error: AssembleError) -> Self {
        match error {
            AssembleError::EmptyRecording => RecorderError::EmptyRecording,
        }
    }
}

impl RecorderError {
    pub fn code(&self) -> &'static str {
        match self {
            RecorderError::AlreadyRecording => "ALREADY_RECORDING",
            RecorderError::NotRecording => "NOT_RECORDING",
            RecorderError::EmptyRecording => "EMPTY_RECORDING",
            RecorderError::Encoder(_) => "RECORDING_ERROR",
            RecorderError::Io(_) => "IO_ERROR",
        }
    }
}

pub type RecorderResult<T> = Result<T, RecorderError>;

/// Recorder tunables
#[derive(Debug, Clone)]
pub struct RecorderOptions {
    /// Codec preference, most preferred first
    pub preference: Vec<Codec>,

    /// How long to wait for a flush acknowledgment
    pub flush_ack_timeout: Duration,

    /// How long to wait for the encoder to emit its final chunks
    pub final_chunk_timeout: Duration,
}

impl Default for RecorderOptions {
    fn default() -> Self {
        Self {
            preference: RECORDING_PREFERENCE.to_vec(),
            flush_ack_timeout: Duration::from_millis(500),
            final_chunk_timeout: Duration::from_secs(3),
        }
    }
}
