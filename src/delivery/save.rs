//! Delivery of finished recordings
//!
//! A recording is either written straight into the output directory or
//! staged for review, where the user can re-convert it before saving.

use super::filename::{candidate_paths, recording_filename};
use super::review::ReviewHandle;
use crate::recorder::{FinishedRecording, MediaFormat};
use crate::settings::{AppConfig, DeliveryMode};
use chrono::Local;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

/// Numbered names tried before a save gives up
const MAX_NAME_ATTEMPTS: usize = 10_000;

/// Delivery errors
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("Cannot write {path:?}: {source}")]
    WriteDenied {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No recording is waiting for review")]
    NothingToReview,
}

impl DeliveryError {
    pub fn code(&self) -> &'static str {
        match self {
            DeliveryError::WriteDenied { .. } => "WRITE_DENIED",
            DeliveryError::NothingToReview => "NO_REVIEW",
        }
    }
}

/// A recording written to disk
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedRecording {
    pub path: PathBuf,
    pub size: usize,
    pub format: MediaFormat,
}

/// What delivery did with a recording
#[derive(Debug, Clone)]
pub enum DeliveryOutcome {
    Saved(SavedRecording),
    Review(ReviewHandle),
}

pub struct Delivery {
    mode: DeliveryMode,
    output_dir: PathBuf,
    review_dir: PathBuf,
}

impl Delivery {
    pub fn new(mode: DeliveryMode, output_dir: impl Into<PathBuf>, review_dir: impl Into<PathBuf>) -> Self {
        Self {
            mode,
            output_dir: output_dir.into(),
            review_dir: review_dir.into(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.delivery, &config.output_dir, &config.review_dir)
    }

    /// Hand a finished recording to the user per the delivery mode
    pub async fn deliver(&self, finished: &FinishedRecording) -> Result<DeliveryOutcome, DeliveryError> {
        match self.mode {
            DeliveryMode::Save => self.save(finished).await.map(DeliveryOutcome::Saved),
            DeliveryMode::Review => self.stage_for_review(finished).await.map(DeliveryOutcome::Review),
        }
    }

    /// Save into the output directory under a dated, non-clobbering name
    pub async fn save(&self, finished: &FinishedRecording) -> Result<SavedRecording, DeliveryError> {
        let file_name = recording_filename(finished.format, Local::now().date_naive());
        let path = write_unique(&self.output_dir, &file_name, finished).await?;

        tracing::info!("Saved recording to {:?} ({} bytes)", path, finished.size());
        Ok(SavedRecording {
            path,
            size: finished.size(),
            format: finished.format,
        })
    }

    async fn stage_for_review(&self, finished: &FinishedRecording) -> Result<ReviewHandle, DeliveryError> {
        let file_name = format!("{}.{}", uuid::Uuid::new_v4(), finished.format.extension());
        let path = write_unique(&self.review_dir, &file_name, finished).await?;

        tracing::info!("Recording staged for review at {:?}", path);
        Ok(ReviewHandle::new(path, finished.clone()))
    }
}

async fn write_unique(dir: &Path, file_name: &str, finished: &FinishedRecording) -> Result<PathBuf, DeliveryError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|source| DeliveryError::WriteDenied {
            path: dir.to_path_buf(),
            source,
        })?;

    // create_new claims the name atomically, so concurrent saves never share a file
    for path in candidate_paths(dir, file_name).take(MAX_NAME_ATTEMPTS) {
        let opened = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await;
        let mut file = match opened {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(source) => return Err(DeliveryError::WriteDenied { path, source }),
        };

        let written = async {
            file.write_all(&finished.data).await?;
            file.flush().await
        };
        if let Err(source) = written.await {
            return Err(DeliveryError::WriteDenied { path, source });
        }
        return Ok(path);
    }

    Err(DeliveryError::WriteDenied {
        path: dir.join(file_name),
        source: std::io::Error::new(std::io::ErrorKind::AlreadyExists, "no free file name"),
    })
}
