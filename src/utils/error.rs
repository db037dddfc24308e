//! Error types and handling
//!
//! Every component error folds into [`AppError`]; the UI only ever sees an
//! [`ErrorResponse`] carrying a stable machine code.

use crate::capture::CaptureError;
use crate::commands::protocol::ProtocolError;
use crate::convert::ConvertError;
use crate::delivery::DeliveryError;
use crate::recorder::RecorderError;
use crate::session::SessionError;
use crate::settings::SettingsError;
use crate::watermark::WatermarkError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Recorder(#[from] RecorderError),

    #[error(transparent)]
    Watermark(#[from] WatermarkError),

    #[error(transparent)]
    Convert(#[from] ConvertError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Io(_) => "IO_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Capture(e) => e.code(),
            AppError::Recorder(e) => e.code(),
            AppError::Watermark(_) => "INTERNAL_ERROR",
            AppError::Convert(e) => e.code(),
            AppError::Delivery(e) => e.code(),
            AppError::Session(e) => e.code(),
            AppError::Settings(_) => "INTERNAL_ERROR",
            AppError::Protocol(_) => "PROTOCOL_ERROR",
        }
    }
}

/// Error response for the UI
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<AppError> for ErrorResponse {
    fn from(error: AppError) -> Self {
        ErrorResponse {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

impl From<SessionError> for ErrorResponse {
    fn from(error: SessionError) -> Self {
        AppError::from(error).into()
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;
