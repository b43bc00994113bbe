//! Error types and handling
//!
//! Common error types used across the crate.

use crate::config::ConfigError;
use crate::connection::{ConnectionError, SignalingError};
use crate::media::MediaError;
use crate::recorder::{RecordingError, StoreError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Crate-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Signaling error: {0}")]
    Signaling(#[from] SignalingError),

    #[error("Recording error: {0}")]
    Recording(#[from] RecordingError),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

/// Error response for hosts and UIs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl AppError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Io(_) => "IO_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Media(MediaError::PermissionDenied(_)) => "PERMISSION_DENIED",
            AppError::Media(MediaError::DeviceNotFound(_)) => "DEVICE_NOT_FOUND",
            AppError::Media(_) => "MEDIA_ERROR",
            AppError::Connection(ConnectionError::ConnectionFailed { .. }) => "CONNECTION_FAILED",
            AppError::Connection(ConnectionError::NetworkError { .. }) => "NETWORK_ERROR",
            AppError::Connection(ConnectionError::MediaPermissionDenied { .. }) => "PERMISSION_DENIED",
            AppError::Connection(ConnectionError::AuthenticationFailed { .. }) => "AUTHENTICATION_FAILED",
            AppError::Connection(ConnectionError::AlreadyActive) => "ALREADY_CONNECTED",
            AppError::Signaling(_) => "SIGNALING_ERROR",
            AppError::Recording(RecordingError::AlreadyRecording(_)) => "ALREADY_RECORDING",
            AppError::Recording(RecordingError::InsufficientStorage { .. }) => "INSUFFICIENT_STORAGE",
            AppError::Recording(RecordingError::NoChunksFound(_)) => "NO_CHUNKS_FOUND",
            AppError::Recording(_) => "RECORDING_ERROR",
            AppError::Storage(_) => "STORAGE_ERROR",
        }
    }
}

impl From<AppError> for ErrorResponse {
    fn from(error: AppError) -> Self {
        let message = match &error {
            AppError::Connection(e) => e.user_message(),
            other => other.to_string(),
        };
        ErrorResponse {
            code: error.code().to_string(),
            message,
        }
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;
