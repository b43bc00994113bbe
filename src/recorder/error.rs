//! Recording errors

use super::state::RecordingStatus;
use super::store::StoreError;
use thiserror::Error;

/// Errors returned by the recording engine
#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("Participant {0} is already recording")]
    AlreadyRecording(String),

    #[error("Insufficient storage: {available} bytes free, {required} required")]
    InsufficientStorage { available: u64, required: u64 },

    #[error("No chunks found for participant {0}")]
    NoChunksFound(String),

    #[error("Storage write failed: {0}")]
    StorageWriteFailed(String),

    #[error("No supported recording format (wanted {0})")]
    UnsupportedMimeType(String),

    #[error("Capture device error: {0}")]
    Device(String),

    #[error("Invalid status transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: RecordingStatus,
        to: RecordingStatus,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Result type for recording operations
pub type RecordingResult<T> = Result<T, RecordingError>;

impl RecordingError {
    /// Wrap a failed write
    pub(crate) fn write_failed(e: StoreError) -> Self {
        Self::StorageWriteFailed(e.to_string())
    }
}
