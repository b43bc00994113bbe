//! Recording engine events

use super::state::RecordingChunk;
use crate::utils::events::BusEvent;

#[derive(Debug, Clone)]
pub enum RecordingEvent {
    RecordingStarted {
        session_id: String,
        participant_id: String,
    },
    RecordingStopped {
        session_id: String,
        participant_id: String,
    },
    /// A chunk was persisted
    ChunkAvailable { chunk: RecordingChunk },
    /// Mid-session failure. The session keeps running unless its device failed.
    RecordingError {
        message: String,
        session_id: Option<String>,
        participant_id: Option<String>,
    },
    /// Raised before a start is refused; no session exists yet
    StorageFull {
        participant_id: String,
        available_space: u64,
    },
    ProcessingComplete {
        participant_id: String,
        session_id: Option<String>,
        total_size: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordingEventKind {
    RecordingStarted,
    RecordingStopped,
    ChunkAvailable,
    RecordingError,
    StorageFull,
    ProcessingComplete,
}

impl RecordingEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RecordingStarted => "recording-started",
            Self::RecordingStopped => "recording-stopped",
            Self::ChunkAvailable => "chunk-available",
            Self::RecordingError => "recording-error",
            Self::StorageFull => "storage-full",
            Self::ProcessingComplete => "processing-complete",
        }
    }
}

impl BusEvent for RecordingEvent {
    type Kind = RecordingEventKind;

    fn kind(&self) -> RecordingEventKind {
        match self {
            Self::RecordingStarted { .. } => RecordingEventKind::RecordingStarted,
            Self::RecordingStopped { .. } => RecordingEventKind::RecordingStopped,
            Self::ChunkAvailable { .. } => RecordingEventKind::ChunkAvailable,
            Self::RecordingError { .. } => RecordingEventKind::RecordingError,
            Self::StorageFull { .. } => RecordingEventKind::StorageFull,
            Self::ProcessingComplete { .. } => RecordingEventKind::ProcessingComplete,
        }
    }
}
