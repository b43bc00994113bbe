//! Recording state management
//!
//! Session status machine, session and chunk records, and the storage
//! estimate reported to callers.

use super::error::RecordingError;
use crate::config::RecordingConfig;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a recording session
///
/// `recording → stopped → processing → completed`, with `failed` reachable
/// from any state that is not already terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingStatus {
    Recording,
    Stopped,
    Processing,
    Completed,
    Failed,
}

impl RecordingStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn can_transition_to(&self, next: RecordingStatus) -> bool {
        use RecordingStatus::*;
        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Recording, Stopped) | (Stopped, Processing) | (Processing, Completed) => true,
            _ => false,
        }
    }
}

/// Capture configuration a session was started with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureSettings {
    pub mime_type: String,
    pub video_bits_per_second: u32,
    pub audio_bits_per_second: u32,
    pub chunk_interval_ms: u64,
}

impl CaptureSettings {
    pub fn from_config(config: &RecordingConfig, mime_type: String) -> Self {
        Self {
            mime_type,
            video_bits_per_second: config.video_bits_per_second,
            audio_bits_per_second: config.audio_bits_per_second,
            chunk_interval_ms: config.chunk_interval.as_millis() as u64,
        }
    }
}

/// One participant's recording, from start until it is finalized
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSession {
    pub id: String,
    pub room_id: String,
    pub participant_id: String,
    pub participant_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    pub total_size: u64,
    pub chunk_count: u64,
    pub status: RecordingStatus,
    pub capture: CaptureSettings,
}

impl RecordingSession {
    /// Create a session starting now
    pub fn new(
        room_id: impl Into<String>,
        participant_id: impl Into<String>,
        participant_name: impl Into<String>,
        capture: CaptureSettings,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            room_id: room_id.into(),
            participant_id: participant_id.into(),
            participant_name: participant_name.into(),
            start_time: Utc::now(),
            end_time: None,
            duration_ms: 0,
            total_size: 0,
            chunk_count: 0,
            status: RecordingStatus::Recording,
            capture,
        }
    }

    /// Move to `next`, refusing backwards or out-of-order moves
    pub fn transition(&mut self, next: RecordingStatus) -> Result<(), RecordingError> {
        if !self.status.can_transition_to(next) {
            return Err(RecordingError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Account for a persisted chunk
    pub fn record_chunk(&mut self, size: u64, at: DateTime<Utc>) {
        self.chunk_count += 1;
        self.total_size += size;
        self.duration_ms = elapsed_ms(self.start_time, at);
    }

    /// Set end time and final duration
    pub fn finish(&mut self, at: DateTime<Utc>) {
        self.end_time = Some(at);
        self.duration_ms = elapsed_ms(self.start_time, at);
    }
}

fn elapsed_ms(from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
    (to - from).num_milliseconds().max(0) as u64
}

/// One capture tick of media
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingChunk {
    pub id: String,
    pub participant_id: String,
    pub participant_name: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    /// Nominal duration (the capture timeslice)
    pub duration_ms: u64,
    pub size: u64,
    pub mime_type: String,
    /// Gapless per participant, from 0
    pub sequence: u64,
    /// Larger than the configured soft limit
    #[serde(default)]
    pub oversized: bool,
    /// Payload, stored separately from the metadata
    #[serde(skip)]
    pub data: Bytes,
}

/// Reassembled recording for one participant
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingBlob {
    pub mime_type: String,
    pub data: Bytes,
    pub chunk_count: usize,
    pub total_size: u64,
}

/// Store usage as reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageEstimate {
    pub used: u64,
    pub quota: u64,
    pub available_space: u64,
    pub usage_percentage: f64,
}

impl StorageEstimate {
    pub fn new(used: u64, quota: u64) -> Self {
        let usage_percentage = if quota == 0 {
            100.0
        } else {
            used as f64 / quota as f64 * 100.0
        };
        Self {
            used,
            quota,
            available_space: quota.saturating_sub(used),
            usage_percentage,
        }
    }
}
