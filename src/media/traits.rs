//! Media device definitions
//!
//! Platform-agnostic types and the trait the host implements to expose its
//! camera, microphone and screen capture.

use super::constraints::MediaConstraints;
use super::stream::MediaStream;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Media acquisition errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Device busy: {0}")]
    DeviceBusy(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Platform error: {0}")]
    Platform(String),
}

/// Kind of a capture/playback device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceKind {
    AudioInput,
    VideoInput,
    AudioOutput,
}

/// Information about a media device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Unique device ID
    pub id: String,

    /// Device name
    pub label: String,

    pub kind: DeviceKind,

    /// Whether this is the default device for its kind
    pub is_default: bool,
}

/// Devices partitioned by kind
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceList {
    pub audio_inputs: Vec<DeviceInfo>,
    pub video_inputs: Vec<DeviceInfo>,
    pub audio_outputs: Vec<DeviceInfo>,
}

impl DeviceList {
    /// Partition a flat device list
    pub fn from_devices(devices: Vec<DeviceInfo>) -> Self {
        let mut list = Self::default();
        for device in devices {
            match device.kind {
                DeviceKind::AudioInput => list.audio_inputs.push(device),
                DeviceKind::VideoInput => list.video_inputs.push(device),
                DeviceKind::AudioOutput => list.audio_outputs.push(device),
            }
        }
        list
    }

    pub fn is_empty(&self) -> bool {
        self.audio_inputs.is_empty() && self.video_inputs.is_empty() && self.audio_outputs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.audio_inputs.len() + self.video_inputs.len() + self.audio_outputs.len()
    }
}

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// Platform capture primitive
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Open camera and/or microphone matching the constraints
    async fn get_user_media(&self, constraints: &MediaConstraints) -> Result<MediaStream, MediaError>;

    /// Ask the user to pick a screen or window
    async fn get_display_media(&self, constraints: &MediaConstraints) -> Result<MediaStream, MediaError>;

    /// List capture and playback devices
    async fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>, MediaError>;

    /// Whether screen capture exists on this platform
    fn supports_display_capture(&self) -> bool;
}
