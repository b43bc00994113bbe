//! Capture constraint templates
//!
//! Each [`MediaScenario`] maps to one fixed constraint set. Scenarios are never
//! downgraded: a caller that asks for `HighQuality` either gets a stream that
//! satisfies the template's track kinds or an error.

use super::traits::Resolution;
use serde::{Deserialize, Serialize};

/// Capture scenario requested by the host application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MediaScenario {
    AudioOnly,
    VideoCall,
    ScreenShare,
    HighQuality,
}

impl MediaScenario {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AudioOnly => "audio-only",
            Self::VideoCall => "video-call",
            Self::ScreenShare => "screen-share",
            Self::HighQuality => "high-quality",
        }
    }

    /// The fixed constraint template for this scenario
    pub fn constraints(&self) -> MediaConstraints {
        match self {
            Self::AudioOnly => MediaConstraints {
                audio: Some(AudioConstraints::voice()),
                video: None,
            },
            Self::VideoCall => MediaConstraints {
                audio: Some(AudioConstraints::voice()),
                video: Some(VideoConstraints {
                    min: Resolution { width: 640, height: 480 },
                    ideal: Resolution { width: 1280, height: 720 },
                    max: Resolution { width: 1920, height: 1080 },
                    min_frame_rate: 15,
                    max_frame_rate: 30,
                }),
            },
            Self::ScreenShare => MediaConstraints {
                audio: None,
                video: Some(VideoConstraints {
                    min: Resolution { width: 640, height: 480 },
                    ideal: Resolution { width: 1920, height: 1080 },
                    max: Resolution { width: 3840, height: 2160 },
                    min_frame_rate: 5,
                    max_frame_rate: 30,
                }),
            },
            Self::HighQuality => MediaConstraints {
                audio: Some(AudioConstraints {
                    sample_rate: 48_000,
                    channel_count: 2,
                    echo_cancellation: false,
                    noise_suppression: false,
                    auto_gain_control: false,
                }),
                video: Some(VideoConstraints {
                    min: Resolution { width: 1280, height: 720 },
                    ideal: Resolution { width: 1920, height: 1080 },
                    max: Resolution { width: 1920, height: 1080 },
                    min_frame_rate: 30,
                    max_frame_rate: 60,
                }),
            },
        }
    }
}

/// Full constraint set passed to the platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaConstraints {
    pub audio: Option<AudioConstraints>,
    pub video: Option<VideoConstraints>,
}

impl MediaConstraints {
    pub fn wants_audio(&self) -> bool {
        self.audio.is_some()
    }

    pub fn wants_video(&self) -> bool {
        self.video.is_some()
    }
}

/// Microphone constraints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioConstraints {
    pub sample_rate: u32,
    pub channel_count: u16,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl AudioConstraints {
    /// Mono speech capture with processing enabled
    fn voice() -> Self {
        Self {
            sample_rate: 48_000,
            channel_count: 1,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

/// Camera or screen constraints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoConstraints {
    pub min: Resolution,
    pub ideal: Resolution,
    pub max: Resolution,
    pub min_frame_rate: u32,
    pub max_frame_rate: u32,
}
