//! Media acquisition manager
//!
//! Wraps the platform [`MediaDevices`] with scenario templates and keeps a
//! registry of the streams it handed out so they can be reported on and torn
//! down together.

use super::constraints::{MediaConstraints, MediaScenario};
use super::stream::{MediaStream, StreamInfo, TrackKind};
use super::traits::{DeviceList, MediaDevices, MediaError};
use crate::utils::events::{BusEvent, EventBus, ListenerId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Events emitted by the media manager
#[derive(Debug, Clone)]
pub enum MediaEvent {
    StreamStarted { stream_id: String },
    StreamStopped { stream_id: String },
    Error { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaEventKind {
    StreamStarted,
    StreamStopped,
    Error,
}

impl BusEvent for MediaEvent {
    type Kind = MediaEventKind;

    fn kind(&self) -> MediaEventKind {
        match self {
            Self::StreamStarted { .. } => MediaEventKind::StreamStarted,
            Self::StreamStopped { .. } => MediaEventKind::StreamStopped,
            Self::Error { .. } => MediaEventKind::Error,
        }
    }
}

/// Counts over the active stream registry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaStats {
    pub active_streams: usize,
    pub audio_tracks: usize,
    pub video_tracks: usize,
}

type StreamRegistry = Arc<RwLock<HashMap<String, MediaStream>>>;

/// Acquires and tracks local media streams
pub struct MediaManager {
    devices: Arc<dyn MediaDevices>,
    streams: StreamRegistry,
    events: Arc<EventBus<MediaEvent>>,
}

impl MediaManager {
    pub fn new(devices: Arc<dyn MediaDevices>) -> Self {
        Self {
            devices,
            streams: Arc::new(RwLock::new(HashMap::new())),
            events: Arc::new(EventBus::new()),
        }
    }

    /// Open camera/microphone for a scenario. `ScreenShare` is served by
    /// display capture, as [`Self::acquire_display_media`].
    pub async fn acquire_user_media(&self, scenario: MediaScenario) -> Result<MediaStream, MediaError> {
        if scenario == MediaScenario::ScreenShare {
            return self.acquire_display_media().await;
        }

        let constraints = scenario.constraints();
        tracing::info!("Acquiring user media for scenario {}", scenario.as_str());

        let stream = self.devices.get_user_media(&constraints).await.map_err(|e| {
            tracing::warn!("User media request for {} failed: {}", scenario.as_str(), e);
            e
        })?;

        if let Err(e) = check_satisfies(&stream, &constraints) {
            stream.stop();
            return Err(e);
        }

        self.register(stream.clone());
        Ok(stream)
    }

    /// Ask the user for a screen/window capture
    pub async fn acquire_display_media(&self) -> Result<MediaStream, MediaError> {
        if !self.devices.supports_display_capture() {
            return Err(MediaError::NotSupported(
                "display capture is not available on this platform".to_string(),
            ));
        }

        let constraints = MediaScenario::ScreenShare.constraints();
        tracing::info!("Acquiring display media");

        let stream = self.devices.get_display_media(&constraints).await?;
        if let Err(e) = check_satisfies(&stream, &constraints) {
            stream.stop();
            return Err(e);
        }

        self.register(stream.clone());
        Ok(stream)
    }

    /// List devices by kind. Failures yield an empty list and an error event.
    pub async fn enumerate_devices(&self) -> DeviceList {
        match self.devices.enumerate_devices().await {
            Ok(devices) => DeviceList::from_devices(devices),
            Err(e) => {
                tracing::warn!("Failed to enumerate devices: {}", e);
                self.events.emit(MediaEvent::Error {
                    message: format!("Failed to enumerate devices: {}", e),
                });
                DeviceList::default()
            }
        }
    }

    /// Stop one stream. Returns false if it was not registered.
    pub fn stop_stream(&self, stream_id: &str) -> bool {
        let removed = self.streams.write().remove(stream_id);
        match removed {
            Some(stream) => {
                stream.stop();
                tracing::info!("Stopped stream {}", stream_id);
                self.events.emit(MediaEvent::StreamStopped {
                    stream_id: stream_id.to_string(),
                });
                true
            }
            None => false,
        }
    }

    /// Stop every registered stream
    pub fn stop_all(&self) {
        let ids: Vec<String> = self.streams.read().keys().cloned().collect();
        for id in ids {
            self.stop_stream(&id);
        }
    }

    /// Handles of the active streams
    pub fn active_streams(&self) -> Vec<MediaStream> {
        self.streams.read().values().cloned().collect()
    }

    pub fn stream_infos(&self) -> Vec<StreamInfo> {
        self.streams.read().values().map(|s| s.info()).collect()
    }

    pub fn stats(&self) -> MediaStats {
        let streams = self.streams.read();
        let mut stats = MediaStats {
            active_streams: streams.len(),
            ..Default::default()
        };
        for track in streams.values().flat_map(|s| s.tracks().iter()) {
            match track.kind {
                TrackKind::Audio => stats.audio_tracks += 1,
                TrackKind::Video => stats.video_tracks += 1,
            }
        }
        stats
    }

    pub fn on<F>(&self, kind: MediaEventKind, listener: F) -> ListenerId
    where
        F: Fn(&MediaEvent) + Send + Sync + 'static,
    {
        self.events.on(kind, listener)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.events.off(id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MediaEvent> {
        self.events.subscribe()
    }

    fn register(&self, stream: MediaStream) {
        let stream_id = stream.id().to_string();
        self.streams.write().insert(stream_id.clone(), stream.clone());
        tracing::info!("Registered stream {} ({} tracks)", stream_id, stream.tracks().len());
        self.events.emit(MediaEvent::StreamStarted {
            stream_id: stream_id.clone(),
        });

        // A stream can end underneath us (e.g. the browser-level "stop sharing")
        let streams = self.streams.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            stream.wait_ended().await;
            let removed = {
                let mut registry = streams.write();
                match registry.get(&stream_id) {
                    Some(current) if current.same_stream(&stream) => registry.remove(&stream_id),
                    _ => None,
                }
            };
            if removed.is_some() {
                tracing::info!("Stream {} ended externally", stream_id);
                events.emit(MediaEvent::StreamStopped { stream_id });
            }
        });
    }
}

fn check_satisfies(stream: &MediaStream, constraints: &MediaConstraints) -> Result<(), MediaError> {
    if constraints.wants_audio() && !stream.has_audio() {
        return Err(MediaError::DeviceNotFound("no audio track was provided".to_string()));
    }
    if constraints.wants_video() && !stream.has_video() {
        return Err(MediaError::DeviceNotFound("no video track was provided".to_string()));
    }
    Ok(())
}
