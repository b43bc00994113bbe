//! Live media stream handles
//!
//! A [`MediaStream`] is what the platform capture layer hands back: a set of
//! tracks, a feed of encoded samples and an "ended" signal. Clones share the
//! same underlying stream.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use uuid::Uuid;

const SAMPLE_CAPACITY: usize = 1024;

/// Kind of a media track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

/// Where a stream came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StreamSource {
    /// Camera and/or microphone
    User,
    /// Screen capture
    Display,
    /// Received from a remote peer
    Remote,
}

/// A single track within a stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaTrack {
    pub id: String,
    pub kind: TrackKind,
    /// Human readable device label
    pub label: String,
    pub device_id: Option<String>,
}

impl MediaTrack {
    pub fn new(kind: TrackKind, label: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            label: label.into(),
            device_id: None,
        }
    }

    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }
}

/// Serializable description of a stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamInfo {
    pub id: String,
    pub source: StreamSource,
    pub tracks: Vec<MediaTrack>,
    pub ended: bool,
}

struct StreamInner {
    id: String,
    source: StreamSource,
    tracks: Vec<MediaTrack>,
    samples: broadcast::Sender<Bytes>,
    ended: watch::Sender<bool>,
}

/// Shared handle to a live stream
#[derive(Clone)]
pub struct MediaStream {
    inner: Arc<StreamInner>,
}

impl MediaStream {
    /// Create a stream with a fresh id
    pub fn new(source: StreamSource, tracks: Vec<MediaTrack>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), source, tracks)
    }

    pub fn with_id(id: impl Into<String>, source: StreamSource, tracks: Vec<MediaTrack>) -> Self {
        let (samples, _) = broadcast::channel(SAMPLE_CAPACITY);
        let (ended, _) = watch::channel(false);
        Self {
            inner: Arc::new(StreamInner {
                id: id.into(),
                source,
                tracks,
                samples,
                ended,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn source(&self) -> StreamSource {
        self.inner.source
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.inner.tracks
    }

    pub fn has_kind(&self, kind: TrackKind) -> bool {
        self.inner.tracks.iter().any(|t| t.kind == kind)
    }

    pub fn has_audio(&self) -> bool {
        self.has_kind(TrackKind::Audio)
    }

    pub fn has_video(&self) -> bool {
        self.has_kind(TrackKind::Video)
    }

    /// Feed an encoded sample to every consumer. Returns false once the stream
    /// has ended or when nobody is listening.
    pub fn push_sample(&self, sample: Bytes) -> bool {
        if self.is_ended() {
            return false;
        }
        self.inner.samples.send(sample).is_ok()
    }

    /// Subscribe to the sample feed
    pub fn samples(&self) -> broadcast::Receiver<Bytes> {
        self.inner.samples.subscribe()
    }

    /// End every track. Idempotent.
    pub fn stop(&self) {
        let was_ended = self.inner.ended.send_replace(true);
        if !was_ended {
            tracing::debug!("Media stream {} ended", self.inner.id);
        }
    }

    pub fn is_ended(&self) -> bool {
        *self.inner.ended.borrow()
    }

    /// Resolve once the stream has ended
    pub async fn wait_ended(&self) {
        let mut rx = self.inner.ended.subscribe();
        // The sender lives as long as `self`, so this cannot fail
        let _ = rx.wait_for(|ended| *ended).await;
    }

    /// Whether two handles refer to the same stream
    pub fn same_stream(&self, other: &MediaStream) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn info(&self) -> StreamInfo {
        StreamInfo {
            id: self.inner.id.clone(),
            source: self.inner.source,
            tracks: self.inner.tracks.clone(),
            ended: self.is_ended(),
        }
    }
}

impl fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaStream")
            .field("id", &self.inner.id)
            .field("source", &self.inner.source)
            .field("tracks", &self.inner.tracks.len())
            .field("ended", &self.is_ended())
            .finish()
    }
}
