//! Capture devices
//!
//! A [`CaptureDevice`] turns a live stream into timesliced chunks delivered
//! over a channel. [`StreamRecorder`] is the built-in implementation over a
//! [`MediaStream`]'s sample feed; hosts with a native recorder can plug in
//! their own [`CaptureDeviceFactory`].

use super::error::RecordingError;
use super::state::CaptureSettings;
use crate::media::MediaStream;
use bytes::{Bytes, BytesMut};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Formats tried, in order, when the configured one is unavailable
pub const FALLBACK_MIME_TYPES: [&str; 5] = [
    "video/webm;codecs=vp9,opus",
    "video/webm;codecs=vp8,opus",
    "video/webm",
    "audio/webm;codecs=opus",
    "audio/webm",
];

/// Output of a capture device
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    /// One timeslice of encoded media
    Data(Bytes),
    /// The device failed; no further events follow
    Error(String),
    /// The device finished after a stop request or the end of its stream
    Stopped,
}

/// Platform media-recording primitive
pub trait CaptureDevice: Send {
    fn mime_type(&self) -> &str;

    /// Begin emitting a chunk every `timeslice`
    fn start(&mut self, timeslice: Duration, sink: mpsc::Sender<CaptureEvent>) -> Result<(), RecordingError>;

    /// Request a stop. The device flushes what it holds and then reports
    /// [`CaptureEvent::Stopped`].
    fn stop(&mut self);
}

/// Creates capture devices for streams
pub trait CaptureDeviceFactory: Send + Sync {
    fn is_type_supported(&self, mime_type: &str) -> bool;

    fn create(
        &self,
        stream: &MediaStream,
        settings: &CaptureSettings,
    ) -> Result<Box<dyn CaptureDevice>, RecordingError>;
}

/// Pick the configured format if supported, else the first supported fallback
pub fn resolve_mime_type(
    factory: &dyn CaptureDeviceFactory,
    preferred: &str,
) -> Result<String, RecordingError> {
    if factory.is_type_supported(preferred) {
        return Ok(preferred.to_string());
    }
    FALLBACK_MIME_TYPES
        .iter()
        .find(|mime| factory.is_type_supported(mime))
        .map(|mime| {
            tracing::warn!("{} is not supported, recording as {}", preferred, mime);
            mime.to_string()
        })
        .ok_or_else(|| RecordingError::UnsupportedMimeType(preferred.to_string()))
}

/// Buffers a stream's samples and cuts them into timeslices
pub struct StreamRecorder {
    stream: MediaStream,
    mime_type: String,
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl StreamRecorder {
    pub fn new(stream: MediaStream, mime_type: impl Into<String>) -> Self {
        Self {
            stream,
            mime_type: mime_type.into(),
            stop_tx: None,
            task: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }
}

impl CaptureDevice for StreamRecorder {
    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    fn start(&mut self, timeslice: Duration, sink: mpsc::Sender<CaptureEvent>) -> Result<(), RecordingError> {
        if self.task.is_some() {
            return Err(RecordingError::Device("recorder already started".to_string()));
        }
        if self.stream.is_ended() {
            return Err(RecordingError::Device(format!("stream {} has ended", self.stream.id())));
        }
        if timeslice.is_zero() {
            return Err(RecordingError::Device("timeslice must be > 0".to_string()));
        }

        // Subscribe before returning so no sample pushed after start is missed
        let samples = self.stream.samples();
        let (stop_tx, stop_rx) = oneshot::channel();
        self.stop_tx = Some(stop_tx);
        self.task = Some(tokio::spawn(run_recorder(
            self.stream.clone(),
            samples,
            timeslice,
            sink,
            stop_rx,
        )));
        tracing::debug!("Recorder started on stream {}", self.stream.id());
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
    }
}

impl Drop for StreamRecorder {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_recorder(
    stream: MediaStream,
    mut samples: broadcast::Receiver<Bytes>,
    timeslice: Duration,
    sink: mpsc::Sender<CaptureEvent>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let mut ticker = interval_at(Instant::now() + timeslice, timeslice);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut buffer = BytesMut::new();

    let last = loop {
        tokio::select! {
            biased;

            _ = &mut stop_rx => break CaptureEvent::Stopped,
            sample = samples.recv() => match sample {
                Ok(sample) => buffer.extend_from_slice(&sample),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Recorder on {} dropped {} sample(s)", stream.id(), skipped);
                }
                Err(RecvError::Closed) => {
                    break CaptureEvent::Error(format!("stream {} closed", stream.id()));
                }
            },
            _ = ticker.tick() => {
                if !buffer.is_empty() && sink.send(CaptureEvent::Data(buffer.split().freeze())).await.is_err() {
                    return;
                }
            }
            _ = stream.wait_ended() => break CaptureEvent::Stopped,
        }
    };

    if last == CaptureEvent::Stopped {
        while let Ok(sample) = samples.try_recv() {
            buffer.extend_from_slice(&sample);
        }
    }
    if !buffer.is_empty() {
        let _ = sink.send(CaptureEvent::Data(buffer.freeze())).await;
    }
    let _ = sink.send(last).await;
}

/// Factory for [`StreamRecorder`]s
#[derive(Debug, Clone)]
pub struct StreamRecorderFactory {
    supported: Vec<String>,
}

impl StreamRecorderFactory {
    pub fn new(supported: Vec<String>) -> Self {
        Self { supported }
    }
}

impl Default for StreamRecorderFactory {
    fn default() -> Self {
        Self::new(FALLBACK_MIME_TYPES.iter().map(|m| m.to_string()).collect())
    }
}

impl CaptureDeviceFactory for StreamRecorderFactory {
    fn is_type_supported(&self, mime_type: &str) -> bool {
        let wanted = normalize_mime(mime_type);
        self.supported.iter().any(|m| normalize_mime(m) == wanted)
    }

    fn create(
        &self,
        stream: &MediaStream,
        settings: &CaptureSettings,
    ) -> Result<Box<dyn CaptureDevice>, RecordingError> {
        if !self.is_type_supported(&settings.mime_type) {
            return Err(RecordingError::UnsupportedMimeType(settings.mime_type.clone()));
        }
        Ok(Box::new(StreamRecorder::new(stream.clone(), settings.mime_type.clone())))
    }
}

fn normalize_mime(mime: &str) -> String {
    mime.chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_lowercase()
}
