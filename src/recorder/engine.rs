//! Recording engine
//!
//! Runs one capture device per participant, persists each timeslice as a
//! numbered chunk as soon as it arrives, and reassembles a participant's
//! chunks into a single blob on request. Chunks that arrive after a stop
//! request are dropped.

use super::device::{resolve_mime_type, CaptureDevice, CaptureDeviceFactory, CaptureEvent, StreamRecorderFactory};
use super::error::{RecordingError, RecordingResult};
use super::events::{RecordingEvent, RecordingEventKind};
use super::state::{
    CaptureSettings, RecordingBlob, RecordingChunk, RecordingSession, RecordingStatus, StorageEstimate,
};
use super::store::{RecordingStore, SledRecordingStore};
use crate::config::RecordingConfig;
use crate::media::MediaStream;
use crate::utils::events::{EventBus, ListenerId};
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, mpsc, OnceCell};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Capture events buffered between a device and its session task
const CAPTURE_BUFFER: usize = 64;

/// Records participants' streams into the chunk store
#[derive(Clone)]
pub struct RecordingEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: RecordingConfig,
    store: Arc<dyn RecordingStore>,
    devices: Arc<dyn CaptureDeviceFactory>,
    events: EventBus<RecordingEvent>,
    registry: Mutex<Registry>,
    initialized: OnceCell<()>,
}

#[derive(Default)]
struct Registry {
    active: HashMap<String, Arc<ActiveRecording>>,
    /// Participants with a start in flight
    starting: HashSet<String>,
}

struct ActiveRecording {
    session: Mutex<RecordingSession>,
    accepting: AtomicBool,
    device: Mutex<Option<Box<dyn CaptureDevice>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ActiveRecording {
    fn participant_id(&self) -> String {
        self.session.lock().participant_id.clone()
    }

    fn release_device(&self) {
        let device = self.device.lock().take();
        if let Some(mut device) = device {
            device.stop();
        }
    }
}

/// Holds a participant's slot while a start is in flight
struct Reservation<'a> {
    registry: &'a Mutex<Registry>,
    participant_id: String,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.registry.lock().starting.remove(&self.participant_id);
    }
}

impl RecordingEngine {
    pub fn new(
        config: RecordingConfig,
        store: Arc<dyn RecordingStore>,
        devices: Arc<dyn CaptureDeviceFactory>,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                config,
                store,
                devices,
                events: EventBus::new(),
                registry: Mutex::new(Registry::default()),
                initialized: OnceCell::new(),
            }),
        }
    }

    /// sled-backed engine recording through [`StreamRecorder`](super::device::StreamRecorder)s
    pub fn from_config(config: RecordingConfig) -> Self {
        let store = SledRecordingStore::new(config.storage_dir.clone(), config.storage_quota_bytes);
        Self::new(config, Arc::new(store), Arc::new(StreamRecorderFactory::default()))
    }

    /// Open the store. Safe to call more than once.
    pub async fn initialize(&self) -> RecordingResult<()> {
        self.inner
            .initialized
            .get_or_try_init(|| async {
                self.inner.store.open().await?;
                tracing::info!("Recording store ready");
                Ok::<_, RecordingError>(())
            })
            .await?;
        Ok(())
    }

    /// Start capturing `stream` for a participant
    pub async fn start_recording(
        &self,
        stream: &MediaStream,
        participant_id: &str,
        participant_name: &str,
        room_id: &str,
    ) -> RecordingResult<RecordingSession> {
        self.initialize().await?;

        let _reservation = {
            let mut registry = self.inner.registry.lock();
            if registry.active.contains_key(participant_id) || registry.starting.contains(participant_id) {
                return Err(RecordingError::AlreadyRecording(participant_id.to_string()));
            }
            registry.starting.insert(participant_id.to_string());
            Reservation {
                registry: &self.inner.registry,
                participant_id: participant_id.to_string(),
            }
        };

        let config = &self.inner.config;
        let estimate = self.inner.store.estimate().await?;
        if estimate.available_space < config.storage_safety_margin_bytes {
            tracing::warn!(
                "Refusing to record {}: {} bytes free, {} required",
                participant_id,
                estimate.available_space,
                config.storage_safety_margin_bytes
            );
            self.inner.events.emit(RecordingEvent::StorageFull {
                participant_id: participant_id.to_string(),
                available_space: estimate.available_space,
            });
            return Err(RecordingError::InsufficientStorage {
                available: estimate.available_space,
                required: config.storage_safety_margin_bytes,
            });
        }

        let mime_type = resolve_mime_type(self.inner.devices.as_ref(), &config.mime_type)?;
        let settings = CaptureSettings::from_config(config, mime_type);
        let next_sequence = self.inner.store.next_sequence(participant_id).await?;

        let mut device = self.inner.devices.create(stream, &settings)?;
        let mut session = RecordingSession::new(room_id, participant_id, participant_name, settings);
        self.inner
            .store
            .put_session(&session)
            .await
            .map_err(RecordingError::write_failed)?;

        let (tx, rx) = mpsc::channel(CAPTURE_BUFFER);
        if let Err(e) = device.start(config.chunk_interval, tx) {
            session.transition(RecordingStatus::Failed)?;
            session.finish(Utc::now());
            if let Err(store_err) = self.inner.store.put_session(&session).await {
                tracing::warn!("Failed to persist failed session {}: {}", session.id, store_err);
            }
            return Err(e);
        }

        let active = Arc::new(ActiveRecording {
            session: Mutex::new(session.clone()),
            accepting: AtomicBool::new(true),
            device: Mutex::new(Some(device)),
            task: Mutex::new(None),
        });
        self.inner
            .registry
            .lock()
            .active
            .insert(participant_id.to_string(), active.clone());

        let task = tokio::spawn(run_session(
            Arc::downgrade(&self.inner),
            active.clone(),
            rx,
            next_sequence,
        ));
        *active.task.lock() = Some(task);

        tracing::info!(
            "Recording started for {} ({}) as {} from sequence {}",
            participant_id,
            session.capture.mime_type,
            session.id,
            next_sequence
        );
        self.inner.events.emit(RecordingEvent::RecordingStarted {
            session_id: session.id.clone(),
            participant_id: participant_id.to_string(),
        });
        Ok(session)
    }

    /// Stop a participant's recording and wait for it to be finalized.
    /// Stopping a participant that is not recording is a no-op.
    pub async fn stop_recording(&self, participant_id: &str) -> RecordingResult<()> {
        let active = self.inner.registry.lock().active.get(participant_id).cloned();
        let Some(active) = active else {
            tracing::warn!("No active recording for {}", participant_id);
            return Ok(());
        };

        active.accepting.store(false, Ordering::SeqCst);
        if let Some(device) = active.device.lock().as_mut() {
            device.stop();
        }

        let task = active.task.lock().take();
        match task {
            Some(mut task) => match tokio::time::timeout(self.inner.config.stop_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!("Recording task for {} ended abnormally: {}", participant_id, e);
                    self.inner.finalize(&active).await;
                }
                Err(_) => {
                    tracing::warn!(
                        "Capture device for {} did not stop within {:?}",
                        participant_id,
                        self.inner.config.stop_timeout
                    );
                    task.abort();
                    self.inner.finalize(&active).await;
                }
            },
            None => self.inner.finalize(&active).await,
        }
        Ok(())
    }

    /// Concatenate a participant's chunks, in sequence order, into one blob
    pub async fn process_recording(&self, participant_id: &str) -> RecordingResult<RecordingBlob> {
        self.initialize().await?;

        let chunks = self.inner.store.chunks_for_participant(participant_id).await?;
        let Some(first) = chunks.first() else {
            return Err(RecordingError::NoChunksFound(participant_id.to_string()));
        };
        let mime_type = first.mime_type.clone();

        let mut latest = self
            .inner
            .store
            .sessions_for_participant(participant_id)
            .await?
            .into_iter()
            .filter(|s| s.status == RecordingStatus::Stopped)
            .max_by_key(|s| s.start_time);
        if let Some(session) = latest.as_mut() {
            session.transition(RecordingStatus::Processing)?;
            self.inner
                .store
                .put_session(session)
                .await
                .map_err(RecordingError::write_failed)?;
        }

        let total_size: u64 = chunks.iter().map(|c| c.data.len() as u64).sum();
        let mut data = BytesMut::with_capacity(total_size as usize);
        for chunk in &chunks {
            data.extend_from_slice(&chunk.data);
        }
        let blob = RecordingBlob {
            mime_type,
            data: data.freeze(),
            chunk_count: chunks.len(),
            total_size,
        };

        if let Some(session) = latest.as_mut() {
            session.transition(RecordingStatus::Completed)?;
            self.inner
                .store
                .put_session(session)
                .await
                .map_err(RecordingError::write_failed)?;
        }

        tracing::info!(
            "Processed {} chunk(s) for {} ({} bytes)",
            blob.chunk_count,
            participant_id,
            total_size
        );
        self.inner.events.emit(RecordingEvent::ProcessingComplete {
            participant_id: participant_id.to_string(),
            session_id: latest.map(|s| s.id),
            total_size,
        });
        Ok(blob)
    }

    /// Delete a participant's chunks. Session records are kept.
    pub async fn clear_recording_data(&self, participant_id: &str) -> RecordingResult<usize> {
        self.initialize().await?;
        let removed = self.inner.store.delete_chunks_for_participant(participant_id).await?;
        tracing::info!("Cleared {} chunk(s) for {}", removed, participant_id);
        Ok(removed)
    }

    /// Stop every active recording concurrently
    pub async fn stop_all_recordings(&self) {
        let participants: Vec<String> = self.inner.registry.lock().active.keys().cloned().collect();
        if participants.is_empty() {
            return;
        }
        tracing::info!("Stopping {} recording(s)", participants.len());

        let results = futures::future::join_all(participants.iter().map(|p| self.stop_recording(p))).await;
        for (participant_id, result) in participants.iter().zip(results) {
            if let Err(e) = result {
                tracing::error!("Failed to stop recording for {}: {}", participant_id, e);
            }
        }
    }

    /// Stop everything; call before dropping the engine
    pub async fn cleanup(&self) {
        self.stop_all_recordings().await;
    }

    pub fn is_recording(&self, participant_id: &str) -> bool {
        self.inner.registry.lock().active.contains_key(participant_id)
    }

    pub fn active_session(&self, participant_id: &str) -> Option<RecordingSession> {
        let active = self.inner.registry.lock().active.get(participant_id).cloned();
        active.map(|a| a.session.lock().clone())
    }

    pub fn active_sessions(&self) -> Vec<RecordingSession> {
        let active: Vec<Arc<ActiveRecording>> = self.inner.registry.lock().active.values().cloned().collect();
        active.iter().map(|a| a.session.lock().clone()).collect()
    }

    pub async fn storage_usage(&self) -> RecordingResult<StorageEstimate> {
        self.initialize().await?;
        Ok(self.inner.store.estimate().await?)
    }

    /// Every persisted session for a room, oldest first
    pub async fn recording_sessions(&self, room_id: &str) -> RecordingResult<Vec<RecordingSession>> {
        self.initialize().await?;
        Ok(self.inner.store.sessions_for_room(room_id).await?)
    }

    pub fn on<F>(&self, kind: RecordingEventKind, listener: F) -> ListenerId
    where
        F: Fn(&RecordingEvent) + Send + Sync + 'static,
    {
        self.inner.events.on(kind, listener)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.events.off(id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.inner.events.subscribe()
    }
}

impl EngineInner {
    async fn on_chunk(&self, active: &ActiveRecording, data: Bytes, next_sequence: &mut u64) {
        if !active.accepting.load(Ordering::SeqCst) {
            tracing::debug!("Dropping {} byte chunk that arrived after stop", data.len());
            return;
        }

        let chunk = {
            let session = active.session.lock();
            let size = data.len() as u64;
            RecordingChunk {
                id: Uuid::new_v4().to_string(),
                participant_id: session.participant_id.clone(),
                participant_name: session.participant_name.clone(),
                session_id: session.id.clone(),
                timestamp: Utc::now(),
                duration_ms: session.capture.chunk_interval_ms,
                size,
                mime_type: session.capture.mime_type.clone(),
                sequence: *next_sequence,
                oversized: size > self.config.max_chunk_size_bytes,
                data,
            }
        };
        if chunk.oversized {
            tracing::warn!(
                "Chunk {} for {} is {} bytes, over the {} byte limit",
                chunk.sequence,
                chunk.participant_id,
                chunk.size,
                self.config.max_chunk_size_bytes
            );
        }

        if let Err(e) = self.store.put_chunk(&chunk).await {
            tracing::error!("Failed to store chunk {} for {}: {}", chunk.sequence, chunk.participant_id, e);
            self.events.emit(RecordingEvent::RecordingError {
                message: RecordingError::write_failed(e).to_string(),
                session_id: Some(chunk.session_id.clone()),
                participant_id: Some(chunk.participant_id.clone()),
            });
            return;
        }
        *next_sequence += 1;

        let snapshot = {
            let mut session = active.session.lock();
            session.record_chunk(chunk.size, chunk.timestamp);
            session.clone()
        };
        if let Err(e) = self.store.put_session(&snapshot).await {
            tracing::warn!("Failed to update session {}: {}", snapshot.id, e);
            self.events.emit(RecordingEvent::RecordingError {
                message: RecordingError::write_failed(e).to_string(),
                session_id: Some(snapshot.id.clone()),
                participant_id: Some(snapshot.participant_id.clone()),
            });
        }

        tracing::debug!("Stored chunk {} for {} ({} bytes)", chunk.sequence, chunk.participant_id, chunk.size);
        self.events.emit(RecordingEvent::ChunkAvailable { chunk });
    }

    /// Mark the session stopped and release its device. Idempotent.
    async fn finalize(&self, active: &Arc<ActiveRecording>) {
        active.accepting.store(false, Ordering::SeqCst);
        let snapshot = {
            let mut session = active.session.lock();
            if session.status != RecordingStatus::Recording {
                None
            } else {
                session.finish(Utc::now());
                session.status = RecordingStatus::Stopped;
                Some(session.clone())
            }
        };
        active.release_device();
        self.remove_active(active);

        let Some(session) = snapshot else {
            return;
        };
        if let Err(e) = self.store.put_session(&session).await {
            tracing::error!("Failed to persist stopped session {}: {}", session.id, e);
            self.events.emit(RecordingEvent::RecordingError {
                message: RecordingError::write_failed(e).to_string(),
                session_id: Some(session.id.clone()),
                participant_id: Some(session.participant_id.clone()),
            });
        }

        tracing::info!(
            "Recording stopped for {}: {} chunk(s), {} bytes, {}ms",
            session.participant_id,
            session.chunk_count,
            session.total_size,
            session.duration_ms
        );
        self.events.emit(RecordingEvent::RecordingStopped {
            session_id: session.id,
            participant_id: session.participant_id,
        });
    }

    /// The device failed mid-session
    async fn fail(&self, active: &Arc<ActiveRecording>, message: String) {
        active.accepting.store(false, Ordering::SeqCst);
        let snapshot = {
            let mut session = active.session.lock();
            if session.transition(RecordingStatus::Failed).is_err() {
                None
            } else {
                session.finish(Utc::now());
                Some(session.clone())
            }
        };
        active.release_device();
        self.remove_active(active);

        let Some(session) = snapshot else {
            return;
        };
        if let Err(e) = self.store.put_session(&session).await {
            tracing::warn!("Failed to persist failed session {}: {}", session.id, e);
        }

        tracing::error!("Recording failed for {}: {}", session.participant_id, message);
        self.events.emit(RecordingEvent::RecordingError {
            message: RecordingError::Device(message).to_string(),
            session_id: Some(session.id),
            participant_id: Some(session.participant_id),
        });
    }

    fn remove_active(&self, active: &Arc<ActiveRecording>) {
        let participant_id = active.participant_id();
        let mut registry = self.registry.lock();
        if registry
            .active
            .get(&participant_id)
            .is_some_and(|current| Arc::ptr_eq(current, active))
        {
            registry.active.remove(&participant_id);
        }
    }
}

/// Drains one device's events until it stops, fails or the engine goes away
async fn run_session(
    engine: Weak<EngineInner>,
    active: Arc<ActiveRecording>,
    mut events: mpsc::Receiver<CaptureEvent>,
    mut next_sequence: u64,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = engine.upgrade() else {
            active.release_device();
            return;
        };
        match event {
            CaptureEvent::Data(data) => inner.on_chunk(&active, data, &mut next_sequence).await,
            CaptureEvent::Error(message) => {
                inner.fail(&active, message).await;
                return;
            }
            CaptureEvent::Stopped => {
                inner.finalize(&active).await;
                return;
            }
        }
    }

    if let Some(inner) = engine.upgrade() {
        inner.finalize(&active).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{MediaTrack, StreamSource, TrackKind};
    use crate::testing::{FakeCaptureFactory, FlakyStore};
    use crate::utils::events::BusEvent;
    use std::time::Duration;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> RecordingConfig {
        RecordingConfig {
            storage_dir: dir.path().to_path_buf(),
            storage_safety_margin_bytes: 1024,
            mime_type: "audio/webm".to_string(),
            chunk_interval: Duration::from_millis(100),
            stop_timeout: Duration::from_secs(2),
            ..Default::default()
        }
    }

    fn stream() -> MediaStream {
        MediaStream::new(StreamSource::User, vec![MediaTrack::new(TrackKind::Audio, "Mic")])
    }

    struct Harness {
        _dir: TempDir,
        engine: RecordingEngine,
        store: Arc<FlakyStore>,
        devices: Arc<FakeCaptureFactory>,
    }

    fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FlakyStore::new(dir.path()));
        let devices = Arc::new(FakeCaptureFactory::new());
        let engine = RecordingEngine::new(config(&dir), store.clone(), devices.clone());
        Harness {
            _dir: dir,
            engine,
            store,
            devices,
        }
    }

    async fn wait_for(rx: &mut broadcast::Receiver<RecordingEvent>, kind: RecordingEventKind, n: usize) -> Vec<RecordingEvent> {
        let mut seen = Vec::new();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while seen.len() < n {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Ok(event)) if event.kind() == kind => seen.push(event),
                Ok(Ok(_)) => {}
                _ => break,
            }
        }
        seen
    }

    fn sequences(chunks: &[RecordingChunk]) -> Vec<u64> {
        chunks.iter().map(|c| c.sequence).collect()
    }

    #[tokio::test]
    async fn test_records_stream_in_timeslices() {
        let dir = TempDir::new().unwrap();
        let engine = RecordingEngine::from_config(config(&dir));
        let stream = stream();
        let mut rx = engine.subscribe();

        let feeder = {
            let stream = stream.clone();
            tokio::spawn(async move {
                loop {
                    stream.push_sample(Bytes::from_static(b"frame"));
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            })
        };

        let session = engine.start_recording(&stream, "alice", "Alice", "room-1").await.unwrap();
        assert_eq!(session.status, RecordingStatus::Recording);
        assert!(engine.is_recording("alice"));

        tokio::time::sleep(Duration::from_millis(250)).await;
        engine.stop_recording("alice").await.unwrap();
        feeder.abort();

        let chunks: Vec<RecordingChunk> = {
            let mut chunks = Vec::new();
            while let Ok(event) = rx.try_recv() {
                if let RecordingEvent::ChunkAvailable { chunk } = event {
                    chunks.push(chunk);
                }
            }
            chunks
        };
        assert!(chunks.len() >= 2, "got {} chunks", chunks.len());
        assert!(chunks.iter().all(|c| c.participant_name == "Alice" && c.session_id == session.id));
        assert_eq!(sequences(&chunks), (0..chunks.len() as u64).collect::<Vec<_>>());

        let stored = engine.recording_sessions("room-1").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, session.id);
        assert_eq!(stored[0].status, RecordingStatus::Stopped);
        assert_eq!(stored[0].chunk_count, chunks.len() as u64);
        assert!(stored[0].end_time.is_some());
        assert!(!engine.is_recording("alice"));

        let blob = engine.process_recording("alice").await.unwrap();
        assert_eq!(blob.chunk_count, chunks.len());
    }

    #[tokio::test]
    async fn test_sequences_are_gapless_per_participant() {
        let h = harness();
        let mut rx = h.engine.subscribe();
        h.engine.start_recording(&stream(), "alice", "Alice", "room").await.unwrap();
        h.engine.start_recording(&stream(), "bob", "Bob", "room").await.unwrap();
        let alice = h.devices.sink(0).unwrap();
        let bob = h.devices.sink(1).unwrap();

        for _ in 0..5 {
            alice.send(CaptureEvent::Data(Bytes::from_static(b"a"))).await.unwrap();
            bob.send(CaptureEvent::Data(Bytes::from_static(b"bb"))).await.unwrap();
        }
        assert_eq!(wait_for(&mut rx, RecordingEventKind::ChunkAvailable, 10).await.len(), 10);

        let alice_chunks = h.store.chunks_for_participant("alice").await.unwrap();
        let bob_chunks = h.store.chunks_for_participant("bob").await.unwrap();
        assert_eq!(sequences(&alice_chunks), vec![0, 1, 2, 3, 4]);
        assert_eq!(sequences(&bob_chunks), vec![0, 1, 2, 3, 4]);
        assert!(bob_chunks.iter().all(|c| c.data.as_ref() == b"bb"));
    }

    #[tokio::test]
    async fn test_duplicate_start_is_rejected() {
        let h = harness();
        let mut rx = h.engine.subscribe();
        let first = h.engine.start_recording(&stream(), "alice", "Alice", "room").await.unwrap();
        let sink = h.devices.sink(0).unwrap();
        sink.send(CaptureEvent::Data(Bytes::from_static(b"1"))).await.unwrap();
        wait_for(&mut rx, RecordingEventKind::ChunkAvailable, 1).await;

        let second = h.engine.start_recording(&stream(), "alice", "Alice", "room").await;
        assert!(matches!(second, Err(RecordingError::AlreadyRecording(_))));
        assert_eq!(h.devices.created(), 1);
        assert_eq!(h.engine.active_sessions().len(), 1);
        assert_eq!(h.engine.active_session("alice").unwrap().id, first.id);

        sink.send(CaptureEvent::Data(Bytes::from_static(b"2"))).await.unwrap();
        wait_for(&mut rx, RecordingEventKind::ChunkAvailable, 1).await;
        let chunks = h.store.chunks_for_participant("alice").await.unwrap();
        assert_eq!(sequences(&chunks), vec![0, 1]);
    }

    #[tokio::test]
    async fn test_low_storage_refuses_start() {
        let h = harness();
        h.store.set_available(Some(100));
        let mut rx = h.engine.subscribe();

        let result = h.engine.start_recording(&stream(), "alice", "Alice", "room").await;
        assert!(matches!(
            result,
            Err(RecordingError::InsufficientStorage { available: 100, required: 1024 })
        ));

        let events = wait_for(&mut rx, RecordingEventKind::StorageFull, 2).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            RecordingEvent::StorageFull { participant_id, available_space: 100 } if participant_id == "alice"
        ));
        assert_eq!(h.devices.created(), 0);
        assert!(h.engine.active_sessions().is_empty());
        assert!(h.store.sessions_for_participant("alice").await.unwrap().is_empty());

        h.store.set_available(None);
        h.engine.start_recording(&stream(), "alice", "Alice", "room").await.unwrap();
    }

    #[tokio::test]
    async fn test_process_reassembles_in_order() {
        let h = harness();
        let mut rx = h.engine.subscribe();
        let session = h.engine.start_recording(&stream(), "alice", "Alice", "room").await.unwrap();
        let sink = h.devices.sink(0).unwrap();
        for part in [&b"he"[..], b"ll", b"o!"] {
            sink.send(CaptureEvent::Data(Bytes::copy_from_slice(part))).await.unwrap();
        }
        wait_for(&mut rx, RecordingEventKind::ChunkAvailable, 3).await;
        h.engine.stop_recording("alice").await.unwrap();

        let blob = h.engine.process_recording("alice").await.unwrap();
        assert_eq!(blob.data.as_ref(), b"hello!");
        assert_eq!(blob.chunk_count, 3);
        assert_eq!(blob.total_size, 6);
        assert_eq!(blob.mime_type, "audio/webm");

        let stored = h.store.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RecordingStatus::Completed);

        let done = wait_for(&mut rx, RecordingEventKind::ProcessingComplete, 1).await;
        assert!(matches!(
            &done[0],
            RecordingEvent::ProcessingComplete { session_id: Some(id), total_size: 6, .. } if *id == session.id
        ));
    }

    #[tokio::test]
    async fn test_process_without_chunks_fails() {
        let h = harness();
        assert!(matches!(
            h.engine.process_recording("nobody").await,
            Err(RecordingError::NoChunksFound(_))
        ));
    }

    #[tokio::test]
    async fn test_chunk_after_stop_is_dropped() {
        let h = harness();
        let mut rx = h.engine.subscribe();
        let session = h.engine.start_recording(&stream(), "alice", "Alice", "room").await.unwrap();
        let sink = h.devices.sink(0).unwrap();
        sink.send(CaptureEvent::Data(Bytes::from_static(b"kept"))).await.unwrap();
        wait_for(&mut rx, RecordingEventKind::ChunkAvailable, 1).await;

        // The fake device emits one more chunk while stopping
        h.engine.stop_recording("alice").await.unwrap();

        let chunks = h.store.chunks_for_participant("alice").await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].data.as_ref(), b"kept");
        let stored = h.store.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(stored.chunk_count, 1);
        assert_eq!(stored.status, RecordingStatus::Stopped);
    }

    #[tokio::test]
    async fn test_stop_without_recording_is_noop() {
        let h = harness();
        let mut rx = h.engine.subscribe();
        h.engine.stop_recording("ghost").await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_clear_keeps_sessions_and_restarts_sequence() {
        let h = harness();
        let mut rx = h.engine.subscribe();
        h.engine.start_recording(&stream(), "alice", "Alice", "room").await.unwrap();
        let sink = h.devices.sink(0).unwrap();
        sink.send(CaptureEvent::Data(Bytes::from_static(b"x"))).await.unwrap();
        sink.send(CaptureEvent::Data(Bytes::from_static(b"y"))).await.unwrap();
        wait_for(&mut rx, RecordingEventKind::ChunkAvailable, 2).await;
        h.engine.stop_recording("alice").await.unwrap();

        assert_eq!(h.engine.clear_recording_data("alice").await.unwrap(), 2);
        assert!(matches!(
            h.engine.process_recording("alice").await,
            Err(RecordingError::NoChunksFound(_))
        ));
        assert_eq!(h.engine.recording_sessions("room").await.unwrap().len(), 1);

        h.engine.start_recording(&stream(), "alice", "Alice", "room").await.unwrap();
        let sink = h.devices.sink(1).unwrap();
        sink.send(CaptureEvent::Data(Bytes::from_static(b"z"))).await.unwrap();
        wait_for(&mut rx, RecordingEventKind::ChunkAvailable, 1).await;
        assert_eq!(sequences(&h.store.chunks_for_participant("alice").await.unwrap()), vec![0]);
    }

    #[tokio::test]
    async fn test_new_session_continues_sequence() {
        let h = harness();
        let mut rx = h.engine.subscribe();
        h.engine.start_recording(&stream(), "alice", "Alice", "room").await.unwrap();
        let sink = h.devices.sink(0).unwrap();
        sink.send(CaptureEvent::Data(Bytes::from_static(b"1"))).await.unwrap();
        sink.send(CaptureEvent::Data(Bytes::from_static(b"2"))).await.unwrap();
        wait_for(&mut rx, RecordingEventKind::ChunkAvailable, 2).await;
        h.engine.stop_recording("alice").await.unwrap();

        h.engine.start_recording(&stream(), "alice", "Alice", "room").await.unwrap();
        let sink = h.devices.sink(1).unwrap();
        sink.send(CaptureEvent::Data(Bytes::from_static(b"3"))).await.unwrap();
        wait_for(&mut rx, RecordingEventKind::ChunkAvailable, 1).await;

        let chunks = h.store.chunks_for_participant("alice").await.unwrap();
        assert_eq!(sequences(&chunks), vec![0, 1, 2]);
        assert_eq!(h.engine.recording_sessions("room").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_stop_all_recordings() {
        let h = harness();
        let mut rx = h.engine.subscribe();
        h.engine.start_recording(&stream(), "alice", "Alice", "room").await.unwrap();
        h.engine.start_recording(&stream(), "bob", "Bob", "room").await.unwrap();
        assert_eq!(h.engine.active_sessions().len(), 2);

        h.engine.cleanup().await;

        assert!(h.engine.active_sessions().is_empty());
        assert_eq!(wait_for(&mut rx, RecordingEventKind::RecordingStopped, 2).await.len(), 2);
        let sessions = h.engine.recording_sessions("room").await.unwrap();
        assert!(sessions.iter().all(|s| s.status == RecordingStatus::Stopped));
    }

    #[tokio::test]
    async fn test_failed_chunk_write_keeps_recording() {
        let h = harness();
        let mut rx = h.engine.subscribe();
        let session = h.engine.start_recording(&stream(), "alice", "Alice", "room").await.unwrap();
        let sink = h.devices.sink(0).unwrap();

        h.store.fail_chunk_writes(true);
        sink.send(CaptureEvent::Data(Bytes::from_static(b"lost"))).await.unwrap();
        let errors = wait_for(&mut rx, RecordingEventKind::RecordingError, 1).await;
        assert!(matches!(
            &errors[0],
            RecordingEvent::RecordingError { session_id: Some(id), .. } if *id == session.id
        ));
        assert!(h.engine.is_recording("alice"));

        h.store.fail_chunk_writes(false);
        sink.send(CaptureEvent::Data(Bytes::from_static(b"kept"))).await.unwrap();
        wait_for(&mut rx, RecordingEventKind::ChunkAvailable, 1).await;
        let chunks = h.store.chunks_for_participant("alice").await.unwrap();
        assert_eq!(sequences(&chunks), vec![0]);
        assert_eq!(h.engine.active_session("alice").unwrap().chunk_count, 1);
    }

    #[tokio::test]
    async fn test_device_error_fails_session() {
        let h = harness();
        let mut rx = h.engine.subscribe();
        let session = h.engine.start_recording(&stream(), "alice", "Alice", "room").await.unwrap();
        let sink = h.devices.sink(0).unwrap();

        sink.send(CaptureEvent::Error("encoder crashed".to_string())).await.unwrap();
        let errors = wait_for(&mut rx, RecordingEventKind::RecordingError, 1).await;
        assert_eq!(errors.len(), 1);

        assert!(!h.engine.is_recording("alice"));
        let stored = h.store.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RecordingStatus::Failed);
    }

    #[tokio::test]
    async fn test_oversized_chunks_are_flagged() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FlakyStore::new(dir.path()));
        let devices = Arc::new(FakeCaptureFactory::new());
        let config = RecordingConfig {
            max_chunk_size_bytes: 4,
            ..config(&dir)
        };
        let engine = RecordingEngine::new(config, store.clone(), devices.clone());
        let mut rx = engine.subscribe();

        engine.start_recording(&stream(), "alice", "Alice", "room").await.unwrap();
        let sink = devices.sink(0).unwrap();
        sink.send(CaptureEvent::Data(Bytes::from_static(b"big chunk"))).await.unwrap();
        wait_for(&mut rx, RecordingEventKind::ChunkAvailable, 1).await;

        let chunks = store.chunks_for_participant("alice").await.unwrap();
        assert!(chunks[0].oversized);
        assert_eq!(chunks[0].data.as_ref(), b"big chunk");
    }
}
