//! In-memory fakes shared by the unit tests

use crate::connection::state::{IceConnectionState, PeerConnectionState};
use crate::connection::transport::{
    NegotiatedLink, NegotiationRequest, PeerLinkStats, PeerNegotiator, PeerTransport, TransportError,
    TransportEvent,
};
use crate::ice::{IceFetchError, IceServer, IceServerSet, IceServerSource};
use crate::media::{
    DeviceInfo, MediaConstraints, MediaDevices, MediaError, MediaStream, MediaTrack, StreamSource, TrackKind,
};
use crate::recorder::{
    CaptureDevice, CaptureDeviceFactory, CaptureEvent, CaptureSettings, RecordingChunk,
    RecordingError, RecordingSession, RecordingStore, SledRecordingStore, StorageEstimate, StoreError,
};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Scriptable platform media devices
pub struct FakeMediaDevices {
    pub user_media_error: Option<MediaError>,
    pub has_camera: bool,
    pub display_supported: bool,
    pub devices: Vec<DeviceInfo>,
    pub enumerate_error: Option<MediaError>,
}

impl Default for FakeMediaDevices {
    fn default() -> Self {
        Self {
            user_media_error: None,
            has_camera: true,
            display_supported: true,
            devices: Vec::new(),
            enumerate_error: None,
        }
    }
}

#[async_trait]
impl MediaDevices for FakeMediaDevices {
    async fn get_user_media(&self, constraints: &MediaConstraints) -> Result<MediaStream, MediaError> {
        if let Some(e) = &self.user_media_error {
            return Err(e.clone());
        }
        let mut tracks = Vec::new();
        if constraints.wants_audio() {
            tracks.push(MediaTrack::new(TrackKind::Audio, "Fake Microphone"));
        }
        if constraints.wants_video() && self.has_camera {
            tracks.push(MediaTrack::new(TrackKind::Video, "Fake Camera"));
        }
        Ok(MediaStream::new(StreamSource::User, tracks))
    }

    async fn get_display_media(&self, _constraints: &MediaConstraints) -> Result<MediaStream, MediaError> {
        Ok(MediaStream::new(
            StreamSource::Display,
            vec![MediaTrack::new(TrackKind::Video, "Fake Screen")],
        ))
    }

    async fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>, MediaError> {
        match &self.enumerate_error {
            Some(e) => Err(e.clone()),
            None => Ok(self.devices.clone()),
        }
    }

    fn supports_display_capture(&self) -> bool {
        self.display_supported
    }
}

/// ICE source returning a fixed list, or failing when given `None`
pub struct FakeIceSource {
    servers: Option<Vec<IceServer>>,
    calls: AtomicUsize,
}

impl FakeIceSource {
    pub fn new(servers: Option<Vec<IceServer>>) -> Self {
        Self {
            servers,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IceServerSource for FakeIceSource {
    async fn fetch(&self, _auth_token: Option<&str>) -> Result<Vec<IceServer>, IceFetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.servers.clone().ok_or(IceFetchError::Empty)
    }
}

/// Answer one HTTP request with `status` and `body`.
///
/// Returns the URL to request and a handle resolving to the raw request head.
pub async fn serve_once(status: u16, body: &str) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let body = body.to_string();

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
        }

        let response = format!(
            "HTTP/1.1 {} Test\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.ok();
        String::from_utf8_lossy(&request).into_owned()
    });

    (format!("http://{}/ice-servers", addr), handle)
}

/// Scripted negotiation result
#[derive(Debug, Clone)]
pub enum NegotiationOutcome {
    Connect,
    Fail(TransportError),
}

/// Negotiator that plays queued outcomes, then a default
pub struct FakeNegotiator {
    default: NegotiationOutcome,
    queue: Mutex<VecDeque<NegotiationOutcome>>,
    calls: AtomicUsize,
    last_request: Mutex<Option<NegotiationRequest>>,
    last_transport: Mutex<Option<Arc<FakeTransport>>>,
}

impl FakeNegotiator {
    pub fn new(default: NegotiationOutcome) -> Self {
        Self {
            default,
            queue: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
            last_transport: Mutex::new(None),
        }
    }

    pub fn push(&self, outcome: NegotiationOutcome) {
        self.queue.lock().push_back(outcome);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<NegotiationRequest> {
        self.last_request.lock().clone()
    }

    pub fn last_transport(&self) -> Option<Arc<FakeTransport>> {
        self.last_transport.lock().clone()
    }
}

#[async_trait]
impl PeerNegotiator for FakeNegotiator {
    async fn negotiate(
        &self,
        request: &NegotiationRequest,
        _ice_servers: Arc<IceServerSet>,
    ) -> Result<NegotiatedLink, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock() = Some(request.clone());

        let outcome = self.queue.lock().pop_front().unwrap_or_else(|| self.default.clone());
        match outcome {
            NegotiationOutcome::Fail(e) => Err(e),
            NegotiationOutcome::Connect => {
                let (tx, rx) = mpsc::channel(32);
                let transport = Arc::new(FakeTransport::new(tx));
                *self.last_transport.lock() = Some(transport.clone());
                Ok(NegotiatedLink {
                    transport,
                    events: rx,
                })
            }
        }
    }
}

/// Link whose state, stats and events are driven by the test
pub struct FakeTransport {
    state: Mutex<PeerConnectionState>,
    stats: Mutex<Vec<PeerLinkStats>>,
    events: mpsc::Sender<TransportEvent>,
    closes: AtomicUsize,
}

impl FakeTransport {
    fn new(events: mpsc::Sender<TransportEvent>) -> Self {
        Self {
            state: Mutex::new(PeerConnectionState::Connected),
            stats: Mutex::new(Vec::new()),
            events,
            closes: AtomicUsize::new(0),
        }
    }

    pub fn set_state(&self, state: PeerConnectionState) {
        *self.state.lock() = state;
    }

    pub fn set_stats(&self, stats: Vec<PeerLinkStats>) {
        *self.stats.lock() = stats;
    }

    pub fn send(&self, event: TransportEvent) {
        self.events.try_send(event).unwrap();
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerTransport for FakeTransport {
    fn connection_state(&self) -> PeerConnectionState {
        *self.state.lock()
    }

    fn ice_connection_state(&self) -> IceConnectionState {
        match self.connection_state() {
            PeerConnectionState::Connected => IceConnectionState::Connected,
            PeerConnectionState::Failed => IceConnectionState::Failed,
            PeerConnectionState::Disconnected => IceConnectionState::Disconnected,
            PeerConnectionState::Closed => IceConnectionState::Closed,
            PeerConnectionState::New | PeerConnectionState::Connecting => IceConnectionState::Checking,
        }
    }

    async fn stats(&self) -> Vec<PeerLinkStats> {
        self.stats.lock().clone()
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        *self.state.lock() = PeerConnectionState::Closed;
    }
}

/// Capture factory whose devices are fed by the test through [`FakeCaptureFactory::sink`]
#[derive(Default)]
pub struct FakeCaptureFactory {
    sinks: Arc<Mutex<Vec<mpsc::Sender<CaptureEvent>>>>,
    created: AtomicUsize,
}

impl FakeCaptureFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Event sender of the `index`th started device
    pub fn sink(&self, index: usize) -> Option<mpsc::Sender<CaptureEvent>> {
        self.sinks.lock().get(index).cloned()
    }
}

impl CaptureDeviceFactory for FakeCaptureFactory {
    fn is_type_supported(&self, _mime_type: &str) -> bool {
        true
    }

    fn create(
        &self,
        _stream: &MediaStream,
        settings: &CaptureSettings,
    ) -> Result<Box<dyn CaptureDevice>, RecordingError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeCaptureDevice {
            mime_type: settings.mime_type.clone(),
            sinks: self.sinks.clone(),
            sink: None,
        }))
    }
}

/// Emits one trailing chunk and then `Stopped` when asked to stop
pub struct FakeCaptureDevice {
    mime_type: String,
    sinks: Arc<Mutex<Vec<mpsc::Sender<CaptureEvent>>>>,
    sink: Option<mpsc::Sender<CaptureEvent>>,
}

impl CaptureDevice for FakeCaptureDevice {
    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    fn start(&mut self, _timeslice: Duration, sink: mpsc::Sender<CaptureEvent>) -> Result<(), RecordingError> {
        self.sinks.lock().push(sink.clone());
        self.sink = Some(sink);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(sink) = self.sink.take() {
            let _ = sink.try_send(CaptureEvent::Data(Bytes::from_static(b"late")));
            let _ = sink.try_send(CaptureEvent::Stopped);
        }
    }
}

/// sled store with switchable chunk-write failures and a scriptable estimate
pub struct FlakyStore {
    inner: SledRecordingStore,
    fail_chunks: AtomicBool,
    available: Mutex<Option<u64>>,
}

impl FlakyStore {
    pub fn new(root: &Path) -> Self {
        Self {
            inner: SledRecordingStore::new(root, 1024 * 1024 * 1024),
            fail_chunks: AtomicBool::new(false),
            available: Mutex::new(None),
        }
    }

    pub fn fail_chunk_writes(&self, fail: bool) {
        self.fail_chunks.store(fail, Ordering::SeqCst);
    }

    /// Override the free space reported by `estimate`
    pub fn set_available(&self, available: Option<u64>) {
        *self.available.lock() = available;
    }
}

#[async_trait]
impl RecordingStore for FlakyStore {
    async fn open(&self) -> Result<(), StoreError> {
        self.inner.open().await
    }

    async fn put_chunk(&self, chunk: &RecordingChunk) -> Result<(), StoreError> {
        if self.fail_chunks.load(Ordering::SeqCst) {
            return Err(StoreError::Sled(sled::Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            ))));
        }
        self.inner.put_chunk(chunk).await
    }

    async fn chunks_for_participant(&self, participant_id: &str) -> Result<Vec<RecordingChunk>, StoreError> {
        self.inner.chunks_for_participant(participant_id).await
    }

    async fn next_sequence(&self, participant_id: &str) -> Result<u64, StoreError> {
        self.inner.next_sequence(participant_id).await
    }

    async fn delete_chunks_for_participant(&self, participant_id: &str) -> Result<usize, StoreError> {
        self.inner.delete_chunks_for_participant(participant_id).await
    }

    async fn put_session(&self, session: &RecordingSession) -> Result<(), StoreError> {
        self.inner.put_session(session).await
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<RecordingSession>, StoreError> {
        self.inner.get_session(session_id).await
    }

    async fn sessions_for_participant(&self, participant_id: &str) -> Result<Vec<RecordingSession>, StoreError> {
        self.inner.sessions_for_participant(participant_id).await
    }

    async fn sessions_for_room(&self, room_id: &str) -> Result<Vec<RecordingSession>, StoreError> {
        self.inner.sessions_for_room(room_id).await
    }

    async fn estimate(&self) -> Result<StorageEstimate, StoreError> {
        let estimate = self.inner.estimate().await?;
        Ok(match *self.available.lock() {
            Some(available) => StorageEstimate::new(estimate.quota.saturating_sub(available), estimate.quota),
            None => estimate,
        })
    }
}
