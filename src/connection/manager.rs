//! Connection lifecycle manager
//!
//! Owns the link to a room: negotiation, health and quality polling, the
//! reconnection state machine and the per-participant session map.
//!
//! Every connect and disconnect bumps an epoch. Background work captures the
//! epoch it was started under and gives up as soon as it no longer matches, so
//! a timer or a delayed reconnection attempt can never act on a link that was
//! torn down in the meantime.

use super::backoff::reconnect_delay;
use super::error::ConnectionError;
use super::events::{ConnectionEvent, ConnectionEventKind};
use super::state::{ConnectionSession, ConnectionState, PeerConnectionState};
use super::transport::{NegotiatedLink, NegotiationRequest, PeerNegotiator, PeerTransport, TransportError, TransportEvent};
use crate::config::ConnectionConfig;
use crate::ice::{IceConfigProvider, IceServerSet};
use crate::media::MediaStream;
use crate::quality::{QualityRating, QualitySnapshot, QualityTracker};
use crate::utils::events::{EventBus, ListenerId};
use crate::utils::tasks::TaskHandle;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, mpsc};

/// Point-in-time view of the manager
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStats {
    pub state: ConnectionState,
    pub participants: usize,
    pub reconnect_attempts: u32,
    pub connected_since: Option<DateTime<Utc>>,
    pub ice_servers: usize,
}

#[derive(Default)]
struct ManagerState {
    phase: ConnectionState,
    epoch: u64,
    reconnect_attempts: u32,
    /// Parameters of the current visit, reused for reconnection
    request: Option<NegotiationRequest>,
    link: Option<Arc<dyn PeerTransport>>,
    connected_since: Option<DateTime<Utc>>,
    local_stream: Option<MediaStream>,
}

#[derive(Default)]
struct Timers {
    health: Option<TaskHandle>,
    quality: Option<TaskHandle>,
    transport_events: Option<TaskHandle>,
    reconnect: Option<TaskHandle>,
}

impl Timers {
    /// Take the link-bound tasks, leaving any reconnection in place
    fn take_polls(&mut self) -> [Option<TaskHandle>; 3] {
        [
            self.health.take(),
            self.quality.take(),
            self.transport_events.take(),
        ]
    }
}

struct Inner {
    config: ConnectionConfig,
    ice: Arc<IceConfigProvider>,
    negotiator: Arc<dyn PeerNegotiator>,
    events: EventBus<ConnectionEvent>,
    state: Mutex<ManagerState>,
    sessions: RwLock<HashMap<String, ConnectionSession>>,
    quality: Mutex<QualityTracker>,
    timers: Mutex<Timers>,
}

/// Drives the connection to one room
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(
        config: ConnectionConfig,
        ice: Arc<IceConfigProvider>,
        negotiator: Arc<dyn PeerNegotiator>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                ice,
                negotiator,
                events: EventBus::new(),
                state: Mutex::new(ManagerState::default()),
                sessions: RwLock::new(HashMap::new()),
                quality: Mutex::new(QualityTracker::new()),
                timers: Mutex::new(Timers::default()),
            }),
        }
    }

    /// Join a room.
    ///
    /// Refused with `AlreadyActive` while a connection is being established,
    /// is up, or is being recovered.
    pub async fn connect(
        &self,
        room_id: &str,
        participant_id: &str,
        display_name: &str,
        auth_token: Option<String>,
    ) -> Result<(), ConnectionError> {
        let (epoch, request) = {
            let mut state = self.inner.state.lock();
            if state.phase.is_active() {
                return Err(ConnectionError::AlreadyActive);
            }
            state.phase = ConnectionState::Connecting;
            state.epoch += 1;
            state.reconnect_attempts = 0;
            let request = NegotiationRequest {
                room_id: room_id.to_string(),
                participant_id: participant_id.to_string(),
                display_name: display_name.to_string(),
                auth_token,
                local_stream: state.local_stream.clone(),
            };
            state.request = Some(request.clone());
            (state.epoch, request)
        };
        // A reconnection left over from a failed visit is finished by now
        let stale = self.inner.timers.lock().reconnect.take();
        drop(stale);

        tracing::info!("Connecting {} to room {}", participant_id, room_id);

        let servers = self.inner.ice.refresh(request.auth_token.as_deref()).await;
        match self.inner.negotiator.negotiate(&request, servers).await {
            Ok(link) => {
                if !self.inner.install_link(epoch, link).await {
                    tracing::info!("Connection to room {} cancelled by disconnect", room_id);
                    return Err(ConnectionError::ConnectionFailed {
                        participant_id: participant_id.to_string(),
                        attempts: 0,
                        reason: "cancelled by disconnect".to_string(),
                    });
                }

                tracing::info!("Connected to room {}", room_id);
                self.inner.events.emit(ConnectionEvent::Connected {
                    room_id: room_id.to_string(),
                    participant_id: participant_id.to_string(),
                });
                if let Some(stream) = request.local_stream {
                    self.inner.events.emit(ConnectionEvent::LocalStream(stream));
                }
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Negotiation for room {} failed: {}", room_id, e);
                {
                    let mut state = self.inner.state.lock();
                    if state.epoch == epoch {
                        state.phase = ConnectionState::Failed;
                        state.request = None;
                    }
                }
                Err(e.into_connection_error(participant_id, 0))
            }
        }
    }

    /// Tear everything down. Safe from any state and idempotent; emits
    /// `disconnected` once per transition out of an active state.
    pub async fn disconnect(&self) {
        let (was_active, link) = {
            let mut state = self.inner.state.lock();
            let was_active = state.phase != ConnectionState::Idle;
            state.phase = ConnectionState::Idle;
            state.epoch += 1;
            state.reconnect_attempts = 0;
            state.request = None;
            state.connected_since = None;
            (was_active, state.link.take())
        };

        let timers = std::mem::take(&mut *self.inner.timers.lock());
        drop(timers);
        self.inner.ice.stop_refresh_timer();

        if let Some(link) = link {
            link.close().await;
        }
        self.inner.sessions.write().clear();
        self.inner.quality.lock().clear();

        if was_active {
            tracing::info!("Disconnected");
            self.inner.events.emit(ConnectionEvent::Disconnected);
        }
    }

    /// Attach the local stream offered to peers on the next negotiation
    pub fn set_local_stream(&self, stream: Option<MediaStream>) {
        let connected = {
            let mut state = self.inner.state.lock();
            state.local_stream = stream.clone();
            if let Some(request) = state.request.as_mut() {
                request.local_stream = stream.clone();
            }
            state.phase == ConnectionState::Connected
        };
        if let (true, Some(stream)) = (connected, stream) {
            self.inner.events.emit(ConnectionEvent::LocalStream(stream));
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.lock().phase
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.state.lock().reconnect_attempts
    }

    pub fn sessions(&self) -> Vec<ConnectionSession> {
        self.inner.sessions.read().values().cloned().collect()
    }

    pub fn session(&self, participant_id: &str) -> Option<ConnectionSession> {
        self.inner.sessions.read().get(participant_id).cloned()
    }

    /// Latest quality reading for a participant
    pub fn quality(&self, participant_id: &str) -> Option<QualitySnapshot> {
        self.inner.quality.lock().get(participant_id).cloned()
    }

    pub fn quality_snapshots(&self) -> Vec<QualitySnapshot> {
        self.inner.quality.lock().snapshot()
    }

    pub fn ice_servers(&self) -> Arc<IceServerSet> {
        self.inner.ice.current_servers()
    }

    pub fn stats(&self) -> ConnectionStats {
        let (state, reconnect_attempts, connected_since) = {
            let state = self.inner.state.lock();
            (state.phase, state.reconnect_attempts, state.connected_since)
        };
        ConnectionStats {
            state,
            participants: self.inner.sessions.read().len(),
            reconnect_attempts,
            connected_since,
            ice_servers: self.inner.ice.current_servers().len(),
        }
    }

    pub fn on<F>(&self, kind: ConnectionEventKind, listener: F) -> ListenerId
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        self.inner.events.on(kind, listener)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.events.off(id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }
}

impl Inner {
    fn current_epoch(&self) -> u64 {
        self.state.lock().epoch
    }

    /// Make a freshly negotiated link current and start its polls. Returns
    /// false (after closing the link) when the epoch moved on meanwhile.
    async fn install_link(self: &Arc<Self>, epoch: u64, link: NegotiatedLink) -> bool {
        let NegotiatedLink { transport, events } = link;
        let token = {
            let mut state = self.state.lock();
            if state.epoch == epoch {
                state.phase = ConnectionState::Connected;
                state.reconnect_attempts = 0;
                state.link = Some(transport.clone());
                state.connected_since = Some(Utc::now());
                Some(state.request.as_ref().and_then(|r| r.auth_token.clone()))
            } else {
                None
            }
        };

        let Some(token) = token else {
            transport.close().await;
            return false;
        };

        for session in self.sessions.write().values_mut() {
            session.reconnect_attempts = 0;
        }
        self.start_polls(epoch, events);
        self.ice.start_refresh_timer(token);
        true
    }

    fn start_polls(self: &Arc<Self>, epoch: u64, events: mpsc::Receiver<TransportEvent>) {
        let weak = Arc::downgrade(self);

        let health_ref = weak.clone();
        let health = TaskHandle::interval(
            "connection-health",
            self.config.health_check_interval,
            move || {
                let weak = health_ref.clone();
                async move {
                    match weak.upgrade() {
                        Some(inner) => inner.check_health(epoch),
                        None => false,
                    }
                }
            },
        );

        let quality_ref = weak.clone();
        let quality = TaskHandle::interval(
            "connection-quality",
            self.config.quality_interval,
            move || {
                let weak = quality_ref.clone();
                async move {
                    match weak.upgrade() {
                        Some(inner) => inner.sample_quality(epoch).await,
                        None => false,
                    }
                }
            },
        );

        let transport_events = TaskHandle::spawn("connection-events", pump_transport_events(weak, epoch, events));

        let replaced = {
            let mut timers = self.timers.lock();
            let old = timers.take_polls();
            timers.health = Some(health);
            timers.quality = Some(quality);
            timers.transport_events = Some(transport_events);
            old
        };
        drop(replaced);
    }

    /// One liveness check. Returns whether the poll should keep running.
    fn check_health(self: &Arc<Self>, epoch: u64) -> bool {
        let link = {
            let state = self.state.lock();
            if state.epoch != epoch {
                return false;
            }
            if state.phase != ConnectionState::Connected {
                return true;
            }
            state.link.clone()
        };

        let healthy = link
            .map(|l| l.connection_state() == PeerConnectionState::Connected)
            .unwrap_or(false);
        if healthy {
            return true;
        }

        tracing::warn!("Health check found the link down");
        tokio::spawn(self.clone().handle_link_lost(epoch));
        false
    }

    /// Sample statistics and report rating changes
    async fn sample_quality(&self, epoch: u64) -> bool {
        let link = {
            let state = self.state.lock();
            if state.epoch != epoch {
                return false;
            }
            if state.phase != ConnectionState::Connected {
                return true;
            }
            state.link.clone()
        };
        let Some(link) = link else {
            return true;
        };

        let samples = link.stats().await;
        if self.current_epoch() != epoch {
            return false;
        }

        let changes: Vec<(String, QualityRating)> = {
            let mut tracker = self.quality.lock();
            samples
                .iter()
                .filter_map(|sample| {
                    tracker
                        .record(&sample.participant_id, &sample.stats)
                        .map(|rating| (sample.participant_id.clone(), rating))
                })
                .collect()
        };

        for (participant_id, rating) in changes {
            tracing::debug!("Quality for {} is now {}", participant_id, rating.as_str());
            self.events.emit(ConnectionEvent::ConnectionQuality {
                participant_id,
                rating,
            });
        }
        true
    }

    fn on_transport_event(self: &Arc<Self>, epoch: u64, event: TransportEvent) {
        match event {
            TransportEvent::ParticipantJoined {
                participant_id,
                display_name,
            } => {
                let session = ConnectionSession::new(participant_id.clone(), display_name.clone());
                self.sessions.write().insert(participant_id.clone(), session);
                tracing::info!("Participant {} joined", participant_id);
                self.events.emit(ConnectionEvent::ParticipantJoined {
                    participant_id,
                    display_name,
                });
            }
            TransportEvent::ParticipantLeft { participant_id } => {
                let removed = self.sessions.write().remove(&participant_id);
                self.quality.lock().remove(&participant_id);
                if removed.is_some() {
                    tracing::info!("Participant {} left", participant_id);
                    self.events.emit(ConnectionEvent::ParticipantLeft { participant_id });
                }
            }
            TransportEvent::RemoteStream {
                participant_id,
                stream,
            } => {
                tracing::debug!("Remote stream {} from {}", stream.id(), participant_id);
                self.events.emit(ConnectionEvent::RemoteStream {
                    participant_id,
                    stream,
                });
            }
            TransportEvent::PeerStateChanged {
                participant_id,
                peer_state,
                ice_state,
            } => {
                if let Some(session) = self.sessions.write().get_mut(&participant_id) {
                    session.peer_state = peer_state;
                    session.ice_state = ice_state;
                }
            }
            TransportEvent::LinkStateChanged(link_state) => {
                if link_state.is_lost() {
                    tracing::warn!("Link reported {:?}", link_state);
                    tokio::spawn(self.clone().handle_link_lost(epoch));
                }
            }
        }
    }

    /// React to a dropped link. A no-op unless the link of `epoch` is still
    /// the connected one, so repeated reports collapse into one.
    async fn handle_link_lost(self: Arc<Self>, epoch: u64) {
        let link = {
            let mut state = self.state.lock();
            if state.epoch != epoch || state.phase != ConnectionState::Connected {
                return;
            }
            state.phase = ConnectionState::Disconnected;
            state.connected_since = None;
            state.link.take()
        };

        let polls = self.timers.lock().take_polls();
        drop(polls);
        self.ice.stop_refresh_timer();

        if let Some(link) = link {
            link.close().await;
        }
        for session in self.sessions.write().values_mut() {
            session.peer_state = PeerConnectionState::Disconnected;
        }

        if self.current_epoch() != epoch {
            return;
        }

        if !self.config.reconnect_enabled {
            tracing::warn!("Link lost and reconnection is disabled");
            self.fail(epoch, 0, "link lost and reconnection is disabled".to_string());
            return;
        }

        let task = TaskHandle::spawn("connection-reconnect", reconnect_loop(Arc::downgrade(&self), epoch));
        let previous = self.timers.lock().reconnect.replace(task);
        drop(previous);
    }

    /// Terminal failure: clear the visit and report once
    fn fail(&self, epoch: u64, attempts: u32, reason: String) {
        let participant_id = {
            let mut state = self.state.lock();
            if state.epoch != epoch {
                return;
            }
            state.phase = ConnectionState::Failed;
            state.link = None;
            state.connected_since = None;
            state
                .request
                .take()
                .map(|r| r.participant_id)
                .unwrap_or_default()
        };

        let polls = self.timers.lock().take_polls();
        drop(polls);
        self.ice.stop_refresh_timer();
        self.sessions.write().clear();
        self.quality.lock().clear();

        tracing::error!("Connection failed after {} attempt(s): {}", attempts, reason);
        self.events
            .emit(ConnectionEvent::ConnectionFailed(ConnectionError::ConnectionFailed {
                participant_id,
                attempts,
                reason,
            }));
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.ice.stop_refresh_timer();
    }
}

async fn pump_transport_events(weak: Weak<Inner>, epoch: u64, mut events: mpsc::Receiver<TransportEvent>) {
    while let Some(event) = events.recv().await {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        if inner.current_epoch() != epoch {
            return;
        }
        inner.on_transport_event(epoch, event);
    }
    tracing::debug!("Transport event feed closed");
}

/// Retry with backoff until connected, cancelled, or out of attempts
async fn reconnect_loop(weak: Weak<Inner>, epoch: u64) {
    let mut last_reason = "link lost".to_string();

    loop {
        let (attempt, max_attempts, delay) = {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let mut state = inner.state.lock();
            if state.epoch != epoch
                || !matches!(state.phase, ConnectionState::Disconnected | ConnectionState::Reconnecting)
            {
                return;
            }

            let max_attempts = inner.config.max_reconnect_attempts;
            if state.reconnect_attempts >= max_attempts {
                let attempts = state.reconnect_attempts;
                drop(state);
                inner.fail(epoch, attempts, last_reason);
                return;
            }

            let delay = reconnect_delay(
                state.reconnect_attempts,
                inner.config.reconnect_base_delay,
                inner.config.reconnect_multiplier,
                inner.config.reconnect_max_delay,
            );
            state.reconnect_attempts += 1;
            state.phase = ConnectionState::Reconnecting;
            (state.reconnect_attempts, max_attempts, delay)
        };

        if let Some(inner) = weak.upgrade() {
            for session in inner.sessions.write().values_mut() {
                session.reconnect_attempts = attempt;
            }
            tracing::info!(
                "Reconnecting (attempt {}/{}) in {}ms",
                attempt,
                max_attempts,
                delay.as_millis()
            );
            inner.events.emit(ConnectionEvent::Reconnecting {
                attempt,
                max_attempts,
            });
        }

        tokio::time::sleep(delay).await;

        let Some(inner) = weak.upgrade() else {
            return;
        };
        let request = {
            let state = inner.state.lock();
            if state.epoch != epoch || state.phase != ConnectionState::Reconnecting {
                tracing::debug!("Reconnection attempt {} abandoned", attempt);
                return;
            }
            match state.request.clone() {
                Some(request) => request,
                None => return,
            }
        };

        let servers = inner.ice.refresh(request.auth_token.as_deref()).await;
        if inner.current_epoch() != epoch {
            return;
        }

        match inner.negotiator.negotiate(&request, servers).await {
            Ok(link) => {
                if inner.install_link(epoch, link).await {
                    tracing::info!("Reconnected after {} attempt(s)", attempt);
                    inner.events.emit(ConnectionEvent::Reconnected);
                }
                return;
            }
            Err(e) => {
                tracing::warn!("Reconnection attempt {} failed: {}", attempt, e);
                last_reason = e.to_string();
                let terminal = matches!(e, TransportError::Authentication(_));
                inner.events.emit(ConnectionEvent::Error {
                    error: e.into_connection_error(&request.participant_id, attempt),
                    code: Some("RECONNECT_ATTEMPT_FAILED"),
                });
                if terminal {
                    inner.fail(epoch, attempt, last_reason);
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ice::IceServer;
    use crate::quality::{CandidatePath, TransportStats};
    use crate::connection::transport::PeerLinkStats;
    use crate::testing::{FakeIceSource, FakeNegotiator, NegotiationOutcome};
    use std::time::Duration;

    fn fast_config() -> ConnectionConfig {
        ConnectionConfig {
            reconnect_enabled: true,
            max_reconnect_attempts: 3,
            reconnect_base_delay: Duration::from_millis(10),
            reconnect_multiplier: 2.0,
            reconnect_max_delay: Duration::from_millis(40),
            health_check_interval: Duration::from_millis(10),
            quality_interval: Duration::from_millis(20),
        }
    }

    fn manager_with(config: ConnectionConfig, negotiator: Arc<FakeNegotiator>) -> ConnectionManager {
        let source = FakeIceSource::new(Some(vec![IceServer::stun("stun:stun.example.org:3478")]));
        let ice = Arc::new(IceConfigProvider::new(Arc::new(source), Duration::from_secs(60)));
        ConnectionManager::new(config, ice, negotiator)
    }

    async fn connect(manager: &ConnectionManager) -> Result<(), ConnectionError> {
        manager.connect("room-1", "alice", "Alice", Some("token".to_string())).await
    }

    /// Collect events until `stop` matches or the timeout passes
    async fn collect_until(
        rx: &mut broadcast::Receiver<ConnectionEvent>,
        timeout: Duration,
        stop: impl Fn(&ConnectionEvent) -> bool,
    ) -> Vec<ConnectionEvent> {
        let mut seen = Vec::new();
        let deadline = tokio::time::Instant::now() + timeout;
        while let Ok(Ok(event)) = tokio::time::timeout_at(deadline, rx.recv()).await {
            let done = stop(&event);
            seen.push(event);
            if done {
                break;
            }
        }
        seen
    }

    fn count(events: &[ConnectionEvent], kind: ConnectionEventKind) -> usize {
        use crate::utils::events::BusEvent;
        events.iter().filter(|e| e.kind() == kind).count()
    }

    fn good_stats() -> TransportStats {
        TransportStats {
            rtt_ms: 20.0,
            packets_lost: 0,
            packets_received: 1000,
            bytes_sent: 500_000,
            bytes_received: 500_000,
            elapsed: Duration::from_secs(5),
            path: CandidatePath::Direct,
        }
    }

    #[tokio::test]
    async fn test_connect_starts_polls_and_emits_connected() {
        let negotiator = Arc::new(FakeNegotiator::new(NegotiationOutcome::Connect));
        let manager = manager_with(fast_config(), negotiator.clone());
        let mut rx = manager.subscribe();

        connect(&manager).await.unwrap();

        assert_eq!(manager.state(), ConnectionState::Connected);
        assert!(matches!(rx.recv().await.unwrap(), ConnectionEvent::Connected { .. }));
        assert_eq!(negotiator.calls(), 1);
        assert!(manager.stats().connected_since.is_some());
        assert_eq!(manager.ice_servers().len(), 1);

        let request = negotiator.last_request().unwrap();
        assert_eq!(request.room_id, "room-1");
        assert_eq!(request.auth_token.as_deref(), Some("token"));
    }

    #[tokio::test]
    async fn test_second_connect_is_rejected() {
        let negotiator = Arc::new(FakeNegotiator::new(NegotiationOutcome::Connect));
        let manager = manager_with(fast_config(), negotiator.clone());

        connect(&manager).await.unwrap();
        assert_eq!(connect(&manager).await, Err(ConnectionError::AlreadyActive));
        assert_eq!(negotiator.calls(), 1);
    }

    #[tokio::test]
    async fn test_negotiation_failure_is_returned_and_retry_allowed() {
        let negotiator = Arc::new(FakeNegotiator::new(NegotiationOutcome::Connect));
        negotiator.push(NegotiationOutcome::Fail(TransportError::Authentication("expired".to_string())));
        let manager = manager_with(fast_config(), negotiator.clone());

        let result = connect(&manager).await;
        match result {
            Err(ConnectionError::AuthenticationFailed { participant_id, attempts, .. }) => {
                assert_eq!(participant_id, "alice");
                assert_eq!(attempts, 0);
            }
            other => panic!("expected an authentication failure, got {:?}", other),
        }
        assert_eq!(manager.state(), ConnectionState::Failed);

        connect(&manager).await.unwrap();
        assert_eq!(manager.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_disconnect_twice_emits_one_event() {
        let negotiator = Arc::new(FakeNegotiator::new(NegotiationOutcome::Connect));
        let manager = manager_with(fast_config(), negotiator.clone());
        connect(&manager).await.unwrap();
        let mut rx = manager.subscribe();

        manager.disconnect().await;
        manager.disconnect().await;

        let events = collect_until(&mut rx, Duration::from_millis(100), |_| false).await;
        assert_eq!(count(&events, ConnectionEventKind::Disconnected), 1);
        assert_eq!(manager.state(), ConnectionState::Idle);
        assert_eq!(negotiator.last_transport().unwrap().close_count(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_from_idle_is_silent() {
        let manager = manager_with(fast_config(), Arc::new(FakeNegotiator::new(NegotiationOutcome::Connect)));
        let mut rx = manager.subscribe();
        manager.disconnect().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_exhausted_reconnection_fails_once() {
        let negotiator = Arc::new(FakeNegotiator::new(NegotiationOutcome::Fail(TransportError::Network(
            "unreachable".to_string(),
        ))));
        negotiator.push(NegotiationOutcome::Connect);
        let manager = manager_with(fast_config(), negotiator.clone());
        connect(&manager).await.unwrap();
        let mut rx = manager.subscribe();

        negotiator.last_transport().unwrap().set_state(PeerConnectionState::Failed);

        let mut events = collect_until(&mut rx, Duration::from_secs(2), |e| {
            matches!(e, ConnectionEvent::ConnectionFailed(_))
        })
        .await;
        // Nothing further may follow the terminal event
        tokio::time::sleep(Duration::from_millis(150)).await;
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }

        assert_eq!(count(&events, ConnectionEventKind::Reconnecting), 3);
        assert_eq!(count(&events, ConnectionEventKind::ConnectionFailed), 1);
        assert_eq!(count(&events, ConnectionEventKind::Disconnected), 0);
        assert_eq!(negotiator.calls(), 4);
        assert_eq!(manager.state(), ConnectionState::Failed);
        assert!(manager.sessions().is_empty());

        let attempts: Vec<(u32, u32)> = events
            .iter()
            .filter_map(|e| match e {
                ConnectionEvent::Reconnecting { attempt, max_attempts } => Some((*attempt, *max_attempts)),
                _ => None,
            })
            .collect();
        assert_eq!(attempts, vec![(1, 3), (2, 3), (3, 3)]);

        match events.last() {
            Some(ConnectionEvent::ConnectionFailed(ConnectionError::ConnectionFailed {
                participant_id,
                attempts,
                ..
            })) => {
                assert_eq!(participant_id, "alice");
                assert_eq!(*attempts, 3);
            }
            other => panic!("unexpected final event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_successful_reconnect_resets_counter() {
        let negotiator = Arc::new(FakeNegotiator::new(NegotiationOutcome::Connect));
        negotiator.push(NegotiationOutcome::Connect);
        negotiator.push(NegotiationOutcome::Fail(TransportError::Network("flaky".to_string())));
        let manager = manager_with(fast_config(), negotiator.clone());
        connect(&manager).await.unwrap();
        let first = negotiator.last_transport().unwrap();
        let mut rx = manager.subscribe();

        first.send(TransportEvent::LinkStateChanged(PeerConnectionState::Disconnected));

        let events = collect_until(&mut rx, Duration::from_secs(2), |e| {
            matches!(e, ConnectionEvent::Reconnected)
        })
        .await;

        assert_eq!(count(&events, ConnectionEventKind::Reconnecting), 2);
        assert_eq!(count(&events, ConnectionEventKind::Reconnected), 1);
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(manager.reconnect_attempts(), 0);
        assert_eq!(first.close_count(), 1);

        // Re-negotiation reuses the original parameters
        let request = negotiator.last_request().unwrap();
        assert_eq!(request.participant_id, "alice");
        assert_eq!(request.display_name, "Alice");
    }

    #[tokio::test]
    async fn test_disconnect_cancels_pending_reconnect() {
        let config = ConnectionConfig {
            reconnect_base_delay: Duration::from_millis(200),
            reconnect_max_delay: Duration::from_millis(400),
            ..fast_config()
        };
        let negotiator = Arc::new(FakeNegotiator::new(NegotiationOutcome::Connect));
        let manager = manager_with(config, negotiator.clone());
        connect(&manager).await.unwrap();
        let mut rx = manager.subscribe();

        negotiator.last_transport().unwrap().set_state(PeerConnectionState::Disconnected);
        let events = collect_until(&mut rx, Duration::from_secs(1), |e| {
            matches!(e, ConnectionEvent::Reconnecting { .. })
        })
        .await;
        assert_eq!(count(&events, ConnectionEventKind::Reconnecting), 1);
        assert_eq!(manager.state(), ConnectionState::Reconnecting);

        manager.disconnect().await;
        tokio::time::sleep(Duration::from_millis(350)).await;

        assert_eq!(negotiator.calls(), 1);
        assert_eq!(manager.state(), ConnectionState::Idle);
        let events = collect_until(&mut rx, Duration::from_millis(50), |_| false).await;
        assert_eq!(count(&events, ConnectionEventKind::Disconnected), 1);
        assert_eq!(count(&events, ConnectionEventKind::Reconnected), 0);
        assert_eq!(count(&events, ConnectionEventKind::ConnectionFailed), 0);
    }

    #[tokio::test]
    async fn test_reconnect_disabled_fails_immediately() {
        let config = ConnectionConfig {
            reconnect_enabled: false,
            ..fast_config()
        };
        let negotiator = Arc::new(FakeNegotiator::new(NegotiationOutcome::Connect));
        let manager = manager_with(config, negotiator.clone());
        connect(&manager).await.unwrap();
        let mut rx = manager.subscribe();

        negotiator.last_transport().unwrap().set_state(PeerConnectionState::Failed);
        let events = collect_until(&mut rx, Duration::from_secs(1), |e| {
            matches!(e, ConnectionEvent::ConnectionFailed(_))
        })
        .await;

        assert_eq!(count(&events, ConnectionEventKind::Reconnecting), 0);
        assert_eq!(count(&events, ConnectionEventKind::ConnectionFailed), 1);
        assert_eq!(manager.state(), ConnectionState::Failed);
        assert_eq!(negotiator.calls(), 1);
    }

    #[tokio::test]
    async fn test_quality_events_only_on_rating_change() {
        let negotiator = Arc::new(FakeNegotiator::new(NegotiationOutcome::Connect));
        let manager = manager_with(fast_config(), negotiator.clone());
        connect(&manager).await.unwrap();
        let transport = negotiator.last_transport().unwrap();
        let mut rx = manager.subscribe();

        transport.set_stats(vec![PeerLinkStats {
            participant_id: "bob".to_string(),
            stats: good_stats(),
        }]);

        let events = collect_until(&mut rx, Duration::from_millis(150), |_| false).await;
        let ratings: Vec<QualityRating> = events
            .iter()
            .filter_map(|e| match e {
                ConnectionEvent::ConnectionQuality { rating, .. } => Some(*rating),
                _ => None,
            })
            .collect();
        assert_eq!(ratings, vec![QualityRating::Excellent]);
        assert_eq!(manager.quality("bob").unwrap().rating, QualityRating::Excellent);

        let mut worse = good_stats();
        worse.rtt_ms = 350.0;
        worse.packets_lost = 100;
        transport.set_stats(vec![PeerLinkStats {
            participant_id: "bob".to_string(),
            stats: worse,
        }]);

        let events = collect_until(&mut rx, Duration::from_millis(150), |_| false).await;
        assert_eq!(count(&events, ConnectionEventKind::ConnectionQuality), 1);
        assert_eq!(manager.quality("bob").unwrap().rating, QualityRating::Poor);
    }

    #[tokio::test]
    async fn test_transport_events_maintain_sessions() {
        let negotiator = Arc::new(FakeNegotiator::new(NegotiationOutcome::Connect));
        let manager = manager_with(fast_config(), negotiator.clone());
        connect(&manager).await.unwrap();
        let transport = negotiator.last_transport().unwrap();
        let mut rx = manager.subscribe();

        transport.send(TransportEvent::ParticipantJoined {
            participant_id: "bob".to_string(),
            display_name: "Bob".to_string(),
        });
        transport.send(TransportEvent::PeerStateChanged {
            participant_id: "bob".to_string(),
            peer_state: PeerConnectionState::Connected,
            ice_state: crate::connection::state::IceConnectionState::Connected,
        });

        let events = collect_until(&mut rx, Duration::from_secs(1), |e| {
            matches!(e, ConnectionEvent::ParticipantJoined { .. })
        })
        .await;
        assert_eq!(count(&events, ConnectionEventKind::ParticipantJoined), 1);
        tokio::time::sleep(Duration::from_millis(20)).await;
        let session = manager.session("bob").unwrap();
        assert_eq!(session.display_name, "Bob");
        assert_eq!(session.peer_state, PeerConnectionState::Connected);

        // A rejoin replaces rather than duplicates
        transport.send(TransportEvent::ParticipantJoined {
            participant_id: "bob".to_string(),
            display_name: "Bob".to_string(),
        });
        transport.send(TransportEvent::ParticipantLeft {
            participant_id: "bob".to_string(),
        });
        let events = collect_until(&mut rx, Duration::from_secs(1), |e| {
            matches!(e, ConnectionEvent::ParticipantLeft { .. })
        })
        .await;
        assert_eq!(count(&events, ConnectionEventKind::ParticipantLeft), 1);
        assert!(manager.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_local_stream_is_offered_and_announced() {
        use crate::media::{MediaTrack, StreamSource, TrackKind};

        let negotiator = Arc::new(FakeNegotiator::new(NegotiationOutcome::Connect));
        let manager = manager_with(fast_config(), negotiator.clone());
        let stream = MediaStream::new(StreamSource::User, vec![MediaTrack::new(TrackKind::Audio, "Mic")]);
        manager.set_local_stream(Some(stream.clone()));
        let mut rx = manager.subscribe();

        connect(&manager).await.unwrap();

        let events = collect_until(&mut rx, Duration::from_secs(1), |e| {
            matches!(e, ConnectionEvent::LocalStream(_))
        })
        .await;
        assert_eq!(count(&events, ConnectionEventKind::LocalStream), 1);
        let offered = negotiator.last_request().unwrap().local_stream.unwrap();
        assert!(offered.same_stream(&stream));
    }
}
