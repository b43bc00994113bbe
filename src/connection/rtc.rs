//! `webrtc` crate adapter
//!
//! Wraps one `RTCPeerConnection` per remote participant as a
//! [`PeerTransport`]. Offer/answer exchange is left to the host's
//! [`PeerNegotiator`](super::transport::PeerNegotiator), which builds the
//! connection with [`build_peer_connection`] and hands it to
//! [`RtcPeerTransport::attach`].

use super::state::{IceConnectionState, PeerConnectionState};
use super::transport::{PeerLinkStats, PeerTransport, TransportError, TransportEvent};
use crate::ice::IceServerSet;
use crate::media::{MediaStream, MediaTrack, StreamSource, TrackKind};
use crate::quality::{CandidatePath, TransportStats};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::stats::StatsReportType;

const EVENT_CAPACITY: usize = 64;

/// Translate the cached ICE list into the `webrtc` crate's form
pub fn to_rtc_ice_servers(set: &IceServerSet) -> Vec<RTCIceServer> {
    set.servers
        .iter()
        .map(|server| RTCIceServer {
            urls: server.urls.clone(),
            username: server.username.clone().unwrap_or_default(),
            credential: server.credential.clone().unwrap_or_default(),
            ..Default::default()
        })
        .collect()
}

/// Create a peer connection with default codecs and the given ICE servers
pub async fn build_peer_connection(ice_servers: &IceServerSet) -> Result<RTCPeerConnection, TransportError> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .map_err(|e| TransportError::Negotiation(format!("Failed to register codecs: {}", e)))?;

    let api = APIBuilder::new().with_media_engine(media_engine).build();
    let config = RTCConfiguration {
        ice_servers: to_rtc_ice_servers(ice_servers),
        ..Default::default()
    };

    api.new_peer_connection(config)
        .await
        .map_err(|e| TransportError::Negotiation(format!("Failed to create peer connection: {}", e)))
}

/// A live `RTCPeerConnection` to one remote participant
pub struct RtcPeerTransport {
    peer_connection: Arc<RTCPeerConnection>,
    participant_id: String,
    created_at: Instant,
    closed: AtomicBool,
}

impl RtcPeerTransport {
    /// Take ownership of a negotiated connection and forward its callbacks as
    /// [`TransportEvent`]s
    pub fn attach(
        peer_connection: Arc<RTCPeerConnection>,
        participant_id: impl Into<String>,
    ) -> (Arc<Self>, mpsc::Receiver<TransportEvent>) {
        let participant_id = participant_id.into();
        let (tx, rx) = mpsc::channel(EVENT_CAPACITY);

        let state_tx = tx.clone();
        let state_pc = Arc::downgrade(&peer_connection);
        let state_participant = participant_id.clone();
        peer_connection.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let tx = state_tx.clone();
            let participant_id = state_participant.clone();
            let ice_state = state_pc
                .upgrade()
                .map(|pc| map_ice_state(pc.ice_connection_state()))
                .unwrap_or(IceConnectionState::Closed);
            Box::pin(async move {
                let peer_state = map_peer_state(state);
                tracing::debug!("Peer {} connection state {:?}", participant_id, peer_state);
                let _ = tx
                    .send(TransportEvent::PeerStateChanged {
                        participant_id,
                        peer_state,
                        ice_state,
                    })
                    .await;
                let _ = tx.send(TransportEvent::LinkStateChanged(peer_state)).await;
            })
        }));

        let track_tx = tx;
        let track_participant = participant_id.clone();
        peer_connection.on_track(Box::new(move |track, _receiver, _transceiver| {
            let tx = track_tx.clone();
            let participant_id = track_participant.clone();
            Box::pin(async move {
                let kind = match track.kind() {
                    RTPCodecType::Video => TrackKind::Video,
                    _ => TrackKind::Audio,
                };
                let stream = MediaStream::new(
                    StreamSource::Remote,
                    vec![MediaTrack::new(kind, track.id())],
                );

                let feed = stream.clone();
                tokio::spawn(async move {
                    while let Ok((packet, _)) = track.read_rtp().await {
                        feed.push_sample(packet.payload);
                    }
                    feed.stop();
                });

                let _ = tx
                    .send(TransportEvent::RemoteStream {
                        participant_id,
                        stream,
                    })
                    .await;
            })
        }));

        let transport = Arc::new(Self {
            peer_connection,
            participant_id,
            created_at: Instant::now(),
            closed: AtomicBool::new(false),
        });
        (transport, rx)
    }

    pub fn peer_connection(&self) -> &Arc<RTCPeerConnection> {
        &self.peer_connection
    }
}

#[async_trait]
impl PeerTransport for RtcPeerTransport {
    fn connection_state(&self) -> PeerConnectionState {
        map_peer_state(self.peer_connection.connection_state())
    }

    fn ice_connection_state(&self) -> IceConnectionState {
        map_ice_state(self.peer_connection.ice_connection_state())
    }

    async fn stats(&self) -> Vec<PeerLinkStats> {
        let report = self.peer_connection.get_stats().await;

        let candidate_types: HashMap<String, String> = report
            .reports
            .values()
            .filter_map(|r| match r {
                StatsReportType::LocalCandidate(c) | StatsReportType::RemoteCandidate(c) => {
                    Some((c.id.clone(), c.candidate_type.to_string()))
                }
                _ => None,
            })
            .collect();

        // Loss comes from RTCP receiver reports on the RTP stream entries
        let mut packets = PacketCounts::default();
        for r in report.reports.values() {
            match r {
                StatsReportType::InboundRTP(s) => packets.add_inbound(s.packets_received as u64),
                StatsReportType::RemoteInboundRTP(s) => {
                    packets.add_remote_inbound(s.packets_received as u64, s.packets_lost.max(0) as u64)
                }
                _ => {}
            }
        }

        // The nominated pair carries the live path and rtt
        let pair = report.reports.values().find_map(|r| match r {
            StatsReportType::CandidatePair(p) if p.nominated => Some(p),
            _ => None,
        });
        let Some(pair) = pair else {
            return Vec::new();
        };

        let local = candidate_types.get(&pair.local_candidate_id);
        let remote = candidate_types.get(&pair.remote_candidate_id);
        let path = match (local, remote) {
            (Some(l), Some(r)) if l == "relay" || r == "relay" => CandidatePath::Relayed,
            (Some(l), _) => CandidatePath::from_candidate_type(l),
            _ => CandidatePath::Unknown,
        };

        let (packets_received, packets_lost) = packets.or_pair(pair.packets_received as u64);
        vec![PeerLinkStats {
            participant_id: self.participant_id.clone(),
            stats: TransportStats {
                rtt_ms: pair.current_round_trip_time * 1000.0,
                packets_lost,
                packets_received,
                bytes_sent: pair.bytes_sent,
                bytes_received: pair.bytes_received,
                elapsed: self.created_at.elapsed(),
                path,
            },
        }]
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.peer_connection.close().await {
            tracing::warn!("Failed to close peer connection to {}: {}", self.participant_id, e);
        }
    }
}

/// Packet totals over the RTP stream entries of one stats report
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct PacketCounts {
    received: u64,
    lost: u64,
    streams: usize,
}

impl PacketCounts {
    fn add_inbound(&mut self, received: u64) {
        self.received += received;
        self.streams += 1;
    }

    fn add_remote_inbound(&mut self, received: u64, lost: u64) {
        self.received += received;
        self.lost += lost;
        self.streams += 1;
    }

    /// `(received, lost)`, taking the candidate pair's counter when no RTP
    /// stream is flowing yet
    fn or_pair(self, pair_received: u64) -> (u64, u64) {
        if self.streams == 0 {
            (pair_received, 0)
        } else {
            (self.received, self.lost)
        }
    }
}

fn map_peer_state(state: RTCPeerConnectionState) -> PeerConnectionState {
    match state {
        RTCPeerConnectionState::New | RTCPeerConnectionState::Unspecified => PeerConnectionState::New,
        RTCPeerConnectionState::Connecting => PeerConnectionState::Connecting,
        RTCPeerConnectionState::Connected => PeerConnectionState::Connected,
        RTCPeerConnectionState::Disconnected => PeerConnectionState::Disconnected,
        RTCPeerConnectionState::Failed => PeerConnectionState::Failed,
        RTCPeerConnectionState::Closed => PeerConnectionState::Closed,
    }
}

fn map_ice_state(state: RTCIceConnectionState) -> IceConnectionState {
    match state {
        RTCIceConnectionState::New | RTCIceConnectionState::Unspecified => IceConnectionState::New,
        RTCIceConnectionState::Checking => IceConnectionState::Checking,
        RTCIceConnectionState::Connected => IceConnectionState::Connected,
        RTCIceConnectionState::Completed => IceConnectionState::Completed,
        RTCIceConnectionState::Disconnected => IceConnectionState::Disconnected,
        RTCIceConnectionState::Failed => IceConnectionState::Failed,
        RTCIceConnectionState::Closed => IceConnectionState::Closed,
    }
}
