//! Peer transport seam
//!
//! The manager never talks to a WebRTC stack directly. A [`PeerNegotiator`]
//! turns a [`NegotiationRequest`] into a live [`PeerTransport`] plus a feed of
//! [`TransportEvent`]s; the `webrtc` feature provides an adapter over the
//! `webrtc` crate.

use super::error::ConnectionError;
use super::state::{IceConnectionState, PeerConnectionState};
use crate::ice::IceServerSet;
use crate::media::MediaStream;
use crate::quality::TransportStats;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Failures while negotiating a link
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication rejected: {0}")]
    Authentication(String),

    #[error("Media permission denied: {0}")]
    MediaPermission(String),

    #[error("Negotiation failed: {0}")]
    Negotiation(String),
}

impl TransportError {
    /// Map to the caller-facing taxonomy
    pub fn into_connection_error(self, participant_id: &str, attempts: u32) -> ConnectionError {
        let participant_id = participant_id.to_string();
        match self {
            Self::Network(reason) => ConnectionError::NetworkError {
                participant_id,
                attempts,
                reason,
            },
            Self::Authentication(reason) => ConnectionError::AuthenticationFailed {
                participant_id,
                attempts,
                reason,
            },
            Self::MediaPermission(reason) => ConnectionError::MediaPermissionDenied {
                participant_id,
                attempts,
                reason,
            },
            Self::Negotiation(reason) => ConnectionError::ConnectionFailed {
                participant_id,
                attempts,
                reason,
            },
        }
    }
}

/// Parameters of one negotiation. Reused verbatim for reconnection.
#[derive(Clone)]
pub struct NegotiationRequest {
    pub room_id: String,
    pub participant_id: String,
    pub display_name: String,
    pub auth_token: Option<String>,
    pub local_stream: Option<MediaStream>,
}

impl fmt::Debug for NegotiationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NegotiationRequest")
            .field("room_id", &self.room_id)
            .field("participant_id", &self.participant_id)
            .field("display_name", &self.display_name)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .field("local_stream", &self.local_stream.as_ref().map(|s| s.id().to_string()))
            .finish()
    }
}

/// Statistics for one remote peer
#[derive(Debug, Clone, PartialEq)]
pub struct PeerLinkStats {
    pub participant_id: String,
    pub stats: TransportStats,
}

/// Notifications pushed by the transport
#[derive(Debug, Clone)]
pub enum TransportEvent {
    ParticipantJoined {
        participant_id: String,
        display_name: String,
    },
    ParticipantLeft {
        participant_id: String,
    },
    RemoteStream {
        participant_id: String,
        stream: MediaStream,
    },
    PeerStateChanged {
        participant_id: String,
        peer_state: PeerConnectionState,
        ice_state: IceConnectionState,
    },
    /// State of the local link as a whole
    LinkStateChanged(PeerConnectionState),
}

/// A negotiated, live link
#[async_trait]
pub trait PeerTransport: Send + Sync {
    fn connection_state(&self) -> PeerConnectionState;

    fn ice_connection_state(&self) -> IceConnectionState;

    /// Per-peer cumulative counters
    async fn stats(&self) -> Vec<PeerLinkStats>;

    /// Tear the link down. Must be idempotent.
    async fn close(&self);
}

/// Result of a successful negotiation
pub struct NegotiatedLink {
    pub transport: Arc<dyn PeerTransport>,
    pub events: mpsc::Receiver<TransportEvent>,
}

/// Establishes links
#[async_trait]
pub trait PeerNegotiator: Send + Sync {
    async fn negotiate(
        &self,
        request: &NegotiationRequest,
        ice_servers: Arc<IceServerSet>,
    ) -> Result<NegotiatedLink, TransportError>;
}
