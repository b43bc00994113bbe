//! Connection states and per-participant sessions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of the local connection to a room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Disconnected,
    Reconnecting,
    Failed,
}

impl ConnectionState {
    /// States in which `connect` is refused
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::Connected | Self::Disconnected | Self::Reconnecting
        )
    }
}

/// Peer connection state as reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerConnectionState {
    #[default]
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl PeerConnectionState {
    /// The link is gone and will not recover on its own
    pub fn is_lost(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed | Self::Closed)
    }
}

/// ICE agent state as reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceConnectionState {
    #[default]
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

/// One remote participant during a room visit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSession {
    pub participant_id: String,
    pub display_name: String,
    pub peer_state: PeerConnectionState,
    pub ice_state: IceConnectionState,
    pub created_at: DateTime<Utc>,
    pub reconnect_attempts: u32,
}

impl ConnectionSession {
    pub fn new(participant_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            participant_id: participant_id.into(),
            display_name: display_name.into(),
            peer_state: PeerConnectionState::New,
            ice_state: IceConnectionState::New,
            created_at: Utc::now(),
            reconnect_attempts: 0,
        }
    }
}
