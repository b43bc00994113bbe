//! Connection manager events

use super::error::ConnectionError;
use crate::media::MediaStream;
use crate::quality::QualityRating;
use crate::utils::events::BusEvent;

#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    Connected {
        room_id: String,
        participant_id: String,
    },
    /// Explicit teardown finished
    Disconnected,
    Reconnecting {
        attempt: u32,
        max_attempts: u32,
    },
    Reconnected,
    /// Terminal failure after reconnection was exhausted or disabled
    ConnectionFailed(ConnectionError),
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
    LocalStream(MediaStream),
    ConnectionQuality {
        participant_id: String,
        rating: QualityRating,
    },
    Error {
        error: ConnectionError,
        code: Option<&'static str>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionEventKind {
    Connected,
    Disconnected,
    Reconnecting,
    Reconnected,
    ConnectionFailed,
    ParticipantJoined,
    ParticipantLeft,
    RemoteStream,
    LocalStream,
    ConnectionQuality,
    Error,
}

impl ConnectionEventKind {
    /// Wire name of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Reconnecting => "reconnecting",
            Self::Reconnected => "reconnected",
            Self::ConnectionFailed => "connection-failed",
            Self::ParticipantJoined => "participant-joined",
            Self::ParticipantLeft => "participant-left",
            Self::RemoteStream => "remote-stream",
            Self::LocalStream => "local-stream",
            Self::ConnectionQuality => "connection-quality",
            Self::Error => "error",
        }
    }
}

impl BusEvent for ConnectionEvent {
    type Kind = ConnectionEventKind;

    fn kind(&self) -> ConnectionEventKind {
        match self {
            Self::Connected { .. } => ConnectionEventKind::Connected,
            Self::Disconnected => ConnectionEventKind::Disconnected,
            Self::Reconnecting { .. } => ConnectionEventKind::Reconnecting,
            Self::Reconnected => ConnectionEventKind::Reconnected,
            Self::ConnectionFailed(_) => ConnectionEventKind::ConnectionFailed,
            Self::ParticipantJoined { .. } => ConnectionEventKind::ParticipantJoined,
            Self::ParticipantLeft { .. } => ConnectionEventKind::ParticipantLeft,
            Self::RemoteStream { .. } => ConnectionEventKind::RemoteStream,
            Self::LocalStream(_) => ConnectionEventKind::LocalStream,
            Self::ConnectionQuality { .. } => ConnectionEventKind::ConnectionQuality,
            Self::Error { .. } => ConnectionEventKind::Error,
        }
    }
}
