//! Connection failure taxonomy

use serde::Serialize;
use thiserror::Error;

/// Errors surfaced by the connection manager
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "camelCase")]
pub enum ConnectionError {
    #[error("Connection to {participant_id} failed after {attempts} attempt(s): {reason}")]
    #[serde(rename_all = "camelCase")]
    ConnectionFailed {
        participant_id: String,
        attempts: u32,
        reason: String,
    },

    #[error("Network error for {participant_id}: {reason}")]
    #[serde(rename_all = "camelCase")]
    NetworkError {
        participant_id: String,
        attempts: u32,
        reason: String,
    },

    #[error("Media permission denied for {participant_id}: {reason}")]
    #[serde(rename_all = "camelCase")]
    MediaPermissionDenied {
        participant_id: String,
        attempts: u32,
        reason: String,
    },

    #[error("Authentication failed for {participant_id}: {reason}")]
    #[serde(rename_all = "camelCase")]
    AuthenticationFailed {
        participant_id: String,
        attempts: u32,
        reason: String,
    },

    #[error("A connection is already active")]
    AlreadyActive,
}

impl ConnectionError {
    /// Whether offering the user a retry makes sense
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConnectionFailed { .. } | Self::NetworkError { .. })
    }

    /// Short text suitable for a prompt
    pub fn user_message(&self) -> String {
        match self {
            Self::ConnectionFailed { attempts, .. } => format!(
                "Couldn't reconnect after {} attempt(s). Check your network and try again.",
                attempts
            ),
            Self::NetworkError { attempts: 0, .. } => {
                "A network problem interrupted the connection. Try again.".to_string()
            }
            Self::NetworkError { attempts, .. } => format!(
                "A network problem interrupted reconnection attempt {}. Try again.",
                attempts
            ),
            Self::MediaPermissionDenied { .. } => "Camera or microphone access was denied.".to_string(),
            Self::AuthenticationFailed { .. } => "Your session has expired. Sign in again.".to_string(),
            Self::AlreadyActive => "You're already connected to this room.".to_string(),
        }
    }

    /// Attempts made when the error surfaced; 0 on the initial connect
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::ConnectionFailed { attempts, .. }
            | Self::NetworkError { attempts, .. }
            | Self::MediaPermissionDenied { attempts, .. }
            | Self::AuthenticationFailed { attempts, .. } => Some(*attempts),
            Self::AlreadyActive => None,
        }
    }

    /// Participant the error refers to, when known
    pub fn participant_id(&self) -> Option<&str> {
        match self {
            Self::ConnectionFailed { participant_id, .. }
            | Self::NetworkError { participant_id, .. }
            | Self::MediaPermissionDenied { participant_id, .. }
            | Self::AuthenticationFailed { participant_id, .. } => Some(participant_id),
            Self::AlreadyActive => None,
        }
    }
}
