//! Signaling message validation
//!
//! Messages exchanged with the signaling server are parsed and checked here.
//! Delivery and routing are the server's concern.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest accepted message, SDP included
pub const MAX_MESSAGE_BYTES: usize = 64 * 1024;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignalingError {
    #[error("Message too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Invalid field [{field}]: {message}")]
    InvalidField { field: &'static str, message: String },
}

/// Messages relayed through the signaling channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalingMessage {
    #[serde(rename_all = "camelCase")]
    Join {
        room_id: String,
        participant_id: String,
        display_name: String,
    },
    #[serde(rename_all = "camelCase")]
    Leave {
        room_id: String,
        participant_id: String,
    },
    #[serde(rename_all = "camelCase")]
    Offer {
        from: String,
        to: String,
        sdp: String,
    },
    #[serde(rename_all = "camelCase")]
    Answer {
        from: String,
        to: String,
        sdp: String,
    },
    #[serde(rename_all = "camelCase")]
    IceCandidate {
        from: String,
        to: String,
        /// Empty marks the end of candidates
        candidate: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sdp_mid: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sdp_m_line_index: Option<u16>,
    },
}

impl SignalingMessage {
    /// Parse and validate a raw JSON message
    pub fn parse(raw: &str) -> Result<Self, SignalingError> {
        if raw.len() > MAX_MESSAGE_BYTES {
            return Err(SignalingError::TooLarge {
                size: raw.len(),
                max: MAX_MESSAGE_BYTES,
            });
        }
        let message: Self =
            serde_json::from_str(raw).map_err(|e| SignalingError::Malformed(e.to_string()))?;
        message.validate()?;
        Ok(message)
    }

    pub fn validate(&self) -> Result<(), SignalingError> {
        match self {
            Self::Join {
                room_id,
                participant_id,
                display_name,
            } => {
                require_id("roomId", room_id)?;
                require_id("participantId", participant_id)?;
                if display_name.trim().is_empty() {
                    return Err(invalid("displayName", "must not be blank"));
                }
                Ok(())
            }
            Self::Leave {
                room_id,
                participant_id,
            } => {
                require_id("roomId", room_id)?;
                require_id("participantId", participant_id)
            }
            Self::Offer { from, to, sdp } | Self::Answer { from, to, sdp } => {
                require_peers(from, to)?;
                if !sdp.starts_with("v=0") {
                    return Err(invalid("sdp", "must start with v=0"));
                }
                Ok(())
            }
            Self::IceCandidate {
                from, to, candidate, ..
            } => {
                require_peers(from, to)?;
                if !candidate.is_empty() && !candidate.starts_with("candidate:") {
                    return Err(invalid("candidate", "must start with candidate:"));
                }
                Ok(())
            }
        }
    }

    /// Wire name of the message type
    pub fn message_type(&self) -> &'static str {
        match self {
            Self::Join { .. } => "join",
            Self::Leave { .. } => "leave",
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::IceCandidate { .. } => "ice-candidate",
        }
    }
}

fn invalid(field: &'static str, message: &str) -> SignalingError {
    SignalingError::InvalidField {
        field,
        message: message.to_string(),
    }
}

fn require_id(field: &'static str, value: &str) -> Result<(), SignalingError> {
    if value.trim().is_empty() {
        return Err(invalid(field, "must not be empty"));
    }
    if value.len() > 128 {
        return Err(invalid(field, "must be at most 128 characters"));
    }
    Ok(())
}

fn require_peers(from: &str, to: &str) -> Result<(), SignalingError> {
    require_id("from", from)?;
    require_id("to", to)?;
    if from == to {
        return Err(invalid("to", "must differ from sender"));
    }
    Ok(())
}
