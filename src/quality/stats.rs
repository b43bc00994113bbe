//! Transport statistics input

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Network path selected by ICE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidatePath {
    /// Host or server-reflexive pair
    Direct,
    /// Through a TURN relay
    Relayed,
    #[default]
    Unknown,
}

impl CandidatePath {
    /// Classify from the ICE candidate type string (`host`, `srflx`, `prflx`, `relay`)
    pub fn from_candidate_type(candidate_type: &str) -> Self {
        match candidate_type.to_ascii_lowercase().as_str() {
            "relay" | "relayed" => Self::Relayed,
            "host" | "srflx" | "prflx" => Self::Direct,
            _ => Self::Unknown,
        }
    }
}

/// Cumulative counters for one peer link over the session so far
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportStats {
    /// Current round-trip time
    pub rtt_ms: f64,
    pub packets_lost: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    /// Time spanned by the counters
    #[serde(with = "crate::utils::duration_ms")]
    pub elapsed: Duration,
    pub path: CandidatePath,
}

impl TransportStats {
    /// `lost / (lost + received)`, zero when nothing was counted
    pub fn packet_loss_rate(&self) -> f64 {
        let total = self.packets_lost + self.packets_received;
        if total == 0 {
            0.0
        } else {
            self.packets_lost as f64 / total as f64
        }
    }

    /// Combined send + receive throughput, `None` when no time has elapsed
    pub fn throughput_kbps(&self) -> Option<f64> {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            return None;
        }
        let bits = (self.bytes_sent + self.bytes_received) as f64 * 8.0;
        Some(bits / secs / 1000.0)
    }
}
