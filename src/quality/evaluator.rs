//! Link quality scoring
//!
//! A pure function of one statistics snapshot. The bands below are part of the
//! public contract; boundary values are asserted in the tests.

use super::stats::{CandidatePath, TransportStats};
use serde::{Deserialize, Serialize};

/// Categorical link rating, ordered worst to best
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityRating {
    Poor,
    Fair,
    Good,
    Excellent,
}

impl QualityRating {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Poor => "poor",
            Self::Fair => "fair",
            Self::Good => "good",
            Self::Excellent => "excellent",
        }
    }

    /// Band of a 0–100 score
    pub fn from_score(score: u8) -> Self {
        match score {
            80..=u8::MAX => Self::Excellent,
            60..=79 => Self::Good,
            40..=59 => Self::Fair,
            _ => Self::Poor,
        }
    }

}

/// Result of one evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityScore {
    pub score: u8,
    pub rating: QualityRating,
}

/// Score a link. Returns `None` until at least one packet was received, so a
/// fresh link never reads as `poor`.
pub fn evaluate(stats: &TransportStats) -> Option<QualityScore> {
    if stats.packets_received == 0 {
        return None;
    }

    let loss_rate = stats.packet_loss_rate();
    let mut score: i32 = 100;

    score -= latency_penalty(stats.rtt_ms);
    score -= loss_penalty(loss_rate);
    if let Some(kbps) = stats.throughput_kbps() {
        score -= bandwidth_penalty(kbps);
    }
    score += match stats.path {
        CandidatePath::Direct => 5,
        CandidatePath::Relayed => -5,
        CandidatePath::Unknown => 0,
    };

    let score = score.clamp(0, 100) as u8;
    let mut rating = QualityRating::from_score(score);
    // Excellent's latency band is strict: rtt 100 ms is good whatever the score
    if rating == QualityRating::Excellent && stats.rtt_ms >= 100.0 {
        rating = QualityRating::Good;
    }

    Some(QualityScore { score, rating })
}

fn latency_penalty(rtt_ms: f64) -> i32 {
    if rtt_ms > 300.0 {
        40
    } else if rtt_ms > 200.0 {
        30
    } else if rtt_ms > 100.0 {
        20
    } else if rtt_ms > 50.0 {
        10
    } else {
        0
    }
}

fn loss_penalty(loss_rate: f64) -> i32 {
    if loss_rate > 0.05 {
        30
    } else if loss_rate > 0.02 {
        20
    } else if loss_rate > 0.01 {
        10
    } else if loss_rate > 0.005 {
        5
    } else {
        0
    }
}

fn bandwidth_penalty(kbps: f64) -> i32 {
    if kbps < 32.0 {
        20
    } else if kbps < 64.0 {
        10
    } else {
        0
    }
}
