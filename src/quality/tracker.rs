//! Latest quality reading per participant

use super::evaluator::{evaluate, QualityRating, QualityScore};
use super::stats::{CandidatePath, TransportStats};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One evaluated statistics sample for a peer link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualitySnapshot {
    pub participant_id: String,
    pub rtt_ms: f64,
    pub packets_lost: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub score: u8,
    pub rating: QualityRating,
    pub path: CandidatePath,
    pub timestamp: DateTime<Utc>,
}

impl QualitySnapshot {
    pub fn new(participant_id: impl Into<String>, stats: &TransportStats, score: QualityScore) -> Self {
        Self {
            participant_id: participant_id.into(),
            rtt_ms: stats.rtt_ms,
            packets_lost: stats.packets_lost,
            packets_received: stats.packets_received,
            bytes_sent: stats.bytes_sent,
            bytes_received: stats.bytes_received,
            score: score.score,
            rating: score.rating,
            path: stats.path,
            timestamp: Utc::now(),
        }
    }
}

/// Keeps only the most recent snapshot for each participant
#[derive(Debug, Default)]
pub struct QualityTracker {
    latest: HashMap<String, QualitySnapshot>,
}

impl QualityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate and store a sample.
    ///
    /// Returns the new rating only when it differs from the previous one for
    /// this participant. Samples with no received packets are ignored.
    pub fn record(&mut self, participant_id: &str, stats: &TransportStats) -> Option<QualityRating> {
        let score = evaluate(stats)?;
        let snapshot = QualitySnapshot::new(participant_id, stats, score);
        let previous = self
            .latest
            .insert(participant_id.to_string(), snapshot)
            .map(|s| s.rating);

        if previous == Some(score.rating) {
            None
        } else {
            Some(score.rating)
        }
    }

    pub fn get(&self, participant_id: &str) -> Option<&QualitySnapshot> {
        self.latest.get(participant_id)
    }

    pub fn remove(&mut self, participant_id: &str) -> Option<QualitySnapshot> {
        self.latest.remove(participant_id)
    }

    /// Drop entries for participants no longer present
    pub fn retain(&mut self, participant_ids: &[String]) {
        self.latest.retain(|id, _| participant_ids.contains(id));
    }

    pub fn clear(&mut self) {
        self.latest.clear();
    }

    pub fn len(&self) -> usize {
        self.latest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.latest.is_empty()
    }

    /// Copies of every stored snapshot
    pub fn snapshot(&self) -> Vec<QualitySnapshot> {
        self.latest.values().cloned().collect()
    }
}
