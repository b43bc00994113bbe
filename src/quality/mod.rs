//! Link quality scoring from transport statistics

pub mod evaluator;
pub mod stats;
pub mod tracker;

pub use evaluator::{evaluate, QualityRating, QualityScore};
pub use stats::{CandidatePath, TransportStats};
pub use tracker::{QualitySnapshot, QualityTracker};
