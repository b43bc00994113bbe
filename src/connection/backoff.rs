//! Reconnection backoff

use std::time::Duration;

/// Delay before reconnection attempt `attempt` (zero-based):
/// `min(base * multiplier^attempt, cap)`
pub fn reconnect_delay(attempt: u32, base: Duration, multiplier: f64, cap: Duration) -> Duration {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let millis = base.as_millis() as f64 * multiplier.powi(exponent);
    let cap_ms = cap.as_millis() as f64;

    if !millis.is_finite() || millis >= cap_ms {
        cap
    } else {
        Duration::from_millis(millis.max(0.0) as u64)
    }
}
