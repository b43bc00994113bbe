//! Podcast session core - connection lifecycle, link quality and local recording.
//!
//! This is the main library crate for the session runtime. It provides media
//! acquisition, ICE configuration, the connection state machine with
//! reconnection, link quality scoring and the chunked recording engine.

pub mod config;
pub mod connection;
pub mod ice;
pub mod media;
pub mod quality;
pub mod recorder;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{ConfigError, ConnectionConfig, IceConfig, RecordingConfig, SessionCoreConfig};
pub use connection::{ConnectionError, ConnectionEvent, ConnectionManager, ConnectionState};
pub use ice::{IceConfigProvider, IceServer, IceServerSet};
pub use media::{MediaManager, MediaStream};
pub use quality::{QualityRating, QualityScore, TransportStats};
pub use recorder::{RecordingEngine, RecordingError, RecordingEvent, RecordingSession};
pub use utils::{AppError, AppResult, ErrorResponse};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over `default_filter`. Returns false if a subscriber was
/// already installed.
pub fn init_tracing(default_filter: &str) -> bool {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}
