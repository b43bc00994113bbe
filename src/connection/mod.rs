//! Connection lifecycle
//!
//! Negotiation goes through the [`PeerNegotiator`] seam; the manager owns the
//! state machine, reconnection, health and quality polling.

pub mod backoff;
pub mod error;
pub mod events;
pub mod manager;
#[cfg(feature = "webrtc")]
pub mod rtc;
pub mod signaling;
pub mod state;
pub mod transport;

pub use backoff::reconnect_delay;
pub use error::ConnectionError;
pub use events::{ConnectionEvent, ConnectionEventKind};
pub use manager::{ConnectionManager, ConnectionStats};
pub use signaling::{SignalingError, SignalingMessage};
pub use state::{ConnectionSession, ConnectionState, IceConnectionState, PeerConnectionState};
pub use transport::{
    NegotiatedLink, NegotiationRequest, PeerLinkStats, PeerNegotiator, PeerTransport, TransportError,
    TransportEvent,
};
