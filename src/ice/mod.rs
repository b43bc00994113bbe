//! ICE server configuration
//!
//! Fetches STUN/TURN descriptors from the application endpoint, caches them
//! and falls back to public STUN servers when the endpoint is unavailable.

pub mod provider;
pub mod source;
pub mod types;

pub use provider::IceConfigProvider;
pub use source::{HttpIceSource, IceFetchError, IceServerSource};
pub use types::{IceServer, IceServerOrigin, IceServerSet, FALLBACK_STUN_URLS};
