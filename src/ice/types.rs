//! ICE server descriptors

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Public STUN servers used whenever the endpoint cannot be reached
pub const FALLBACK_STUN_URLS: [&str; 2] = [
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

/// One STUN/TURN server entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    #[serde(deserialize_with = "one_or_many")]
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }

    /// Whether any URL is a TURN relay
    pub fn is_relay(&self) -> bool {
        self.urls
            .iter()
            .any(|u| u.starts_with("turn:") || u.starts_with("turns:"))
    }
}

/// Where the current server list came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceServerOrigin {
    Fetched,
    Fallback,
}

/// Immutable, never-empty server list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceServerSet {
    pub servers: Vec<IceServer>,
    pub fetched_at: DateTime<Utc>,
    pub origin: IceServerOrigin,
}

impl IceServerSet {
    /// Wrap a fetched list. Returns `None` for an empty list.
    pub fn fetched(servers: Vec<IceServer>) -> Option<Self> {
        if servers.is_empty() || servers.iter().all(|s| s.urls.is_empty()) {
            return None;
        }
        Some(Self {
            servers,
            fetched_at: Utc::now(),
            origin: IceServerOrigin::Fetched,
        })
    }

    pub fn fallback() -> Self {
        Self {
            servers: FALLBACK_STUN_URLS.iter().map(|u| IceServer::stun(*u)).collect(),
            fetched_at: Utc::now(),
            origin: IceServerOrigin::Fallback,
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.origin == IceServerOrigin::Fallback
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn has_relay(&self) -> bool {
        self.servers.iter().any(IceServer::is_relay)
    }
}

/// Body of the ice-servers endpoint
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct IceServersResponse {
    pub ice_servers: Vec<IceServer>,
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Urls {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Urls::deserialize(deserializer)? {
        Urls::One(url) => vec![url],
        Urls::Many(urls) => urls,
    })
}
