//! Where ICE server lists come from

use super::types::{IceServer, IceServersResponse};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Fetch failures. Never surfaced past the provider, which falls back instead.
#[derive(Error, Debug)]
pub enum IceFetchError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Endpoint returned no ICE servers")]
    Empty,
}

/// A source of ICE server descriptors
#[async_trait]
pub trait IceServerSource: Send + Sync {
    async fn fetch(&self, auth_token: Option<&str>) -> Result<Vec<IceServer>, IceFetchError>;
}

/// `GET`s the ice-servers endpoint
pub struct HttpIceSource {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpIceSource {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            timeout,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl IceServerSource for HttpIceSource {
    async fn fetch(&self, auth_token: Option<&str>) -> Result<Vec<IceServer>, IceFetchError> {
        let mut request = self.client.get(&self.endpoint).timeout(self.timeout);

        if let Some(token) = auth_token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request
            .send()
            .await
            .map_err(|e| IceFetchError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(IceFetchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response
            .json::<IceServersResponse>()
            .await
            .map_err(|e| IceFetchError::Malformed(e.to_string()))?;

        if body.ice_servers.is_empty() {
            return Err(IceFetchError::Empty);
        }
        Ok(body.ice_servers)
    }
}
