//! HTTP client for a peer's ShareService.
//!
//! Every request is bounded by the client timeout; an expired request is
//! dropped, which cancels it. Nothing here retries.

use std::net::SocketAddr;
use std::time::Duration;

use serde::de::DeserializeOwned;

use hostshare_core::wire::{HealthPayload, NodesPayload, REMOTE_TIMEOUT_SECS};
use hostshare_core::{Envelope, RecordError, SharedHostRecord};
use hostshare_services::Peer;

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("failed to build HTTP client: {0}")]
    Client(reqwest::Error),
    #[error("invalid peer URL {0}")]
    InvalidUrl(String),
    #[error("request to {url} timed out")]
    Timeout { url: String },
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        source: reqwest::Error,
    },
    #[error("invalid JSON response from {url}: {source}")]
    Malformed {
        url: String,
        source: reqwest::Error,
    },
    #[error("{0}")]
    NotFound(String),
    #[error("peer sent an unusable record for {node_id}: {reason}")]
    InvalidRecord {
        node_id: String,
        reason: RecordError,
    },
    #[error("peer returned error {code}: {message}")]
    Rejected { code: u16, message: String },
}

#[derive(Clone)]
pub struct RemoteClient {
    client: reqwest::Client,
}

impl RemoteClient {
    /// Client with the standard REMOTE_TIMEOUT_SECS bound.
    pub fn new() -> Result<Self, RemoteError> {
        Self::with_timeout(Duration::from_secs(REMOTE_TIMEOUT_SECS))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, RemoteError> {
        // Peers are on the LAN; a system proxy would only get in the way.
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()
            .map_err(RemoteError::Client)?;
        Ok(Self { client })
    }

    /// `http://ip:port/api/<segments...>`, each segment percent-encoded.
    fn url(peer: &Peer, segments: &[&str]) -> Result<reqwest::Url, RemoteError> {
        let base = format!("http://{}/api", SocketAddr::new(peer.ip, peer.port));
        let mut url = reqwest::Url::parse(&base).map_err(|_| RemoteError::InvalidUrl(base.clone()))?;
        url.path_segments_mut()
            .map_err(|_| RemoteError::InvalidUrl(base.clone()))?
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: reqwest::Url) -> Result<T, RemoteError> {
        let shown = url.to_string();
        let resp = self.client.get(url).send().await.map_err(|source| {
            if source.is_timeout() {
                RemoteError::Timeout { url: shown.clone() }
            } else {
                RemoteError::Transport {
                    url: shown.clone(),
                    source,
                }
            }
        })?;

        let envelope: Envelope<T> = resp.json().await.map_err(|source| {
            if source.is_timeout() {
                RemoteError::Timeout { url: shown.clone() }
            } else {
                RemoteError::Malformed {
                    url: shown.clone(),
                    source,
                }
            }
        })?;

        envelope.into_result().map_err(|e| match e.code {
            404 => RemoteError::NotFound(e.message),
            code => RemoteError::Rejected {
                code,
                message: e.message,
            },
        })
    }

    /// `GET /api/nodes` on `peer`.
    pub async fn fetch_nodes(&self, peer: &Peer) -> Result<Vec<SharedHostRecord>, RemoteError> {
        let payload: NodesPayload = self.get_json(Self::url(peer, &["nodes"])?).await?;
        Ok(payload.nodes)
    }

    /// `GET /api/node/{id}` on `peer`.
    pub async fn fetch_node(&self, peer: &Peer, node_id: &str) -> Result<SharedHostRecord, RemoteError> {
        self.get_json(Self::url(peer, &["node", node_id])?).await
    }

    pub async fn health(&self, peer: &Peer) -> Result<HealthPayload, RemoteError> {
        self.get_json(Self::url(peer, &["health"])?).await
    }
}
