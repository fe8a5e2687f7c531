//! Peer access over the node HTTP interface
//!
//! [`PeerClient`] is the seam the sync protocol is written against;
//! [`HttpPeer`] implements it with the minimal HTTP client, and tests plug in
//! in-memory peers.

use crate::core::{Block, Transaction};
use crate::network::http::{self, Endpoint, HttpError, HttpRequest, HttpResponse};
use crate::network::message::{BlockResponse, StatusResponse, TxPoolResponse, NO_RELAY_HEADER};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Default timeout for a single peer request
pub const DEFAULT_PEER_TIMEOUT: Duration = Duration::from_secs(5);

/// Peer request errors
#[derive(Error, Debug)]
pub enum PeerError {
    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),
    #[error("{method} {path} returned {status}: {message}")]
    Status {
        method: &'static str,
        path: String,
        status: u16,
        message: String,
    },
}

impl PeerError {
    /// HTTP status of an error response, if the peer answered at all
    pub fn status(&self) -> Option<u16> {
        match self {
            PeerError::Status { status, .. } => Some(*status),
            PeerError::Http(_) => None,
        }
    }
}

/// Operations the sync protocol needs from a peer
pub trait PeerClient: Send + Sync {
    /// Identifier used in logs
    fn url(&self) -> &str;

    fn status(&self) -> impl Future<Output = Result<StatusResponse, PeerError>> + Send;

    fn block(&self, height: u64) -> impl Future<Output = Result<Block, PeerError>> + Send;

    fn txpool(
        &self,
    ) -> impl Future<Output = Result<HashMap<String, Transaction>, PeerError>> + Send;

    /// Submit a transaction; `relay` false asks the peer not to forward it
    fn submit_tx(
        &self,
        tx: &Transaction,
        relay: bool,
    ) -> impl Future<Output = Result<(), PeerError>> + Send;

    /// Fetch heights `0..=tip` in order
    fn chain(&self, tip: u64) -> impl Future<Output = Result<Vec<Block>, PeerError>> + Send {
        async move {
            let mut blocks = Vec::with_capacity(tip.min(1024) as usize + 1);
            for height in 0..=tip {
                blocks.push(self.block(height).await?);
            }
            Ok(blocks)
        }
    }
}

/// A peer reached over HTTP
#[derive(Debug, Clone)]
pub struct HttpPeer {
    url: String,
    endpoint: Endpoint,
    timeout: Duration,
}

impl HttpPeer {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, PeerError> {
        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            endpoint: Endpoint::parse(url)?,
            timeout,
        })
    }

    async fn call(&self, request: HttpRequest<'_>) -> Result<HttpResponse, PeerError> {
        let method = request.method;
        let path = request.path.to_string();
        let response = http::send(&self.endpoint, request, self.timeout).await?;
        if !response.is_success() {
            return Err(PeerError::Status {
                method,
                path,
                status: response.status,
                message: response.text(),
            });
        }
        Ok(response)
    }
}

impl PeerClient for HttpPeer {
    fn url(&self) -> &str {
        &self.url
    }

    async fn status(&self) -> Result<StatusResponse, PeerError> {
        let response = self.call(HttpRequest::get("/status")).await?;
        Ok(response.json()?)
    }

    async fn block(&self, height: u64) -> Result<Block, PeerError> {
        let path = format!("/block?height={}", height);
        let response = self.call(HttpRequest::get(&path)).await?;
        let payload: BlockResponse = response.json()?;
        Ok(payload.block)
    }

    async fn txpool(&self) -> Result<HashMap<String, Transaction>, PeerError> {
        let response = self.call(HttpRequest::get("/txpool")).await?;
        let payload: TxPoolResponse = response.json()?;
        Ok(payload.entries)
    }

    async fn submit_tx(&self, tx: &Transaction, relay: bool) -> Result<(), PeerError> {
        let mut request = HttpRequest::post_json("/tx", tx)?;
        if !relay {
            request = request.header(NO_RELAY_HEADER, "1");
        }
        self.call(request).await?;
        Ok(())
    }
}

/// The configured peers of a node
#[derive(Debug, Clone, Default)]
pub struct PeerSet {
    peers: Vec<HttpPeer>,
}

impl PeerSet {
    /// Build from peer URLs, skipping (and logging) any that do not parse
    pub fn from_urls(urls: &[String], timeout: Duration) -> Self {
        let peers = urls
            .iter()
            .filter_map(|url| match HttpPeer::new(url, timeout) {
                Ok(peer) => Some(peer),
                Err(e) => {
                    log::warn!("Ignoring peer {}: {}", url, e);
                    None
                }
            })
            .collect();
        Self { peers }
    }

    pub fn peers(&self) -> &[HttpPeer] {
        &self.peers
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Forward a transaction one hop to every peer, marked not to be relayed
    /// further. Returns how many peers accepted it.
    pub async fn relay_transaction(&self, tx: &Transaction) -> usize {
        let mut delivered = 0;
        for peer in &self.peers {
            match peer.submit_tx(tx, false).await {
                Ok(()) => delivered += 1,
                Err(e) => log::warn!("[relay][{}] {}", peer.url(), e),
            }
        }
        delivered
    }
}
