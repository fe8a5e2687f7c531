//! Node runtime
//!
//! A node is the HTTP interface plus a background task that periodically
//! synchronises with every configured peer. Both share one chain manager and
//! stop when the node's cancellation token fires.

use crate::api::{create_router, ApiState};
use crate::core::ChainManager;
use crate::network::peer::{PeerSet, DEFAULT_PEER_TIMEOUT};
use crate::network::sync::{ChainSync, SharedChain};
use crate::storage::{BlockStore, FileStore, StorageError};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Node errors
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Node configuration
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Identifier reported by `/status`; also names the data subdirectory
    pub node_id: String,
    /// Root data directory
    pub data_dir: PathBuf,
    /// HTTP listen address
    pub listen_addr: SocketAddr,
    /// Peer base URLs
    pub peers: Vec<String>,
    /// Delay between sync rounds
    pub sync_interval: Duration,
    /// Timeout of a single peer request
    pub peer_timeout: Duration,
    /// Give up on a `/mine` request after this long
    pub mining_timeout: Duration,
    /// Default difficulty for `/mine`
    pub difficulty: u32,
    /// Default coinbase reward for `/mine`
    pub reward: i64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: "node1".to_string(),
            data_dir: PathBuf::from("./data"),
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            peers: Vec::new(),
            sync_interval: Duration::from_secs(5),
            peer_timeout: DEFAULT_PEER_TIMEOUT,
            mining_timeout: Duration::from_secs(120),
            difficulty: 12,
            reward: 50,
        }
    }
}

/// A running (or ready to run) node
pub struct Node {
    config: Arc<NodeConfig>,
    chain: SharedChain,
    peers: Arc<PeerSet>,
    sync: Arc<ChainSync>,
    shutdown: CancellationToken,
}

impl Node {
    /// Open the node's file store under `data_dir/node_id`
    pub fn open(config: NodeConfig) -> Result<Self, NodeError> {
        let store = FileStore::new(&config.data_dir, &config.node_id)?;
        Self::with_store(config, Box::new(store))
    }

    /// Build a node over an arbitrary store
    pub fn with_store(config: NodeConfig, store: Box<dyn BlockStore>) -> Result<Self, NodeError> {
        let chain = ChainManager::new(config.node_id.clone(), store)?;
        let chain: SharedChain = Arc::new(RwLock::new(chain));
        let peers = Arc::new(PeerSet::from_urls(&config.peers, config.peer_timeout));
        let sync = Arc::new(ChainSync::new(chain.clone()));

        Ok(Self {
            config: Arc::new(config),
            chain,
            peers,
            sync,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn chain(&self) -> SharedChain {
        self.chain.clone()
    }

    pub fn sync(&self) -> Arc<ChainSync> {
        self.sync.clone()
    }

    /// Token that stops the server and the sync task
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Router serving this node's HTTP interface
    pub fn router(&self) -> axum::Router {
        create_router(ApiState {
            chain: self.chain.clone(),
            peers: self.peers.clone(),
            config: self.config.clone(),
            shutdown: self.shutdown.clone(),
        })
    }

    /// Spawn the periodic sync task. Each tick syncs with every peer in turn;
    /// a failed peer is skipped until the next tick.
    pub fn spawn_sync_loop(&self) -> JoinHandle<()> {
        let sync = self.sync.clone();
        let peers = self.peers.clone();
        let token = self.shutdown.clone();
        let period = self.config.sync_interval.max(Duration::from_millis(1));

        tokio::spawn(async move {
            if peers.is_empty() {
                log::info!("No peers configured; sync loop idle");
                token.cancelled().await;
                return;
            }

            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let round = async {
                    for peer in peers.peers() {
                        sync.sync_with_peer(peer).await;
                    }
                };
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = round => {}
                }
            }
            log::info!("Sync loop stopped");
        })
    }

    /// Bind the configured address and serve until shutdown
    pub async fn run(self) -> Result<(), NodeError> {
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until shutdown
    pub async fn serve(self, listener: TcpListener) -> Result<(), NodeError> {
        let addr = listener.local_addr()?;
        let height = self.chain.read().await.status_height()?;
        log::info!(
            "Node {} listening on http://{} (height {}, {} peers)",
            self.config.node_id,
            addr,
            height,
            self.peers.peers().len()
        );

        let sync_task = self.spawn_sync_loop();
        let token = self.shutdown.clone();
        let result = axum::serve(listener, self.router())
            .with_graceful_shutdown(token.clone().cancelled_owned())
            .await;

        // the server may also stop on its own error
        token.cancel();
        if let Err(e) = sync_task.await {
            log::warn!("Sync task ended abnormally: {}", e);
        }

        log::info!("Node {} stopped", self.config.node_id);
        result.map_err(NodeError::from)
    }
}
