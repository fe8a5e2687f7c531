//! Networking module
//!
//! Nodes talk HTTP/JSON to each other. This module holds the client side of
//! that interface and the node runtime.
//!
//! # Features
//! - Minimal HTTP/1.1 client with per-request timeouts
//! - Peer abstraction with one-hop transaction relay
//! - Catch-up sync with fork-triggered reorg
//! - Mempool snapshot sync
//! - Periodic, cancellable sync loop

pub mod http;
pub mod message;
pub mod node;
pub mod peer;
pub mod sync;

pub use http::{Endpoint, HttpError, HttpResponse};
pub use message::{
    BalanceResponse, BlockResponse, MineRequest, MineResponse, StatusResponse, SubmitTxResponse,
    TxPoolResponse, NO_RELAY_HEADER,
};
pub use node::{Node, NodeConfig, NodeError};
pub use peer::{HttpPeer, PeerClient, PeerError, PeerSet, DEFAULT_PEER_TIMEOUT};
pub use sync::{ChainSync, PeerSyncReport, PeerSyncResult, SharedChain, SyncError, SyncOutcome};
