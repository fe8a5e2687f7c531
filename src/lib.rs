//! Ledger node: a minimal proof-of-work UTXO ledger in Rust
//!
//! This crate provides a single-writer blockchain node featuring:
//! - Canonical transaction and header encodings with double SHA-256 ids
//! - ECDSA signatures (secp256k1) over a signature-free signing hash
//! - Leading-zero-bits proof of work with a cancellable miner
//! - UTXO validation and a staged block acceptance state machine
//! - Longest-chain reorg triggered by fork conflicts during sync
//! - JSON-file persistence, one file per block
//! - HTTP/JSON node interface with periodic peer sync and one-hop relay
//!
//! # Example
//!
//! ```rust
//! use ledger_node::core::{ChainManager, Miner};
//! use ledger_node::storage::MemoryStore;
//! use ledger_node::wallet::Wallet;
//!
//! let mut chain = ChainManager::new("node1", Box::new(MemoryStore::new())).unwrap();
//! chain.init_genesis().unwrap();
//!
//! // Mine a block paying a fresh wallet
//! let wallet = Wallet::new();
//! let (block, stats) = chain.mine_block(&Miner::new(), &wallet.address(), 4, 50).unwrap();
//! println!("Mined block {} in {}ms", block.height(), stats.time_ms);
//!
//! assert_eq!(chain.balance(&wallet.address()).unwrap(), 50);
//! ```

pub mod api;
pub mod cli;
pub mod core;
pub mod crypto;
pub mod network;
pub mod storage;
pub mod wallet;

// Re-export commonly used types
pub use api::{create_router, ApiState};
pub use core::{Block, BlockHeader, ChainManager, Miner, Transaction, UtxoSet};
pub use crypto::KeyPair;
pub use network::{ChainSync, HttpPeer, Node, NodeConfig, PeerClient};
pub use storage::{BlockStore, FileStore, MemoryStore};
pub use wallet::Wallet;
