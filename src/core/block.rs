//! Block implementation for the ledger
//!
//! A block contains a header with metadata and a list of transactions.
//! The header's canonical encoding is shared by every node, so its layout
//! must never change:
//!
//! | field       | encoding                         |
//! |-------------|----------------------------------|
//! | version     | u32 LE                           |
//! | prev_hash   | u32 LE length + bytes            |
//! | merkle_root | u32 LE length + bytes            |
//! | timestamp   | u64 LE (seconds)                 |
//! | difficulty  | u32 LE                           |
//! | nonce       | u64 LE                           |
//! | height      | u64 LE                           |

use crate::core::transaction::Transaction;
use crate::crypto::hash::write_var_bytes;
use crate::crypto::{calculate_merkle_root, double_sha256};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Block Constants
// =============================================================================

/// Header version written by this node
pub const BLOCK_VERSION: u32 = 1;

/// Locking script paid by the genesis coinbase
pub const GENESIS_MINER: &str = "miner";

/// Value minted by the genesis coinbase
pub const GENESIS_REWARD: i64 = 50;

/// Fixed genesis timestamp (seconds)
pub const GENESIS_TIMESTAMP: i64 = 1_766_922_950;

/// Fixed genesis difficulty
pub const GENESIS_DIFFICULTY: u32 = 12;

/// Nonce satisfying the genesis difficulty
pub const GENESIS_NONCE: u64 = 1966;

/// Precomputed Merkle root of the genesis transaction list
pub const GENESIS_MERKLE_ROOT: &str =
    "967cd9c7ab243a34a0b55b272353f3f4fc7151339436dee8c19daf6ff8c03ac4";

// =============================================================================
// Block Errors
// =============================================================================

/// Block construction errors
#[derive(Error, Debug)]
pub enum BlockError {
    #[error("Genesis merkle root mismatch: expected {expected}, computed {computed}")]
    GenesisMismatch { expected: String, computed: String },
}

/// Block header containing metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockHeader {
    /// Header version
    pub version: u32,
    /// Double hash of the previous header; empty only for genesis
    #[serde(with = "hex", default)]
    pub prev_hash: Vec<u8>,
    /// Merkle root of all transactions
    #[serde(with = "hex", default)]
    pub merkle_root: Vec<u8>,
    /// Seconds since the Unix epoch
    pub timestamp: i64,
    /// Required leading zero bits of the header hash
    pub difficulty: u32,
    /// Nonce used for proof of work
    pub nonce: u64,
    /// Height in the chain, genesis is 0
    pub height: u64,
}

impl BlockHeader {
    /// Canonical byte encoding (see module docs)
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + 4 + 32 + 4 + 32 + 8 + 4 + 8 + 8);
        buf.extend_from_slice(&self.version.to_le_bytes());
        write_var_bytes(&mut buf, &self.prev_hash);
        write_var_bytes(&mut buf, &self.merkle_root);
        buf.extend_from_slice(&(self.timestamp as u64).to_le_bytes());
        buf.extend_from_slice(&self.difficulty.to_le_bytes());
        buf.extend_from_slice(&self.nonce.to_le_bytes());
        buf.extend_from_slice(&self.height.to_le_bytes());
        buf
    }

    /// Double SHA-256 of the canonical encoding
    pub fn hash(&self) -> Vec<u8> {
        double_sha256(&self.encode())
    }

    /// Hex form of the header hash
    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash())
    }

    pub fn is_genesis(&self) -> bool {
        self.height == 0
    }
}

/// A block in the ledger
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Block {
    /// Block header
    pub header: BlockHeader,
    /// Transactions; by convention the coinbase comes first
    #[serde(default)]
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Create a new unmined block on top of `prev` (or a genesis when `None`)
    pub fn new(prev: Option<&BlockHeader>, transactions: Vec<Transaction>, difficulty: u32) -> Self {
        let (prev_hash, height) = match prev {
            Some(prev) => (prev.hash(), prev.height + 1),
            None => (Vec::new(), 0),
        };

        let header = BlockHeader {
            version: BLOCK_VERSION,
            prev_hash,
            merkle_root: Self::calculate_merkle_root(&transactions),
            timestamp: Utc::now().timestamp(),
            difficulty,
            nonce: 0,
            height,
        };

        Self {
            header,
            transactions,
        }
    }

    /// The hard-coded genesis block every node starts from.
    ///
    /// Fails if the Merkle root computed from the genesis coinbase no longer
    /// matches the precomputed constant.
    pub fn genesis() -> Result<Self, BlockError> {
        let transactions = vec![Transaction::coinbase(GENESIS_MINER, GENESIS_REWARD)];

        let computed = Self::calculate_merkle_root(&transactions);
        if hex::encode(&computed) != GENESIS_MERKLE_ROOT {
            return Err(BlockError::GenesisMismatch {
                expected: GENESIS_MERKLE_ROOT.to_string(),
                computed: hex::encode(computed),
            });
        }

        Ok(Self {
            header: BlockHeader {
                version: BLOCK_VERSION,
                prev_hash: Vec::new(),
                merkle_root: computed,
                timestamp: GENESIS_TIMESTAMP,
                difficulty: GENESIS_DIFFICULTY,
                nonce: GENESIS_NONCE,
                height: 0,
            },
            transactions,
        })
    }

    /// Calculate the merkle root from transactions
    pub fn calculate_merkle_root(transactions: &[Transaction]) -> Vec<u8> {
        let leaves: Vec<Vec<u8>> = transactions.iter().map(Transaction::digest).collect();
        calculate_merkle_root(&leaves)
    }

    /// Verify the block's merkle root
    pub fn verify_merkle_root(&self) -> bool {
        Self::calculate_merkle_root(&self.transactions) == self.header.merkle_root
    }

    /// Index of the first transaction whose cached id disagrees with its content
    pub fn first_stale_tx_id(&self) -> Option<usize> {
        self.transactions
            .iter()
            .position(|tx| !tx.id.is_empty() && tx.id != tx.compute_id())
    }

    /// Header hash
    pub fn hash(&self) -> Vec<u8> {
        self.header.hash()
    }

    pub fn height(&self) -> u64 {
        self.header.height
    }

    /// Get the coinbase transaction (first transaction)
    pub fn coinbase_tx(&self) -> Option<&Transaction> {
        self.transactions.first().filter(|tx| tx.is_coinbase)
    }
}
