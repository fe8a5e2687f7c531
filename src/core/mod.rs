//! Core ledger components
//!
//! This module contains the fundamental building blocks:
//! - Transactions (UTXO model, signing hash vs. id)
//! - Blocks (canonical header encoding, fixed genesis)
//! - Proof of work (target conversion, cancellable miner)
//! - UTXO set and transaction validation
//! - Mempool
//! - Chain manager (block acceptance, reorg rewrite)

pub mod block;
pub mod blockchain;
pub mod mempool;
pub mod pow;
pub mod transaction;
pub mod utxo;

pub use block::{
    Block, BlockError, BlockHeader, BLOCK_VERSION, GENESIS_DIFFICULTY, GENESIS_MERKLE_ROOT,
    GENESIS_MINER, GENESIS_NONCE, GENESIS_REWARD, GENESIS_TIMESTAMP,
};
pub use blockchain::{
    validate_chain, AcceptError, AcceptStage, Acceptance, BlockRejection, ChainManager,
    ChainValidationError, MineError, MiningTemplate, ReorgError, MAX_FUTURE_DRIFT_SECS,
};
pub use mempool::{Mempool, MempoolError};
pub use pow::{
    hash_meets_target, target_from_difficulty, validate_pow, Miner, MiningError, MiningStats,
    MAX_DIFFICULTY_BITS,
};
pub use transaction::{Transaction, TransactionError, TxInput, TxOutput};
pub use utxo::{validate_transaction, Utxo, UtxoSet};
