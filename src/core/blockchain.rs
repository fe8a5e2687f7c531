//! Chain manager
//!
//! [`ChainManager`] owns the block store and the mempool. Every mutation of
//! either goes through it, and callers share it behind a single lock, so a
//! block commit, a reorg rewrite and a mempool replacement never interleave.
//!
//! Incoming blocks pass through ordered checks and stop at the first failure:
//!
//! 1. height collision (identical hash is a no-op, a different one is a fork conflict)
//! 2. height (tip + 1, or 0 on an empty store; genesis needs an empty prev hash)
//! 3. linkage (prev hash and strictly increasing timestamp)
//! 4. freshness (no more than [`MAX_FUTURE_DRIFT_SECS`] ahead of now)
//! 5. Merkle root
//! 6. proof of work
//! 7. ledger (each transaction against the UTXO set of the stored chain,
//!    updated transaction by transaction)

use crate::core::block::{Block, BlockError};
use crate::core::mempool::{Mempool, MempoolError};
use crate::core::pow::{validate_pow, Miner, MiningError, MiningStats};
use crate::core::transaction::{Transaction, TransactionError};
use crate::core::utxo::{validate_transaction, UtxoSet};
use crate::storage::{BlockStore, StorageError};
use chrono::Utc;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// How far ahead of local time a block timestamp may be (seconds)
pub const MAX_FUTURE_DRIFT_SECS: i64 = 120;

// =============================================================================
// Errors
// =============================================================================

/// The check a rejected block failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptStage {
    Height,
    Linkage,
    Freshness,
    Merkle,
    ProofOfWork,
    Ledger,
}

impl fmt::Display for AcceptStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AcceptStage::Height => "height",
            AcceptStage::Linkage => "linkage",
            AcceptStage::Freshness => "freshness",
            AcceptStage::Merkle => "merkle",
            AcceptStage::ProofOfWork => "proof-of-work",
            AcceptStage::Ledger => "ledger",
        };
        f.write_str(name)
    }
}

/// Why a block was not committed
#[derive(Error, Debug)]
pub enum BlockRejection {
    #[error("Unexpected height {got}, expected {expected}")]
    UnexpectedHeight { expected: u64, got: u64 },
    #[error("Genesis block must have an empty previous hash")]
    GenesisPrevHash,
    #[error("Predecessor of block {0} is not stored")]
    MissingPredecessor(u64),
    #[error("Previous hash mismatch at height {0}")]
    PrevHashMismatch(u64),
    #[error("Timestamp {timestamp} does not increase on predecessor's {prev_timestamp}")]
    TimestampNotIncreasing { timestamp: i64, prev_timestamp: i64 },
    #[error("Timestamp {timestamp} too far in the future (limit {limit})")]
    FutureTimestamp { timestamp: i64, limit: i64 },
    #[error("Transaction {0} carries an id that does not match its content")]
    StaleTransactionId(usize),
    #[error("Invalid merkle root")]
    MerkleMismatch,
    #[error("Proof of work does not meet difficulty {0}")]
    InsufficientWork(u32),
    #[error("Transaction {index} ({tx_id}) invalid: {source}")]
    InvalidTransaction {
        index: usize,
        tx_id: String,
        #[source]
        source: TransactionError,
    },
}

impl BlockRejection {
    pub fn stage(&self) -> AcceptStage {
        match self {
            BlockRejection::UnexpectedHeight { .. } | BlockRejection::GenesisPrevHash => {
                AcceptStage::Height
            }
            BlockRejection::MissingPredecessor(_)
            | BlockRejection::PrevHashMismatch(_)
            | BlockRejection::TimestampNotIncreasing { .. } => AcceptStage::Linkage,
            BlockRejection::FutureTimestamp { .. } => AcceptStage::Freshness,
            BlockRejection::StaleTransactionId(_) | BlockRejection::MerkleMismatch => {
                AcceptStage::Merkle
            }
            BlockRejection::InsufficientWork(_) => AcceptStage::ProofOfWork,
            BlockRejection::InvalidTransaction { .. } => AcceptStage::Ledger,
        }
    }
}

/// Block acceptance errors
#[derive(Error, Debug)]
pub enum AcceptError {
    /// A different block is already stored at this height
    #[error("Fork conflict at height {height}: stored {local}, received {incoming}")]
    ForkConflict {
        height: u64,
        local: String,
        incoming: String,
    },
    #[error("Block rejected: {0}")]
    Rejected(#[from] BlockRejection),
    /// A locally mined block no longer extends the tip
    #[error("Tip moved while mining block {0}")]
    StaleTip(u64),
    #[error("Genesis error: {0}")]
    Genesis(#[from] BlockError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl AcceptError {
    pub fn is_fork_conflict(&self) -> bool {
        matches!(self, AcceptError::ForkConflict { .. })
    }
}

/// Structural problems in a chain considered as a whole
#[derive(Error, Debug)]
pub enum ChainValidationError {
    #[error("Block {index} has height {height}")]
    HeightMismatch { index: usize, height: u64 },
    #[error("Genesis block has a non-empty previous hash")]
    GenesisPrevHash,
    #[error("Genesis hash mismatch: expected {expected}, got {got}")]
    GenesisMismatch { expected: String, got: String },
    #[error("Previous hash mismatch at height {0}")]
    PrevHashMismatch(u64),
    #[error("Merkle root mismatch at height {0}")]
    MerkleMismatch(u64),
    #[error("Proof of work invalid at height {0}")]
    InvalidPow(u64),
}

/// Reasons a candidate chain was not adopted
#[derive(Error, Debug)]
pub enum ReorgError {
    #[error("Candidate chain ({candidate} blocks) is not longer than local ({local} blocks)")]
    NotLonger { local: usize, candidate: usize },
    #[error("Candidate chain invalid: {0}")]
    InvalidChain(#[from] ChainValidationError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Local mining errors
#[derive(Error, Debug)]
pub enum MineError {
    #[error(transparent)]
    Mining(#[from] MiningError),
    #[error(transparent)]
    Accept(#[from] AcceptError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

// =============================================================================
// Chain Manager
// =============================================================================

/// Outcome of a successful acceptance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acceptance {
    /// The block was persisted
    Committed,
    /// An identical block was already stored
    AlreadyPresent,
}

/// Everything needed to mine on top of the current tip
#[derive(Debug, Clone)]
pub struct MiningTemplate {
    pub prev: Option<Block>,
    pub transactions: Vec<Transaction>,
}

/// Single owner of a node's chain and mempool
pub struct ChainManager {
    node_id: String,
    store: Box<dyn BlockStore>,
    mempool: Mempool,
}

impl ChainManager {
    /// Open a chain over `store`, loading its saved mempool
    pub fn new(node_id: impl Into<String>, store: Box<dyn BlockStore>) -> Result<Self, StorageError> {
        let mempool = Mempool::from_entries(store.load_mempool()?);
        Ok(Self {
            node_id: node_id.into(),
            store,
            mempool,
        })
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Store the fixed genesis block if the store is empty.
    ///
    /// Returns `false` when blocks already exist.
    pub fn init_genesis(&mut self) -> Result<bool, AcceptError> {
        if let Some(height) = self.tip_height()? {
            info!("Chain already initialised, tip height {}", height);
            return Ok(false);
        }
        let genesis = Block::genesis()?;
        self.accept_block(genesis)?;
        self.store.save_mempool(&self.mempool.snapshot())?;
        Ok(true)
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn heights(&self) -> Result<Vec<u64>, StorageError> {
        self.store.list_heights()
    }

    /// Highest stored height, `None` for an empty store
    pub fn tip_height(&self) -> Result<Option<u64>, StorageError> {
        Ok(self.store.list_heights()?.last().copied())
    }

    /// Height reported to peers; an empty store reports 0
    pub fn status_height(&self) -> Result<u64, StorageError> {
        Ok(self.tip_height()?.unwrap_or(0))
    }

    /// First height missing locally
    pub fn next_height(&self) -> Result<u64, StorageError> {
        Ok(self.tip_height()?.map_or(0, |h| h + 1))
    }

    pub fn block_count(&self) -> Result<usize, StorageError> {
        Ok(self.store.list_heights()?.len())
    }

    pub fn tip(&self) -> Result<Option<Block>, StorageError> {
        self.store.tip()
    }

    pub fn block(&self, height: u64) -> Result<Option<Block>, StorageError> {
        self.store.load_block(height)
    }

    /// All stored blocks in height order
    pub fn blocks(&self) -> Result<Vec<Block>, StorageError> {
        self.store.load_blocks()
    }

    /// Header hash of the stored genesis block
    pub fn genesis_hash(&self) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.store.load_block(0)?.map(|b| b.hash()))
    }

    /// Unspent outputs of the stored chain
    pub fn utxo_set(&self) -> Result<UtxoSet, StorageError> {
        Ok(UtxoSet::build(&self.blocks()?))
    }

    pub fn balance(&self, address: &str) -> Result<i64, StorageError> {
        Ok(self.utxo_set()?.balance(address))
    }

    // -------------------------------------------------------------------------
    // Block acceptance
    // -------------------------------------------------------------------------

    /// Run a block through every check and persist it on success
    pub fn accept_block(&mut self, block: Block) -> Result<Acceptance, AcceptError> {
        let height = block.height();

        if let Some(existing) = self.store.load_block(height)? {
            let (local, incoming) = (existing.hash(), block.hash());
            if local == incoming {
                debug!("Block {} already stored", height);
                return Ok(Acceptance::AlreadyPresent);
            }
            return Err(AcceptError::ForkConflict {
                height,
                local: hex::encode(local),
                incoming: hex::encode(incoming),
            });
        }

        self.check_block(&block, Utc::now().timestamp())?;

        self.store.save_block(&block)?;
        let pruned = self.mempool.prune(&block.transactions);
        if pruned > 0 {
            if let Err(e) = self.store.save_mempool(&self.mempool.snapshot()) {
                warn!("Block {} committed but mempool not saved: {}", height, e);
            }
        }

        info!(
            "Committed block {} {} ({} txs, {} pruned from mempool)",
            height,
            block.header.hash_hex(),
            block.transactions.len(),
            pruned
        );
        Ok(Acceptance::Committed)
    }

    fn check_block(&self, block: &Block, now: i64) -> Result<(), AcceptError> {
        let header = &block.header;
        let height = header.height;

        let expected = self.next_height()?;
        if height != expected {
            return Err(BlockRejection::UnexpectedHeight {
                expected,
                got: height,
            }
            .into());
        }

        if height == 0 {
            if !header.prev_hash.is_empty() {
                return Err(BlockRejection::GenesisPrevHash.into());
            }
        } else {
            let prev = self
                .store
                .load_block(height - 1)?
                .ok_or(BlockRejection::MissingPredecessor(height))?;
            if header.prev_hash != prev.hash() {
                return Err(BlockRejection::PrevHashMismatch(height).into());
            }
            if header.timestamp <= prev.header.timestamp {
                return Err(BlockRejection::TimestampNotIncreasing {
                    timestamp: header.timestamp,
                    prev_timestamp: prev.header.timestamp,
                }
                .into());
            }
        }

        let limit = now + MAX_FUTURE_DRIFT_SECS;
        if header.timestamp > limit {
            return Err(BlockRejection::FutureTimestamp {
                timestamp: header.timestamp,
                limit,
            }
            .into());
        }

        if let Some(index) = block.first_stale_tx_id() {
            return Err(BlockRejection::StaleTransactionId(index).into());
        }
        if !block.verify_merkle_root() {
            return Err(BlockRejection::MerkleMismatch.into());
        }

        if !validate_pow(header) {
            return Err(BlockRejection::InsufficientWork(header.difficulty).into());
        }

        let mut utxos = self.utxo_set()?;
        for (index, tx) in block.transactions.iter().enumerate() {
            validate_transaction(tx, &utxos).map_err(|source| {
                BlockRejection::InvalidTransaction {
                    index,
                    tx_id: tx.id_hex(),
                    source,
                }
            })?;
            utxos.apply_transaction(tx);
        }

        Ok(())
    }

    // -------------------------------------------------------------------------
    // Reorg
    // -------------------------------------------------------------------------

    /// Replace the whole stored chain with `blocks`.
    ///
    /// The candidate must be strictly longer than the stored chain, start
    /// from the same genesis when one is stored, and pass [`validate_chain`].
    /// On any failure the stored chain is left untouched. The mempool is not
    /// reconciled against the new chain.
    pub fn adopt_chain(&mut self, blocks: Vec<Block>) -> Result<(), ReorgError> {
        let local = self.block_count()?;
        if blocks.len() <= local {
            return Err(ReorgError::NotLonger {
                local,
                candidate: blocks.len(),
            });
        }

        let genesis_hash = self.genesis_hash()?;
        validate_chain(&blocks, genesis_hash.as_deref())?;

        self.store.clear_blocks()?;
        for block in &blocks {
            self.store.save_block(block)?;
        }

        warn!(
            "Reorganised: replaced {} local blocks with {} (new tip {})",
            local,
            blocks.len(),
            blocks
                .last()
                .map(|b| b.header.hash_hex())
                .unwrap_or_default()
        );
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Mempool
    // -------------------------------------------------------------------------

    pub fn mempool(&self) -> &Mempool {
        &self.mempool
    }

    pub fn mempool_snapshot(&self) -> HashMap<String, Transaction> {
        self.mempool.snapshot()
    }

    /// Validate `tx` against the stored chain and add it under its hex id.
    ///
    /// Coinbase transactions are refused on purpose: only a miner mints
    /// them, as the first transaction of its own block.
    pub fn submit_transaction(&mut self, mut tx: Transaction) -> Result<String, MempoolError> {
        if tx.is_coinbase {
            return Err(MempoolError::CoinbaseRejected);
        }
        validate_transaction(&tx, &self.utxo_set()?)?;

        tx.id = tx.compute_id();
        let id = hex::encode(&tx.id);
        self.mempool.insert(id.clone(), tx);
        self.store.save_mempool(&self.mempool.snapshot())?;

        info!("Transaction {} added to mempool ({} pending)", id, self.mempool.len());
        Ok(id)
    }

    /// Replace the mempool wholesale
    pub fn replace_mempool(
        &mut self,
        entries: HashMap<String, Transaction>,
    ) -> Result<(), StorageError> {
        self.mempool.replace(entries);
        self.store.save_mempool(&self.mempool.snapshot())
    }

    pub fn clear_mempool(&mut self) -> Result<(), StorageError> {
        self.mempool.clear();
        self.store.save_mempool(&self.mempool.snapshot())
    }

    // -------------------------------------------------------------------------
    // Local mining
    // -------------------------------------------------------------------------

    /// Tip plus the coinbase and the mempool transactions that still validate,
    /// checked in order against a working UTXO set
    pub fn mining_template(
        &self,
        miner_address: &str,
        reward: i64,
    ) -> Result<MiningTemplate, StorageError> {
        let prev = self.tip()?;
        let mut utxos = self.utxo_set()?;

        let coinbase = Transaction::coinbase(miner_address, reward);
        utxos.apply_transaction(&coinbase);
        let mut transactions = vec![coinbase];

        for tx in self.mempool.transactions() {
            if tx.is_coinbase {
                debug!("Skipping coinbase entry {} in mempool", tx.id_hex());
                continue;
            }
            match validate_transaction(&tx, &utxos) {
                Ok(()) => {
                    utxos.apply_transaction(&tx);
                    transactions.push(tx);
                }
                Err(e) => debug!("Leaving {} out of block: {}", tx.id_hex(), e),
            }
        }

        Ok(MiningTemplate { prev, transactions })
    }

    /// Commit a block mined locally, then clear the mempool
    pub fn commit_mined(&mut self, block: Block) -> Result<Acceptance, AcceptError> {
        let tip = self.tip()?;
        let extends_tip = match &tip {
            Some(tip) => block.header.prev_hash == tip.hash(),
            None => block.height() == 0,
        };
        if !extends_tip {
            return Err(AcceptError::StaleTip(block.height()));
        }

        let acceptance = self.accept_block(block)?;
        self.clear_mempool()?;
        Ok(acceptance)
    }

    /// Build, mine and commit one block synchronously
    pub fn mine_block(
        &mut self,
        miner: &Miner,
        miner_address: &str,
        difficulty: u32,
        reward: i64,
    ) -> Result<(Block, MiningStats), MineError> {
        let template = self.mining_template(miner_address, reward)?;
        let prev = template.prev.as_ref().map(|b| &b.header);
        let (block, stats) = miner.mine_block(prev, template.transactions, difficulty)?;
        self.commit_mined(block.clone())?;
        Ok((block, stats))
    }
}

/// Check a chain as a self-contained unit: contiguous heights from 0, an
/// empty genesis prev hash (matching `expected_genesis` when given), correct
/// links, Merkle roots and proof of work. Timestamps and transactions are
/// not checked.
pub fn validate_chain(
    blocks: &[Block],
    expected_genesis: Option<&[u8]>,
) -> Result<(), ChainValidationError> {
    let mut prev_hash: Vec<u8> = Vec::new();

    for (index, block) in blocks.iter().enumerate() {
        let header = &block.header;
        if header.height != index as u64 {
            return Err(ChainValidationError::HeightMismatch {
                index,
                height: header.height,
            });
        }

        let hash = header.hash();
        if index == 0 {
            if !header.prev_hash.is_empty() {
                return Err(ChainValidationError::GenesisPrevHash);
            }
            if let Some(expected) = expected_genesis {
                if hash != expected {
                    return Err(ChainValidationError::GenesisMismatch {
                        expected: hex::encode(expected),
                        got: hex::encode(&hash),
                    });
                }
            }
        } else if header.prev_hash != prev_hash {
            return Err(ChainValidationError::PrevHashMismatch(header.height));
        }

        if block.first_stale_tx_id().is_some() || !block.verify_merkle_root() {
            return Err(ChainValidationError::MerkleMismatch(header.height));
        }
        if !validate_pow(header) {
            return Err(ChainValidationError::InvalidPow(header.height));
        }

        prev_hash = hash;
    }

    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::transaction::{TxInput, TxOutput};
    use crate::crypto::KeyPair;
    use crate::storage::{FileStore, MemoryStore};

    /// Base timestamp for hand-built test chains
    pub(crate) const BASE_TS: i64 = 1_700_000_000;

    /// Difficulty-0 block on top of `prev` with an explicit timestamp
    pub(crate) fn block_on(prev: Option<&Block>, txs: Vec<Transaction>, timestamp: i64) -> Block {
        let mut block = Block::new(prev.map(|b| &b.header), txs, 0);
        block.header.timestamp = timestamp;
        block
    }

    /// Chain of `len` difficulty-0 coinbase-only blocks paying `miner`
    pub(crate) fn test_chain(len: usize, miner: &str) -> Vec<Block> {
        let mut blocks: Vec<Block> = Vec::new();
        for i in 0..len {
            let block = block_on(
                blocks.last(),
                vec![Transaction::coinbase(miner, 50)],
                BASE_TS + i as i64,
            );
            blocks.push(block);
        }
        blocks
    }

    fn manager() -> ChainManager {
        ChainManager::new("node1", Box::new(MemoryStore::new())).unwrap()
    }

    fn rejection(result: Result<Acceptance, AcceptError>) -> BlockRejection {
        match result {
            Err(AcceptError::Rejected(reason)) => reason,
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_init_genesis_once() {
        let mut chain = manager();
        assert_eq!(chain.status_height().unwrap(), 0);
        assert!(chain.tip().unwrap().is_none());

        assert!(chain.init_genesis().unwrap());
        assert!(!chain.init_genesis().unwrap());
        assert_eq!(chain.block_count().unwrap(), 1);
        assert_eq!(chain.balance("miner").unwrap(), 50);
        assert_eq!(
            chain.genesis_hash().unwrap().unwrap(),
            Block::genesis().unwrap().hash()
        );
    }

    #[test]
    fn test_accept_chain_and_duplicate_is_noop() {
        let mut chain = manager();
        let blocks = test_chain(3, "m");
        for block in &blocks {
            assert_eq!(chain.accept_block(block.clone()).unwrap(), Acceptance::Committed);
        }
        assert_eq!(chain.tip_height().unwrap(), Some(2));

        assert_eq!(
            chain.accept_block(blocks[1].clone()).unwrap(),
            Acceptance::AlreadyPresent
        );
        assert_eq!(chain.block_count().unwrap(), 3);
    }

    #[test]
    fn test_different_block_at_stored_height_is_fork_conflict() {
        let mut chain = manager();
        let blocks = test_chain(2, "m");
        for block in &blocks {
            chain.accept_block(block.clone()).unwrap();
        }

        let rival = block_on(Some(&blocks[0]), vec![Transaction::coinbase("x", 50)], BASE_TS + 5);
        let err = chain.accept_block(rival).unwrap_err();
        assert!(err.is_fork_conflict());
        assert!(matches!(err, AcceptError::ForkConflict { height: 1, .. }));
    }

    #[test]
    fn test_height_gap_rejected() {
        let mut chain = manager();
        let blocks = test_chain(3, "m");
        chain.accept_block(blocks[0].clone()).unwrap();

        let reason = rejection(chain.accept_block(blocks[2].clone()));
        assert!(matches!(
            reason,
            BlockRejection::UnexpectedHeight { expected: 1, got: 2 }
        ));
        assert_eq!(reason.stage(), AcceptStage::Height);
    }

    #[test]
    fn test_genesis_with_prev_hash_rejected() {
        let mut chain = manager();
        let mut genesis = test_chain(1, "m").remove(0);
        genesis.header.prev_hash = vec![1u8; 32];
        assert!(matches!(
            rejection(chain.accept_block(genesis)),
            BlockRejection::GenesisPrevHash
        ));
    }

    #[test]
    fn test_linkage_checks() {
        let mut chain = manager();
        let blocks = test_chain(1, "m");
        chain.accept_block(blocks[0].clone()).unwrap();

        let mut wrong_prev = block_on(Some(&blocks[0]), vec![], BASE_TS + 1);
        wrong_prev.header.prev_hash = vec![0u8; 32];
        assert!(matches!(
            rejection(chain.accept_block(wrong_prev)),
            BlockRejection::PrevHashMismatch(1)
        ));

        let same_time = block_on(Some(&blocks[0]), vec![], BASE_TS);
        let reason = rejection(chain.accept_block(same_time));
        assert!(matches!(reason, BlockRejection::TimestampNotIncreasing { .. }));
        assert_eq!(reason.stage(), AcceptStage::Linkage);
    }

    #[test]
    fn test_future_block_rejected() {
        let mut chain = manager();
        let future = block_on(
            None,
            vec![Transaction::coinbase("m", 50)],
            Utc::now().timestamp() + MAX_FUTURE_DRIFT_SECS + 60,
        );
        let reason = rejection(chain.accept_block(future));
        assert_eq!(reason.stage(), AcceptStage::Freshness);
        assert_eq!(chain.block_count().unwrap(), 0);
    }

    #[test]
    fn test_merkle_and_pow_checks() {
        let mut chain = manager();
        let mut tampered = test_chain(1, "m").remove(0);
        tampered.transactions[0].outputs[0].value = 5000;
        assert!(matches!(
            rejection(chain.accept_block(tampered.clone())),
            BlockRejection::StaleTransactionId(0)
        ));
        tampered.transactions[0].id = tampered.transactions[0].compute_id();
        let reason = rejection(chain.accept_block(tampered));
        assert!(matches!(reason, BlockRejection::MerkleMismatch));
        assert_eq!(reason.stage(), AcceptStage::Merkle);

        let mut genesis = Block::genesis().unwrap();
        genesis.header.nonce += 1;
        assert!(matches!(
            rejection(chain.accept_block(genesis)),
            BlockRejection::InsufficientWork(12)
        ));

        assert_eq!(chain.accept_block(Block::genesis().unwrap()).unwrap(), Acceptance::Committed);
    }

    #[test]
    fn test_balance_after_spend_with_change() {
        let owner = KeyPair::generate();
        let m = owner.address();
        let mut chain = manager();

        let genesis = block_on(None, vec![Transaction::coinbase(&m, 50)], BASE_TS);
        chain.accept_block(genesis.clone()).unwrap();

        let mut spend = Transaction::new(
            vec![TxInput::new(genesis.transactions[0].compute_id(), 0, owner.public_key_bytes())],
            vec![TxOutput::new(30, "addr2"), TxOutput::new(20, &m)],
        );
        spend.sign(&owner).unwrap();
        let block = block_on(Some(&genesis), vec![spend], BASE_TS + 1);
        chain.accept_block(block).unwrap();

        assert_eq!(chain.balance(&m).unwrap(), 20);
        assert_eq!(chain.balance("addr2").unwrap(), 30);
    }

    #[test]
    fn test_intra_block_spend_ordering() {
        let owner = KeyPair::generate();
        let mut chain = manager();
        let genesis = block_on(None, vec![Transaction::coinbase(&owner.address(), 50)], BASE_TS);
        chain.accept_block(genesis.clone()).unwrap();

        let mut first = Transaction::new(
            vec![TxInput::new(genesis.transactions[0].compute_id(), 0, owner.public_key_bytes())],
            vec![TxOutput::new(50, &owner.address())],
        );
        first.sign(&owner).unwrap();
        let mut second = Transaction::new(
            vec![TxInput::new(first.compute_id(), 0, owner.public_key_bytes())],
            vec![TxOutput::new(50, "addr2")],
        );
        second.sign(&owner).unwrap();

        // spending an output created later in the same block fails
        let backwards = block_on(
            Some(&genesis),
            vec![second.clone(), first.clone()],
            BASE_TS + 1,
        );
        let reason = rejection(chain.accept_block(backwards));
        assert!(matches!(
            reason,
            BlockRejection::InvalidTransaction { index: 0, .. }
        ));
        assert_eq!(reason.stage(), AcceptStage::Ledger);

        // the same pair in dependency order is fine
        let forwards = block_on(Some(&genesis), vec![first, second], BASE_TS + 1);
        chain.accept_block(forwards).unwrap();
        assert_eq!(chain.balance("addr2").unwrap(), 50);
        assert_eq!(chain.balance(&owner.address()).unwrap(), 0);
    }

    #[test]
    fn test_intra_block_double_spend_rejected() {
        let owner = KeyPair::generate();
        let mut chain = manager();
        let genesis = block_on(None, vec![Transaction::coinbase(&owner.address(), 50)], BASE_TS);
        chain.accept_block(genesis.clone()).unwrap();

        let outpoint = genesis.transactions[0].compute_id();
        let mut a = Transaction::new(
            vec![TxInput::new(outpoint.clone(), 0, owner.public_key_bytes())],
            vec![TxOutput::new(50, "addr2")],
        );
        a.sign(&owner).unwrap();
        let mut b = Transaction::new(
            vec![TxInput::new(outpoint, 0, owner.public_key_bytes())],
            vec![TxOutput::new(50, "addr3")],
        );
        b.sign(&owner).unwrap();

        let block = block_on(Some(&genesis), vec![a, b], BASE_TS + 1);
        assert!(matches!(
            rejection(chain.accept_block(block)),
            BlockRejection::InvalidTransaction { index: 1, .. }
        ));
    }

    #[test]
    fn test_commit_prunes_included_transactions() {
        let owner = KeyPair::generate();
        let mut chain = manager();
        let genesis = block_on(None, vec![Transaction::coinbase(&owner.address(), 50)], BASE_TS);
        chain.accept_block(genesis.clone()).unwrap();

        let mut t = Transaction::new(
            vec![TxInput::new(genesis.transactions[0].compute_id(), 0, owner.public_key_bytes())],
            vec![TxOutput::new(10, "addr2")],
        );
        t.sign(&owner).unwrap();
        let unrelated = Transaction::new(
            vec![TxInput::new(vec![9u8; 32], 0, owner.public_key_bytes())],
            vec![TxOutput::new(1, "addr3")],
        );

        let mut entries = HashMap::new();
        entries.insert(t.id_hex(), t.clone());
        entries.insert(unrelated.id_hex(), unrelated.clone());
        chain.replace_mempool(entries).unwrap();

        let block = block_on(Some(&genesis), vec![t.clone()], BASE_TS + 1);
        chain.accept_block(block).unwrap();

        assert!(!chain.mempool().contains(&t.id_hex()));
        assert!(chain.mempool().contains(&unrelated.id_hex()));
    }

    #[test]
    fn test_submit_transaction() {
        let owner = KeyPair::generate();
        let mut chain = manager();
        let genesis = block_on(None, vec![Transaction::coinbase(&owner.address(), 50)], BASE_TS);
        chain.accept_block(genesis.clone()).unwrap();

        let mut tx = Transaction::new(
            vec![TxInput::new(genesis.transactions[0].compute_id(), 0, owner.public_key_bytes())],
            vec![TxOutput::new(60, "addr2")],
        );
        tx.sign(&owner).unwrap();
        assert!(matches!(
            chain.submit_transaction(tx),
            Err(MempoolError::ValidationError(TransactionError::InsufficientInputs { .. }))
        ));

        let mut tx = Transaction::new(
            vec![TxInput::new(genesis.transactions[0].compute_id(), 0, owner.public_key_bytes())],
            vec![TxOutput::new(40, "addr2")],
        );
        tx.sign(&owner).unwrap();
        let id = chain.submit_transaction(tx.clone()).unwrap();
        assert_eq!(id, tx.id_hex());
        assert!(chain.mempool().contains(&id));

        assert!(matches!(
            chain.submit_transaction(Transaction::coinbase("x", 50)),
            Err(MempoolError::CoinbaseRejected)
        ));
    }

    #[test]
    fn test_mining_template_skips_invalid_entries() {
        let owner = KeyPair::generate();
        let mut chain = manager();
        let genesis = block_on(None, vec![Transaction::coinbase(&owner.address(), 50)], BASE_TS);
        chain.accept_block(genesis.clone()).unwrap();

        let outpoint = genesis.transactions[0].compute_id();
        let mut a = Transaction::new(
            vec![TxInput::new(outpoint.clone(), 0, owner.public_key_bytes())],
            vec![TxOutput::new(50, "addr2")],
        );
        a.sign(&owner).unwrap();
        let mut b = Transaction::new(
            vec![TxInput::new(outpoint, 0, owner.public_key_bytes())],
            vec![TxOutput::new(50, "addr3")],
        );
        b.sign(&owner).unwrap();

        let mut entries = HashMap::new();
        entries.insert(a.id_hex(), a);
        entries.insert(b.id_hex(), b);
        chain.replace_mempool(entries).unwrap();

        let template = chain.mining_template("m", 50).unwrap();
        assert_eq!(template.prev.unwrap().hash(), genesis.hash());
        // coinbase plus exactly one of the conflicting spends
        assert_eq!(template.transactions.len(), 2);
        assert!(template.transactions[0].is_coinbase);
    }

    #[test]
    fn test_mine_block_commits_and_clears_mempool() {
        let mut chain = manager();
        chain.init_genesis().unwrap();
        let mut entries = HashMap::new();
        entries.insert("junk".to_string(), Transaction::coinbase("x", 1));
        chain.replace_mempool(entries).unwrap();

        let (block, _) = chain.mine_block(&Miner::new(), "bob", 4, 50).unwrap();
        assert_eq!(block.height(), 1);
        assert_eq!(block.transactions.len(), 1);
        assert!(chain.mempool().is_empty());
        assert_eq!(chain.balance("bob").unwrap(), 50);
    }

    #[test]
    fn test_commit_mined_detects_stale_tip() {
        let mut chain = manager();
        let blocks = test_chain(2, "m");
        chain.accept_block(blocks[0].clone()).unwrap();
        chain.accept_block(blocks[1].clone()).unwrap();

        let stale = block_on(Some(&blocks[0]), vec![Transaction::coinbase("me", 50)], BASE_TS + 9);
        assert!(matches!(
            chain.commit_mined(stale),
            Err(AcceptError::StaleTip(1))
        ));
    }

    #[test]
    fn test_validate_chain() {
        let blocks = test_chain(3, "m");
        assert!(validate_chain(&blocks, None).is_ok());
        assert!(validate_chain(&blocks, Some(&blocks[0].hash())).is_ok());

        assert!(matches!(
            validate_chain(&blocks, Some(&[0u8; 32])),
            Err(ChainValidationError::GenesisMismatch { .. })
        ));
        assert!(matches!(
            validate_chain(&blocks[1..], None),
            Err(ChainValidationError::HeightMismatch { index: 0, height: 1 })
        ));

        let mut broken = blocks.clone();
        broken[2].header.prev_hash = vec![1u8; 32];
        assert!(matches!(
            validate_chain(&broken, None),
            Err(ChainValidationError::PrevHashMismatch(2))
        ));

        let mut bad_pow = blocks;
        bad_pow[1].header.difficulty = 255;
        assert!(matches!(
            validate_chain(&bad_pow, None),
            Err(ChainValidationError::InvalidPow(1))
        ));
    }

    #[test]
    fn test_adopt_longer_chain() {
        let mut chain = manager();
        let local = test_chain(2, "local");
        for block in &local {
            chain.accept_block(block.clone()).unwrap();
        }

        // same genesis, longer divergent history
        let mut remote = vec![local[0].clone()];
        for i in 1..4 {
            let block = block_on(
                remote.last(),
                vec![Transaction::coinbase("remote", 50)],
                BASE_TS + 10 + i,
            );
            remote.push(block);
        }

        chain.adopt_chain(remote.clone()).unwrap();
        assert_eq!(chain.blocks().unwrap(), remote);
        assert_eq!(chain.balance("remote").unwrap(), 150);
        assert_eq!(chain.balance("local").unwrap(), 50);
    }

    #[test]
    fn test_adopt_rejects_shorter_or_foreign_chain() {
        let mut chain = manager();
        let local = test_chain(2, "local");
        for block in &local {
            chain.accept_block(block.clone()).unwrap();
        }

        assert!(matches!(
            chain.adopt_chain(test_chain(2, "other")),
            Err(ReorgError::NotLonger { local: 2, candidate: 2 })
        ));
        assert!(matches!(
            chain.adopt_chain(test_chain(5, "other")),
            Err(ReorgError::InvalidChain(ChainValidationError::GenesisMismatch { .. }))
        ));
        assert_eq!(chain.blocks().unwrap(), local);
    }

    #[test]
    fn test_chain_survives_reopen() {
        let temp_dir = tempfile::tempdir().unwrap();
        {
            let store = FileStore::new(temp_dir.path(), "node1").unwrap();
            let mut chain = ChainManager::new("node1", Box::new(store)).unwrap();
            for block in test_chain(2, "m") {
                chain.accept_block(block).unwrap();
            }
            let mut entries = HashMap::new();
            entries.insert("k".to_string(), Transaction::coinbase("x", 1));
            chain.replace_mempool(entries).unwrap();
        }

        let store = FileStore::new(temp_dir.path(), "node1").unwrap();
        let chain = ChainManager::new("node1", Box::new(store)).unwrap();
        assert_eq!(chain.tip_height().unwrap(), Some(1));
        assert!(chain.mempool().contains("k"));
    }
}
