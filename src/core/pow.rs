//! Proof-of-work engine
//!
//! Difficulty is the number of leading zero bits required of a header's
//! double hash. The target is `2^(256 - difficulty)` and a header is valid
//! when its hash, read as a big-endian integer, does not exceed it.

use crate::core::block::{Block, BlockHeader};
use crate::core::transaction::Transaction;
use chrono::Utc;
use log::info;
use num_bigint::BigUint;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Difficulties at or above this produce a zero target
pub const MAX_DIFFICULTY_BITS: u32 = 256;

/// How many attempts run between cancellation/deadline checks
const CHECK_INTERVAL: u64 = 1024;

/// Mining errors
#[derive(Error, Debug)]
pub enum MiningError {
    #[error("Difficulty {0} has an unsatisfiable target")]
    UnsatisfiableDifficulty(u32),
    #[error("Mining cancelled after {0} attempts")]
    Cancelled(u64),
    #[error("Mining timed out after {0} attempts")]
    TimedOut(u64),
    #[error("Mining task aborted: {0}")]
    Aborted(String),
}

/// Convert a difficulty into its numeric target
pub fn target_from_difficulty(difficulty: u32) -> BigUint {
    if difficulty >= MAX_DIFFICULTY_BITS {
        return BigUint::default();
    }
    BigUint::from(1u8) << (MAX_DIFFICULTY_BITS - difficulty) as usize
}

/// Check a raw hash against the target of `difficulty`
pub fn hash_meets_target(hash: &[u8], difficulty: u32) -> bool {
    BigUint::from_bytes_be(hash) <= target_from_difficulty(difficulty)
}

/// Check a header's proof of work
pub fn validate_pow(header: &BlockHeader) -> bool {
    hash_meets_target(&header.hash(), header.difficulty)
}

/// Mining statistics
#[derive(Debug, Clone)]
pub struct MiningStats {
    /// Number of hash attempts
    pub hash_attempts: u64,
    /// Time taken in milliseconds
    pub time_ms: u128,
    /// Hash rate (hashes per second)
    pub hash_rate: f64,
}

/// Nonce search with cooperative cancellation and an optional deadline
#[derive(Clone, Default)]
pub struct Miner {
    cancel: CancellationToken,
    timeout: Option<Duration>,
}

impl Miner {
    /// Create a miner with no deadline
    pub fn new() -> Self {
        Self::default()
    }

    /// Give up after `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Stop when `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that aborts this miner's searches
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Build and mine a block on top of `prev`
    pub fn mine_block(
        &self,
        prev: Option<&BlockHeader>,
        transactions: Vec<Transaction>,
        difficulty: u32,
    ) -> Result<(Block, MiningStats), MiningError> {
        let mut block = Block::new(prev, transactions, difficulty);
        let min_timestamp = prev.map(|p| p.timestamp + 1).unwrap_or(i64::MIN);

        info!(
            "Mining block {} with difficulty {}...",
            block.height(),
            difficulty
        );
        let stats = self.solve(&mut block.header, min_timestamp)?;
        info!(
            "Block {} mined in {}ms ({} attempts, {:.2} H/s)",
            block.height(),
            stats.time_ms,
            stats.hash_attempts,
            stats.hash_rate
        );

        Ok((block, stats))
    }

    /// Search nonces from 0, stamping each attempt with the current time
    /// (never earlier than `min_timestamp`).
    pub fn solve(
        &self,
        header: &mut BlockHeader,
        min_timestamp: i64,
    ) -> Result<MiningStats, MiningError> {
        if header.difficulty >= MAX_DIFFICULTY_BITS {
            return Err(MiningError::UnsatisfiableDifficulty(header.difficulty));
        }

        let target = target_from_difficulty(header.difficulty);
        let start = Instant::now();
        let mut attempts = 0u64;

        for nonce in 0..=u64::MAX {
            if attempts % CHECK_INTERVAL == 0 {
                if self.cancel.is_cancelled() {
                    return Err(MiningError::Cancelled(attempts));
                }
                if self.timeout.is_some_and(|limit| start.elapsed() >= limit) {
                    return Err(MiningError::TimedOut(attempts));
                }
            }

            header.nonce = nonce;
            header.timestamp = Utc::now().timestamp().max(min_timestamp);
            attempts += 1;

            if BigUint::from_bytes_be(&header.hash()) <= target {
                break;
            }
        }

        let elapsed = start.elapsed().as_millis();
        let hash_rate = if elapsed > 0 {
            (attempts as f64) / (elapsed as f64 / 1000.0)
        } else {
            attempts as f64
        };

        Ok(MiningStats {
            hash_attempts: attempts,
            time_ms: elapsed,
            hash_rate,
        })
    }

    /// Run [`Miner::mine_block`] on the blocking pool
    pub async fn mine_detached(
        &self,
        prev: Option<BlockHeader>,
        transactions: Vec<Transaction>,
        difficulty: u32,
    ) -> Result<(Block, MiningStats), MiningError> {
        let miner = self.clone();
        tokio::task::spawn_blocking(move || miner.mine_block(prev.as_ref(), transactions, difficulty))
            .await
            .map_err(|e| MiningError::Aborted(e.to_string()))?
    }
}
