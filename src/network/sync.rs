//! Chain synchronization with peers
//!
//! Catch-up fetches the heights missing locally one at a time and feeds them
//! to the chain manager. A fork conflict hands over to a whole-chain reorg;
//! any other failure ends the attempt. Peer I/O never holds the chain lock.

use crate::core::{AcceptError, ChainManager, ReorgError};
use crate::network::peer::{PeerClient, PeerError};
use crate::storage::StorageError;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

/// Chain manager shared between request handlers and the sync task
pub type SharedChain = Arc<RwLock<ChainManager>>;

/// Sync errors
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Peer error: {0}")]
    Peer(#[from] PeerError),
    #[error("Fetch block {height}: {source}")]
    Fetch {
        height: u64,
        #[source]
        source: PeerError,
    },
    #[error("Validate block {height}: {source}")]
    Rejected {
        height: u64,
        #[source]
        source: AcceptError,
    },
    #[error("Reorg failed: {0}")]
    Reorg(#[from] ReorgError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// What a successful catch-up did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// The peer had nothing new
    UpToDate,
    /// Heights `from..=to` were appended
    CaughtUp { from: u64, to: u64 },
    /// The local chain was replaced by the peer's
    Reorganized { tip: u64 },
}

/// Success with a payload, or failure with a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum PeerSyncResult<T> {
    Success(T),
    Failure(String),
}

impl<T, E: std::fmt::Display> From<Result<T, E>> for PeerSyncResult<T> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => PeerSyncResult::Success(value),
            Err(e) => PeerSyncResult::Failure(e.to_string()),
        }
    }
}

impl<T> PeerSyncResult<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, PeerSyncResult::Success(_))
    }
}

/// Result of one sync round against one peer
#[derive(Debug, Clone, Serialize)]
pub struct PeerSyncReport {
    pub peer: String,
    pub chain: PeerSyncResult<SyncOutcome>,
    /// Number of entries adopted from the peer's mempool
    pub mempool: PeerSyncResult<usize>,
}

/// Chain synchronization driver
pub struct ChainSync {
    chain: SharedChain,
    syncing: RwLock<bool>,
}

impl ChainSync {
    pub fn new(chain: SharedChain) -> Self {
        Self {
            chain,
            syncing: RwLock::new(false),
        }
    }

    pub fn chain(&self) -> &SharedChain {
        &self.chain
    }

    /// Check if a sync round is running
    pub async fn is_syncing(&self) -> bool {
        *self.syncing.read().await
    }

    /// Catch up with `peer`, then adopt its mempool. Failures are logged and
    /// reported, never retried here.
    pub async fn sync_with_peer<P: PeerClient>(&self, peer: &P) -> PeerSyncReport {
        *self.syncing.write().await = true;

        let chain = self.catch_up(peer).await;
        match &chain {
            Ok(SyncOutcome::UpToDate) => {}
            Ok(outcome) => log::info!("[sync][{}] {:?}", peer.url(), outcome),
            Err(e) => log::warn!("[sync][{}] sync blocks err: {}", peer.url(), e),
        }

        let mempool = self.sync_mempool(peer).await;
        if let Err(e) = &mempool {
            log::warn!("[sync][{}] sync txpool err: {}", peer.url(), e);
        }

        *self.syncing.write().await = false;
        PeerSyncReport {
            peer: peer.url().to_string(),
            chain: chain.into(),
            mempool: mempool.into(),
        }
    }

    /// Fetch and accept every height the peer has beyond the local tip
    pub async fn catch_up<P: PeerClient>(&self, peer: &P) -> Result<SyncOutcome, SyncError> {
        let status = peer.status().await?;
        let start = self.chain.read().await.next_height()?;

        if status.height < start {
            return Ok(SyncOutcome::UpToDate);
        }

        log::debug!(
            "[sync][{}] fetching heights {}..={}",
            peer.url(),
            start,
            status.height
        );
        for height in start..=status.height {
            let block = peer
                .block(height)
                .await
                .map_err(|source| SyncError::Fetch { height, source })?;

            let result = self.chain.write().await.accept_block(block);
            match result {
                Ok(_) => {}
                Err(e) if e.is_fork_conflict() => {
                    log::info!("[sync][{}] {}; trying reorg", peer.url(), e);
                    return self.reorg(peer, status.height).await;
                }
                Err(source) => return Err(SyncError::Rejected { height, source }),
            }
        }

        Ok(SyncOutcome::CaughtUp {
            from: start,
            to: status.height,
        })
    }

    /// Replace the local chain with the peer's if it is longer and valid
    pub async fn reorg<P: PeerClient>(
        &self,
        peer: &P,
        peer_tip: u64,
    ) -> Result<SyncOutcome, SyncError> {
        let local = self.chain.read().await.block_count()?;
        let candidate = peer_tip.saturating_add(1);
        if candidate <= local as u64 {
            return Err(ReorgError::NotLonger {
                local,
                candidate: candidate as usize,
            }
            .into());
        }

        let blocks = peer.chain(peer_tip).await?;
        // length and genesis are checked again under the write lock
        self.chain.write().await.adopt_chain(blocks)?;

        Ok(SyncOutcome::Reorganized { tip: peer_tip })
    }

    /// Replace the local mempool with the peer's snapshot
    pub async fn sync_mempool<P: PeerClient>(&self, peer: &P) -> Result<usize, SyncError> {
        let entries = peer.txpool().await?;
        let count = entries.len();
        self.chain.write().await.replace_mempool(entries)?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::blockchain::tests::{block_on, test_chain, BASE_TS};
    use crate::core::{Block, ChainValidationError, Transaction};
    use crate::network::message::StatusResponse;
    use crate::storage::MemoryStore;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory peer serving a fixed chain and mempool
    struct MockPeer {
        blocks: Vec<Block>,
        pool: HashMap<String, Transaction>,
        /// Commit this block into the shared chain just before serving `height`
        race: Option<(u64, Block, SharedChain)>,
        fetched: Mutex<Vec<u64>>,
    }

    impl MockPeer {
        fn new(blocks: Vec<Block>) -> Self {
            Self {
                blocks,
                pool: HashMap::new(),
                race: None,
                fetched: Mutex::new(Vec::new()),
            }
        }

        fn fetched(&self) -> Vec<u64> {
            self.fetched.lock().unwrap().clone()
        }
    }

    fn not_found(path: String) -> PeerError {
        PeerError::Status {
            method: "GET",
            path,
            status: 404,
            message: "not found".into(),
        }
    }

    impl PeerClient for MockPeer {
        fn url(&self) -> &str {
            "mock"
        }

        async fn status(&self) -> Result<StatusResponse, PeerError> {
            Ok(StatusResponse {
                node_id: "mock".into(),
                height: self.blocks.len().saturating_sub(1) as u64,
            })
        }

        async fn block(&self, height: u64) -> Result<Block, PeerError> {
            self.fetched.lock().unwrap().push(height);
            if let Some((at, rival, chain)) = &self.race {
                if *at == height {
                    chain.write().await.accept_block(rival.clone()).unwrap();
                }
            }
            self.blocks
                .get(height as usize)
                .cloned()
                .ok_or_else(|| not_found(format!("/block?height={}", height)))
        }

        async fn txpool(&self) -> Result<HashMap<String, Transaction>, PeerError> {
            Ok(self.pool.clone())
        }

        async fn submit_tx(&self, _tx: &Transaction, _relay: bool) -> Result<(), PeerError> {
            Ok(())
        }
    }

    fn shared(blocks: &[Block]) -> SharedChain {
        let mut chain = ChainManager::new("local", Box::new(MemoryStore::new())).unwrap();
        for block in blocks {
            chain.accept_block(block.clone()).unwrap();
        }
        Arc::new(RwLock::new(chain))
    }

    /// `base` followed by `extra` coinbase blocks paying `miner`
    fn extend(base: &[Block], extra: usize, miner: &str, ts_offset: i64) -> Vec<Block> {
        let mut blocks = base.to_vec();
        for i in 0..extra {
            let block = block_on(
                blocks.last(),
                vec![Transaction::coinbase(miner, 50)],
                BASE_TS + ts_offset + i as i64,
            );
            blocks.push(block);
        }
        blocks
    }

    #[tokio::test]
    async fn test_catch_up_from_empty() {
        let remote = test_chain(3, "m");
        let peer = MockPeer::new(remote.clone());
        let sync = ChainSync::new(shared(&[]));

        let outcome = sync.catch_up(&peer).await.unwrap();
        assert_eq!(outcome, SyncOutcome::CaughtUp { from: 0, to: 2 });
        assert_eq!(sync.chain().read().await.blocks().unwrap(), remote);
        assert_eq!(peer.fetched(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_catch_up_only_fetches_missing() {
        let remote = test_chain(4, "m");
        let peer = MockPeer::new(remote.clone());
        let sync = ChainSync::new(shared(&remote[..2]));

        let outcome = sync.catch_up(&peer).await.unwrap();
        assert_eq!(outcome, SyncOutcome::CaughtUp { from: 2, to: 3 });
        assert_eq!(peer.fetched(), vec![2, 3]);

        assert_eq!(sync.catch_up(&peer).await.unwrap(), SyncOutcome::UpToDate);
    }

    #[tokio::test]
    async fn test_catch_up_stops_on_invalid_block() {
        let mut remote = test_chain(3, "m");
        remote[1].header.nonce = 1;
        remote[1].header.difficulty = 250;
        let peer = MockPeer::new(remote.clone());
        let sync = ChainSync::new(shared(&remote[..1]));

        let err = sync.catch_up(&peer).await.unwrap_err();
        assert!(matches!(err, SyncError::Rejected { height: 1, .. }));
        assert_eq!(peer.fetched(), vec![1]);
        assert_eq!(sync.chain().read().await.block_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_catch_up_fetch_failure_is_reported() {
        // reports height 0 but cannot serve it
        let peer = MockPeer::new(vec![]);
        let sync = ChainSync::new(shared(&[]));

        let err = sync.catch_up(&peer).await.unwrap_err();
        assert!(matches!(err, SyncError::Fetch { height: 0, .. }));
        assert_eq!(sync.chain().read().await.block_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_fork_conflict_triggers_reorg() {
        let base = test_chain(1, "m");
        let remote = extend(&base, 3, "remote", 100);
        let chain = shared(&base);

        // a local block lands at height 1 while catch-up is fetching it
        let rival = block_on(Some(&base[0]), vec![Transaction::coinbase("local", 50)], BASE_TS + 1);
        let mut peer = MockPeer::new(remote.clone());
        peer.race = Some((1, rival, chain.clone()));

        let sync = ChainSync::new(chain);
        let outcome = sync.catch_up(&peer).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Reorganized { tip: 3 });
        assert_eq!(sync.chain().read().await.blocks().unwrap(), remote);
        assert_eq!(sync.chain().read().await.balance("local").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reorg_adopts_longer_chain() {
        let base = test_chain(1, "m");
        let local = extend(&base, 1, "local", 1);
        let remote = extend(&base, 2, "remote", 50);
        let peer = MockPeer::new(remote.clone());
        let sync = ChainSync::new(shared(&local));

        let outcome = sync.reorg(&peer, 2).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Reorganized { tip: 2 });
        assert_eq!(peer.fetched(), vec![0, 1, 2]);
        assert_eq!(sync.chain().read().await.blocks().unwrap(), remote);
    }

    #[tokio::test]
    async fn test_reorg_rejects_shorter_chain_without_fetching() {
        let local = test_chain(3, "m");
        let peer = MockPeer::new(test_chain(2, "other"));
        let sync = ChainSync::new(shared(&local));

        let err = sync.reorg(&peer, 1).await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::Reorg(ReorgError::NotLonger { local: 3, candidate: 2 })
        ));
        assert!(peer.fetched().is_empty());
    }

    #[tokio::test]
    async fn test_reorg_rejects_foreign_genesis() {
        let local = test_chain(2, "m");
        let foreign = test_chain(5, "someone-else");
        assert!(crate::core::validate_chain(&foreign, None).is_ok());

        let peer = MockPeer::new(foreign);
        let sync = ChainSync::new(shared(&local));

        let err = sync.reorg(&peer, 4).await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::Reorg(ReorgError::InvalidChain(
                ChainValidationError::GenesisMismatch { .. }
            ))
        ));
        assert_eq!(sync.chain().read().await.blocks().unwrap(), local);
    }

    #[tokio::test]
    async fn test_sync_mempool_replaces_wholesale() {
        let sync = ChainSync::new(shared(&test_chain(1, "m")));
        let mut local = HashMap::new();
        local.insert("mine".to_string(), Transaction::coinbase("a", 1));
        sync.chain().write().await.replace_mempool(local).unwrap();

        let mut peer = MockPeer::new(vec![]);
        let theirs = Transaction::coinbase("b", 2);
        peer.pool.insert(theirs.id_hex(), theirs.clone());

        assert_eq!(sync.sync_mempool(&peer).await.unwrap(), 1);
        let chain = sync.chain().read().await;
        assert!(!chain.mempool().contains("mine"));
        assert!(chain.mempool().contains(&theirs.id_hex()));
    }

    #[tokio::test]
    async fn test_sync_with_peer_reports_each_step() {
        let remote = test_chain(2, "m");
        let sync = ChainSync::new(shared(&[]));
        let peer = MockPeer::new(remote);

        let report = sync.sync_with_peer(&peer).await;
        assert_eq!(report.peer, "mock");
        assert_eq!(
            report.chain,
            PeerSyncResult::Success(SyncOutcome::CaughtUp { from: 0, to: 1 })
        );
        assert_eq!(report.mempool, PeerSyncResult::Success(0));
        assert!(!sync.is_syncing().await);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["chain"]["status"], "success");
        assert_eq!(json["chain"]["value"]["kind"], "caught_up");

        let failed: PeerSyncResult<usize> = Err::<usize, _>("boom").into();
        assert_eq!(failed, PeerSyncResult::Failure("boom".into()));
        assert!(!failed.is_success());
    }
}
