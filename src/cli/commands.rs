//! CLI commands for the node
//!
//! Every command works on one node's data directory (`<data_dir>/<node>`).

use crate::core::{Block, ChainManager, Miner};
use crate::network::{Node, NodeConfig};
use crate::storage::FileStore;
use crate::wallet::Wallet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Result type for CLI operations
pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Application state
pub struct AppState {
    pub chain: ChainManager,
    pub data_dir: PathBuf,
    pub node_id: String,
}

impl AppState {
    /// Open the node's file store
    pub fn open(data_dir: &Path, node_id: &str) -> CliResult<Self> {
        let store = FileStore::new(data_dir, node_id)?;
        let chain = ChainManager::new(node_id, Box::new(store))?;
        Ok(Self {
            chain,
            data_dir: data_dir.to_path_buf(),
            node_id: node_id.to_string(),
        })
    }

    /// Explicit wallet path, or the node's default one
    pub fn wallet_path(&self, explicit: Option<&Path>) -> PathBuf {
        explicit
            .map(Path::to_path_buf)
            .unwrap_or_else(|| Wallet::default_path(&self.data_dir, &self.node_id))
    }
}

/// Write the fixed genesis block unless the chain already exists
pub fn cmd_init(state: &mut AppState) -> CliResult<()> {
    if !state.chain.init_genesis()? {
        let height = state.chain.status_height()?;
        println!("⚠️  Chain already exists (height {}), skipping genesis", height);
        return Ok(());
    }
    state.chain.clear_mempool()?;

    let genesis_hash = state
        .chain
        .genesis_hash()?
        .map(hex::encode)
        .unwrap_or_default();
    println!("✅ Chain initialized!");
    println!("   📁 Node: {}", state.node_id);
    println!("   🧱 Genesis block hash: {}", genesis_hash);
    Ok(())
}

/// Print (creating if needed) the wallet address
pub fn cmd_address(state: &AppState, wallet: Option<&Path>) -> CliResult<String> {
    let wallet = Wallet::load_or_create(&state.wallet_path(wallet))?;
    let address = wallet.address();
    println!("{}", address);
    Ok(address)
}

/// Build a signed transfer from the wallet and add it to the local mempool
pub fn cmd_tx(
    state: &mut AppState,
    wallet: Option<&Path>,
    to: &str,
    value: i64,
) -> CliResult<String> {
    if state.chain.tip()?.is_none() {
        return Err("chain does not exist, run `init` first".into());
    }

    let wallet = Wallet::load_or_create(&state.wallet_path(wallet))?;
    let utxos = state.chain.utxo_set()?;
    let tx = wallet.build_transfer(&utxos, to, value)?;
    let id = state.chain.submit_transaction(tx)?;

    println!("📤 Transaction added to mempool");
    println!("   ID: {}", id);
    println!("   To: {}", to);
    println!("   Value: {}", value);
    println!("   Pending: {}", state.chain.mempool().len());
    Ok(id)
}

/// Mine one block from the mempool and commit it
pub fn cmd_mine(
    state: &mut AppState,
    miner_address: &str,
    difficulty: u32,
    reward: i64,
    timeout: Option<Duration>,
) -> CliResult<Block> {
    let mut miner = Miner::new();
    if let Some(timeout) = timeout {
        miner = miner.with_timeout(timeout);
    }

    println!("⛏️  Mining for {} at difficulty {}", miner_address, difficulty);
    let (block, stats) = state
        .chain
        .mine_block(&miner, miner_address, difficulty, reward)?;

    println!("\n   Block {} mined!", block.height());
    println!("   ├─ Hash: {}", block.header.hash_hex());
    println!("   ├─ Transactions: {}", block.transactions.len());
    println!("   ├─ Time: {}ms", stats.time_ms);
    println!("   ├─ Attempts: {}", stats.hash_attempts);
    println!("   └─ Hash rate: {:.2} H/s", stats.hash_rate);
    Ok(block)
}

/// Run the HTTP node until Ctrl-C
pub async fn cmd_serve(config: NodeConfig) -> CliResult<()> {
    let node = Node::open(config)?;

    let token = node.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\n📴 Shutting down node...");
        }
        token.cancel();
    });

    node.run().await?;
    Ok(())
}

/// Accept `host:port` or a bare `:port` (all interfaces)
pub fn parse_listen_addr(raw: &str) -> Result<SocketAddr, String> {
    let raw = raw.trim();
    if let Some(port) = raw.strip_prefix(':') {
        let port: u16 = port
            .parse()
            .map_err(|_| format!("invalid port in {:?}", raw))?;
        return Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port));
    }
    raw.parse()
        .map_err(|e| format!("invalid listen address {:?}: {}", raw, e))
}
