//! Ledger node CLI application
//!
//! Initialise a chain, build transactions, mine locally, or run the HTTP node.

use clap::{Parser, Subcommand};
use ledger_node::cli::{self, AppState};
use ledger_node::network::NodeConfig;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "ledger-node")]
#[command(version)]
#[command(about = "A minimal proof-of-work UTXO ledger node", long_about = None)]
struct Cli {
    /// Root data directory
    #[arg(long, global = true, default_value = "./data")]
    data_dir: PathBuf,

    /// Node identifier; isolates the node's data under <data-dir>/<node>
    #[arg(long, global = true, default_value = "node1")]
    node: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the fixed genesis block if the chain is empty
    Init,

    /// Print the wallet address, creating the wallet if needed
    Address {
        /// Wallet file (default: <data-dir>/<node>/wallet.json)
        #[arg(long)]
        wallet: Option<PathBuf>,
    },

    /// Build a signed transfer and add it to the local mempool
    Tx {
        /// Recipient locking script
        #[arg(long)]
        to: String,

        /// Amount to send
        #[arg(long, default_value_t = 10)]
        value: i64,

        /// Wallet file (default: <data-dir>/<node>/wallet.json)
        #[arg(long)]
        wallet: Option<PathBuf>,
    },

    /// Mine one block locally
    Mine {
        /// Coinbase recipient
        #[arg(long, default_value = "miner")]
        miner: String,

        /// Leading zero bits required
        #[arg(long, default_value_t = 12)]
        difficulty: u32,

        /// Coinbase reward
        #[arg(long, default_value_t = 50)]
        reward: i64,

        /// Give up after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Run the HTTP node with background peer sync
    Serve {
        /// Listen address (`host:port` or `:port`)
        #[arg(long, default_value = "127.0.0.1:8080", value_parser = cli::parse_listen_addr)]
        addr: SocketAddr,

        /// Comma-separated peer URLs
        #[arg(long, value_delimiter = ',')]
        peers: Vec<String>,

        /// Seconds between sync rounds
        #[arg(long, default_value_t = 5)]
        sync_interval: u64,

        /// Per-request peer timeout in seconds
        #[arg(long, default_value_t = 5)]
        peer_timeout: u64,

        /// Seconds before a /mine request gives up
        #[arg(long, default_value_t = 120)]
        mining_timeout: u64,

        /// Default difficulty for /mine
        #[arg(long, default_value_t = 12)]
        difficulty: u32,

        /// Default reward for /mine
        #[arg(long, default_value_t = 50)]
        reward: i64,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Cli {
        data_dir,
        node,
        command,
    } = Cli::parse();
    let open = || AppState::open(&data_dir, &node);

    match command {
        // Serve needs a runtime and opens the store itself
        Commands::Serve {
            addr,
            peers,
            sync_interval,
            peer_timeout,
            mining_timeout,
            difficulty,
            reward,
        } => {
            let config = NodeConfig {
                node_id: node.clone(),
                data_dir: data_dir.clone(),
                listen_addr: addr,
                peers: peers
                    .into_iter()
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect(),
                sync_interval: Duration::from_secs(sync_interval),
                peer_timeout: Duration::from_secs(peer_timeout),
                mining_timeout: Duration::from_secs(mining_timeout),
                difficulty,
                reward,
            };

            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(cli::cmd_serve(config))?;
        }

        Commands::Init => {
            cli::cmd_init(&mut open()?)?;
        }

        Commands::Address { wallet } => {
            cli::cmd_address(&open()?, wallet.as_deref())?;
        }

        Commands::Tx { to, value, wallet } => {
            cli::cmd_tx(&mut open()?, wallet.as_deref(), &to, value)?;
        }

        Commands::Mine {
            miner,
            difficulty,
            reward,
            timeout,
        } => {
            cli::cmd_mine(
                &mut open()?,
                &miner,
                difficulty,
                reward,
                timeout.map(Duration::from_secs),
            )?;
        }
    }

    Ok(())
}
