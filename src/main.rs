//! Gossip-Chain CLI Application
//!
//! Runs a P2P node or works on the local chain file.

use clap::{Parser, Subcommand};
use gossip_chain::cli;
use gossip_chain::network::{NodeConfig, DEFAULT_HOST, DEFAULT_PORT};
use gossip_chain::storage::{ChainStore, DEFAULT_CHAIN_FILE};
use gossip_chain::DEFAULT_DIFFICULTY;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "gossip-chain")]
#[command(version)]
#[command(
    about = "A proof-of-work blockchain node with gossip-style chain replication",
    long_about = None
)]
struct Cli {
    /// Path of the blockchain data file
    #[arg(short, long, global = true, default_value = DEFAULT_CHAIN_FILE)]
    data_path: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the P2P node
    Start {
        /// Host to listen on for P2P connections
        #[arg(long, default_value = DEFAULT_HOST)]
        host: String,

        /// Port to listen on for P2P connections
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Seed peers to connect to (host:port, comma-separated)
        #[arg(long, value_delimiter = ',', default_value = "localhost:12315")]
        peers: Vec<String>,
    },

    /// Mine new blocks into the data file
    Mine {
        /// Block payload
        #[arg(long)]
        data: String,

        /// Number of blocks to mine
        #[arg(short, long, default_value = "1")]
        count: u32,
    },

    /// Validate the blockchain
    Validate,

    /// Display blockchain information
    Chain {
        /// Number of blocks to show
        #[arg(short, long, default_value = "10")]
        count: usize,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let store = ChainStore::new(cli.data_path.clone());

    match cli.command {
        Commands::Start { host, port, peers } => {
            let config = NodeConfig {
                host,
                port,
                seed_peers: peers
                    .into_iter()
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect(),
                data_path: cli.data_path,
                ..Default::default()
            };

            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(cli::cmd_start(config))?;
        }

        Commands::Mine { data, count } => {
            cli::cmd_mine(&store, DEFAULT_DIFFICULTY, &data, count)?;
        }

        Commands::Validate => {
            cli::cmd_validate(&store, DEFAULT_DIFFICULTY)?;
        }

        Commands::Chain { count } => {
            cli::cmd_chain_blocks(&store, DEFAULT_DIFFICULTY, count)?;
        }
    }

    Ok(())
}
