//! CLI commands for the blockchain
//!
//! Implements all command handlers for the CLI interface.

use crate::core::{current_timestamp, Block};
use crate::network::{Node, NodeConfig};
use crate::storage::{ChainStore, StorageError};
use std::time::Instant;

/// Result type for CLI operations
pub type CliResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Run a P2P node until Ctrl+C / SIGTERM, then persist the chain
pub async fn cmd_start(config: NodeConfig) -> CliResult<()> {
    log::info!(
        "Starting P2P node on {}:{} (data: {:?})",
        config.host,
        config.port,
        config.data_path
    );

    // A corrupt chain file stops the process here
    let node = Node::new(config)?;

    let result = tokio::select! {
        r = node.start() => r,
        _ = shutdown_signal() => {
            log::info!("Shutting down node...");
            Ok(())
        }
    };

    if let Err(e) = node.shutdown().await {
        log::error!("Failed to save blockchain on exit: {}", e);
    }

    result
}

/// Resolves on Ctrl+C or, on unix, SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Mine `count` blocks carrying `data` into the chain file
pub fn cmd_mine(store: &ChainStore, difficulty: u32, data: &str, count: u32) -> CliResult<()> {
    let mut blockchain = store.load_or_default(difficulty)?;

    println!("⛏️  Mining {} block(s)", count);
    println!("   Current difficulty: {}", blockchain.difficulty);

    for _ in 0..count {
        let start = Instant::now();
        let candidate = Block::unlinked(blockchain.height() as u64, current_timestamp(), data);
        let block = blockchain.add_block(candidate).clone();
        let elapsed = start.elapsed().as_millis();

        println!("\n   Block {} mined!", block.index);
        println!("   ├─ Hash: {}", block.hash);
        println!("   ├─ Nonce: {}", block.nonce);
        println!("   └─ Time: {}ms", elapsed);

        // Save after each block
        store.save(&blockchain)?;
    }

    println!("\n⛓️  Chain height: {}", blockchain.height());

    Ok(())
}

/// Validate the blockchain file. A corrupt file is reported and returned
/// as an error so the process exits non-zero.
pub fn cmd_validate(store: &ChainStore, difficulty: u32) -> CliResult<()> {
    println!("🔍 Validating blockchain at {:?}...", store.path());

    match store.load(difficulty) {
        Ok(Some(blockchain)) => {
            println!("✅ Blockchain is valid!");
            println!("   {} blocks verified", blockchain.blocks.len());
        }
        Ok(None) => {
            println!("ℹ️  No chain file found; a new node starts from genesis.");
        }
        Err(StorageError::CorruptChain { path, source }) => {
            println!("❌ Blockchain validation FAILED!");
            println!("   {}", source);
            return Err(StorageError::CorruptChain { path, source }.into());
        }
        Err(e) => return Err(e.into()),
    }

    Ok(())
}

/// List recent blocks
pub fn cmd_chain_blocks(store: &ChainStore, difficulty: u32, count: usize) -> CliResult<()> {
    let blockchain = store.load_or_default(difficulty)?;
    let stats = blockchain.stats();

    println!("⛓️  Blockchain Info");
    println!("   ├─ Height: {}", stats.height);
    println!("   ├─ Difficulty: {}", stats.difficulty);
    println!("   └─ Latest hash: {}", stats.latest_hash);

    println!("\n🧱 Recent blocks:");
    for block in blockchain.blocks.iter().rev().take(count) {
        println!(
            "   #{} | {} | {} | {}",
            block.index, block.hash, block.timestamp, block.data
        );
    }

    Ok(())
}
