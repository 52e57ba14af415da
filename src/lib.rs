//! Gossip-Chain: a proof-of-work blockchain node with peer-to-peer chain
//! replication
//!
//! This crate provides:
//! - Hash-linked blocks with SHA-256 proof of work
//! - Chain validation and the longest-valid-chain replacement rule
//! - JSON file persistence, validated on every save and load
//! - A TCP node that discovers peers by exchanging peer lists and keeps
//!   its chain in sync with them
//!
//! # Example
//!
//! ```rust
//! use gossip_chain::core::{Block, Blockchain};
//!
//! let mut blockchain = Blockchain::with_difficulty(1);
//! blockchain.add_block(Block::unlinked(1, "2024-02-18", "{\"amount\":4}"));
//! blockchain.add_block(Block::unlinked(2, "2024-02-18", "{\"amount\":10}"));
//! assert!(blockchain.is_valid());
//!
//! blockchain.blocks[1].data = "{\"amount\":100}".to_string();
//! assert!(!blockchain.is_valid());
//! ```

pub mod cli;
pub mod core;
pub mod crypto;
pub mod network;
pub mod storage;

// Re-export commonly used types
pub use core::{Block, Blockchain, BlockchainError, DEFAULT_DIFFICULTY};
pub use network::{ChainSync, Message, Node, NodeConfig, PeerAddress, PeerManager};
pub use storage::{ChainStore, StorageError};
