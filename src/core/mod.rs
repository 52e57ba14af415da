//! Core blockchain components
//!
//! This module contains the fundamental building blocks:
//! - Blocks (hash-linked, with proof of work)
//! - Blockchain (append, validation, longest-chain replacement)

pub mod block;
pub mod blockchain;

pub use block::{current_timestamp, Block, UNLINKED_PREVIOUS_HASH};
pub use blockchain::{
    Blockchain, BlockchainError, ChainStats, DEFAULT_DIFFICULTY, GENESIS_DATA, GENESIS_TIMESTAMP,
};
