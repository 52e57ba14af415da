//! Blockchain implementation
//!
//! The main blockchain struct that manages the chain of blocks, including
//! the longest-chain replacement rule used during peer synchronization.

use crate::core::block::{Block, UNLINKED_PREVIOUS_HASH};
use thiserror::Error;

/// Default mining difficulty (number of leading `'0'` hex characters)
pub const DEFAULT_DIFFICULTY: u32 = 2;

/// Timestamp of the canonical genesis block
pub const GENESIS_TIMESTAMP: &str = "2024-02-18";

/// Payload of the canonical genesis block
pub const GENESIS_DATA: &str = "Genesis block";

/// Blockchain-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlockchainError {
    #[error("Chain is empty")]
    EmptyChain,
    #[error("Genesis block does not match the canonical genesis")]
    InvalidGenesis,
    #[error("Block {index} hash does not match its contents")]
    InvalidHash { index: usize },
    #[error("Block {index} does not link to the previous block")]
    BrokenLink { index: usize },
    #[error("Block at position {position} carries index {found}")]
    InvalidIndex { position: usize, found: u64 },
    #[error("Block {index} does not meet difficulty {difficulty}")]
    InsufficientWork { index: u64, difficulty: u32 },
    #[error("Block was mined on a stale tip")]
    StaleTip,
    #[error("Received chain is not longer: received {received}, local {local}")]
    NotLonger { received: usize, local: usize },
    #[error("Mining task failed: {0}")]
    Mining(String),
}

/// The main blockchain structure
#[derive(Debug, Clone)]
pub struct Blockchain {
    /// The chain of blocks, genesis first
    pub blocks: Vec<Block>,
    /// Current mining difficulty
    pub difficulty: u32,
}

impl Blockchain {
    /// Create a new blockchain with genesis block
    pub fn new() -> Self {
        Self::with_difficulty(DEFAULT_DIFFICULTY)
    }

    /// Create a blockchain with custom difficulty
    pub fn with_difficulty(difficulty: u32) -> Self {
        Self {
            blocks: vec![Self::genesis()],
            difficulty,
        }
    }

    /// Wrap an untrusted block sequence. Callers validate before use.
    pub fn from_blocks(blocks: Vec<Block>, difficulty: u32) -> Self {
        Self { blocks, difficulty }
    }

    /// The canonical genesis block shared by every node
    pub fn genesis() -> Block {
        Block::new(0, GENESIS_TIMESTAMP, GENESIS_DATA, UNLINKED_PREVIOUS_HASH)
    }

    /// Get the latest block
    pub fn latest_block(&self) -> &Block {
        self.blocks
            .last()
            .expect("Blockchain should have at least genesis block")
    }

    /// Number of blocks in the chain, genesis included
    pub fn height(&self) -> usize {
        self.blocks.len()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Build an unmined block that follows the current tip
    pub fn next_block(&self, timestamp: impl Into<String>, data: impl Into<String>) -> Block {
        let tip = self.latest_block();
        Block::new(self.blocks.len() as u64, timestamp, data, tip.hash.clone())
    }

    /// Link `block` to the tip, mine it at the current difficulty and append it.
    ///
    /// Blocks the calling thread for the whole proof-of-work search.
    pub fn add_block(&mut self, mut block: Block) -> &Block {
        block.previous_hash = self.latest_block().hash.clone();
        block.mine(self.difficulty);
        self.blocks.push(block);
        self.latest_block()
    }

    /// Append a block that was mined outside the chain's lock
    pub fn append_mined(&mut self, block: Block) -> Result<(), BlockchainError> {
        if block.previous_hash != self.latest_block().hash {
            return Err(BlockchainError::StaleTip);
        }

        if block.index != self.blocks.len() as u64 {
            return Err(BlockchainError::InvalidIndex {
                position: self.blocks.len(),
                found: block.index,
            });
        }

        if !block.verify_hash() {
            return Err(BlockchainError::InvalidHash {
                index: self.blocks.len(),
            });
        }

        if !block.meets_difficulty(self.difficulty) {
            return Err(BlockchainError::InsufficientWork {
                index: block.index,
                difficulty: self.difficulty,
            });
        }

        self.blocks.push(block);
        Ok(())
    }

    /// Validate an arbitrary block sequence.
    ///
    /// Genesis must carry the canonical content. Its stored hash is taken
    /// as the anchor for block 1 and is not recomputed, since older nodes
    /// hashed genesis before its nonce was set. Every later block must sit
    /// at its own index, hash to its contents and point at its
    /// predecessor's hash.
    pub fn validate_blocks(blocks: &[Block]) -> Result<(), BlockchainError> {
        let genesis = blocks.first().ok_or(BlockchainError::EmptyChain)?;
        if !Self::is_canonical_genesis(genesis) {
            return Err(BlockchainError::InvalidGenesis);
        }

        for (i, pair) in blocks.windows(2).enumerate() {
            let (previous, current) = (&pair[0], &pair[1]);
            let index = i + 1;

            if current.index != index as u64 {
                return Err(BlockchainError::InvalidIndex {
                    position: index,
                    found: current.index,
                });
            }

            if !current.verify_hash() {
                return Err(BlockchainError::InvalidHash { index });
            }

            if current.previous_hash != previous.hash {
                return Err(BlockchainError::BrokenLink { index });
            }
        }

        Ok(())
    }

    /// Genesis content check, hash and nonce excluded
    fn is_canonical_genesis(block: &Block) -> bool {
        block.index == 0
            && block.timestamp == GENESIS_TIMESTAMP
            && block.data == GENESIS_DATA
            && block.previous_hash == UNLINKED_PREVIOUS_HASH
    }

    /// Check an arbitrary block sequence
    pub fn is_chain_valid(blocks: &[Block]) -> bool {
        Self::validate_blocks(blocks).is_ok()
    }

    /// Validate the local chain
    pub fn validate(&self) -> Result<(), BlockchainError> {
        Self::validate_blocks(&self.blocks)
    }

    /// Check the local chain
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Replace the local blocks with `candidate` if it is strictly longer
    /// and fully valid. Equal length keeps the local chain.
    pub fn replace_chain(&mut self, candidate: Vec<Block>) -> Result<(), BlockchainError> {
        if candidate.len() <= self.blocks.len() {
            return Err(BlockchainError::NotLonger {
                received: candidate.len(),
                local: self.blocks.len(),
            });
        }

        Self::validate_blocks(&candidate)?;
        self.blocks = candidate;
        Ok(())
    }

    /// Get chain statistics
    pub fn stats(&self) -> ChainStats {
        ChainStats {
            height: self.height(),
            difficulty: self.difficulty,
            latest_hash: self.latest_block().hash.clone(),
        }
    }
}

impl Default for Blockchain {
    fn default() -> Self {
        Self::new()
    }
}

/// Chain statistics
#[derive(Debug, Clone)]
pub struct ChainStats {
    pub height: usize,
    pub difficulty: u32,
    pub latest_hash: String,
}
