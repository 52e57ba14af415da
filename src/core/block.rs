//! Block implementation for the blockchain
//!
//! A block carries an opaque payload, links to its predecessor by hash and
//! embeds a proof-of-work nonce.

use crate::crypto::{meets_difficulty, sha256_hex};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Previous-hash value carried by a block that is not linked to anything yet
pub const UNLINKED_PREVIOUS_HASH: &str = "0";

/// Timestamp string for newly created blocks
pub fn current_timestamp() -> String {
    Utc::now().to_rfc3339()
}

/// A block in the blockchain
///
/// Field order matches the persisted and wire JSON layout:
/// `index, timestamp, data, previousHash, hash, nonce`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    /// Position in the chain
    pub index: u64,
    /// Creation timestamp, kept as an opaque string
    pub timestamp: String,
    /// Opaque payload
    pub data: String,
    /// Hash of the previous block (`"0"` for genesis)
    pub previous_hash: String,
    /// Content hash of this block, nonce included
    pub hash: String,
    /// Proof-of-work counter
    pub nonce: u64,
}

impl Block {
    /// Create a new block (unmined)
    pub fn new(
        index: u64,
        timestamp: impl Into<String>,
        data: impl Into<String>,
        previous_hash: impl Into<String>,
    ) -> Self {
        let mut block = Self {
            index,
            timestamp: timestamp.into(),
            data: data.into(),
            previous_hash: previous_hash.into(),
            hash: String::new(),
            nonce: 0,
        };
        block.hash = block.calculate_hash();
        block
    }

    /// Create a block whose previous hash is still the `"0"` placeholder.
    /// `Blockchain::add_block` fills in the real link before mining.
    pub fn unlinked(index: u64, timestamp: impl Into<String>, data: impl Into<String>) -> Self {
        Self::new(index, timestamp, data, UNLINKED_PREVIOUS_HASH)
    }

    /// Calculate the hash of the block contents.
    ///
    /// SHA-256 over `index ++ previous_hash ++ timestamp ++ data ++ nonce`,
    /// numbers in decimal, no separators. Peers on other implementations
    /// rely on this exact layout.
    pub fn calculate_hash(&self) -> String {
        let preimage = format!(
            "{}{}{}{}{}",
            self.index, self.previous_hash, self.timestamp, self.data, self.nonce
        );
        sha256_hex(preimage.as_bytes())
    }

    /// Mine the block (find a nonce whose hash meets `difficulty`).
    ///
    /// There is no upper bound on the search, so very high difficulties
    /// never return. Returns the number of hashes tried.
    pub fn mine(&mut self, difficulty: u32) -> u64 {
        let mut attempts = 0u64;

        while !meets_difficulty(&self.hash, difficulty) {
            self.nonce += 1;
            self.hash = self.calculate_hash();
            attempts += 1;
        }

        log::info!("Block mined: {}", self.hash);
        attempts
    }

    /// Check if the proof of work is valid for the given difficulty
    pub fn meets_difficulty(&self, difficulty: u32) -> bool {
        meets_difficulty(&self.hash, difficulty)
    }

    /// Verify the stored hash against the block contents
    pub fn verify_hash(&self) -> bool {
        self.hash == self.calculate_hash()
    }
}
