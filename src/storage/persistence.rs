//! Blockchain persistence layer
//!
//! The chain is stored as a pretty-printed JSON array of blocks. Writes
//! validate first and go through a temporary file plus rename; reads are
//! validated again before the node is allowed to use them.

use crate::core::{Block, Blockchain, BlockchainError};
use std::fs;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default chain file name
pub const DEFAULT_CHAIN_FILE: &str = "blockchain.json";

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Refusing to save invalid chain: {0}")]
    InvalidChain(BlockchainError),
    #[error("Chain loaded from {path:?} is invalid: {source}")]
    CorruptChain {
        path: PathBuf,
        source: BlockchainError,
    },
}

/// File-backed chain store
#[derive(Debug, Clone)]
pub struct ChainStore {
    path: PathBuf,
}

impl ChainStore {
    /// Create a store for the given chain file
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the chain file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if a saved chain exists
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| DEFAULT_CHAIN_FILE.into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Save the chain to disk, overwriting the previous content.
    ///
    /// An invalid chain is never written.
    pub fn save(&self, blockchain: &Blockchain) -> Result<(), StorageError> {
        blockchain.validate().map_err(StorageError::InvalidChain)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        // Write to temporary file first
        let temp_path = self.temp_path();
        {
            let file = fs::File::create(&temp_path)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, &blockchain.blocks)?;
            writer.flush()?;
        }

        // Atomic rename
        fs::rename(&temp_path, &self.path)?;

        log::debug!(
            "Saved {} blocks to {:?}",
            blockchain.blocks.len(),
            self.path
        );
        Ok(())
    }

    /// Load the chain from disk.
    ///
    /// Returns `Ok(None)` when no file exists. Hashes and nonces are taken
    /// verbatim from the file and re-verified; a chain that fails
    /// validation is reported as `CorruptChain`.
    pub fn load(&self, difficulty: u32) -> Result<Option<Blockchain>, StorageError> {
        if !self.exists() {
            return Ok(None);
        }

        let file = fs::File::open(&self.path)?;
        let reader = BufReader::new(file);
        let blocks: Vec<Block> = serde_json::from_reader(reader)?;

        let blockchain = Blockchain::from_blocks(blocks, difficulty);
        blockchain
            .validate()
            .map_err(|source| StorageError::CorruptChain {
                path: self.path.clone(),
                source,
            })?;

        log::info!(
            "Loaded {} blocks from {:?}",
            blockchain.blocks.len(),
            self.path
        );
        Ok(Some(blockchain))
    }

    /// Load the saved chain, or start from genesis if there is none
    pub fn load_or_default(&self, difficulty: u32) -> Result<Blockchain, StorageError> {
        match self.load(difficulty)? {
            Some(blockchain) => Ok(blockchain),
            None => {
                log::info!("No chain file at {:?}, starting from genesis", self.path);
                Ok(Blockchain::with_difficulty(difficulty))
            }
        }
    }

    /// Delete the saved chain
    pub fn delete(&self) -> Result<(), StorageError> {
        if self.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

impl Default for ChainStore {
    fn default() -> Self {
        Self::new(DEFAULT_CHAIN_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mined_chain(extra: u64) -> Blockchain {
        let mut blockchain = Blockchain::with_difficulty(1);
        for i in 1..=extra {
            blockchain.add_block(Block::unlinked(i, "2024-02-18", format!("{{\"amount\":{}}}", i)));
        }
        blockchain
    }

    #[test]
    fn test_save_load_blockchain() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = ChainStore::new(temp_dir.path().join("chain.json"));
        let blockchain = mined_chain(3);

        // Save
        store.save(&blockchain).unwrap();
        assert!(store.exists());

        // Load
        let loaded = store.load(1).unwrap().unwrap();
        assert_eq!(loaded.blocks, blockchain.blocks);
        assert!(loaded.is_valid());
    }

    #[test]
    fn test_missing_file_falls_back_to_genesis() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = ChainStore::new(temp_dir.path().join("absent.json"));

        assert!(store.load(2).unwrap().is_none());
        let blockchain = store.load_or_default(2).unwrap();
        assert_eq!(blockchain.height(), 1);
        assert_eq!(blockchain.blocks[0], Blockchain::genesis());
    }

    #[test]
    fn test_invalid_chain_not_saved() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = ChainStore::new(temp_dir.path().join("chain.json"));

        let good = mined_chain(1);
        store.save(&good).unwrap();

        let mut bad = mined_chain(2);
        bad.blocks[1].data = "tampered".to_string();
        assert!(matches!(
            store.save(&bad),
            Err(StorageError::InvalidChain(_))
        ));

        // Previous content is untouched
        let loaded = store.load(1).unwrap().unwrap();
        assert_eq!(loaded.blocks, good.blocks);
    }

    #[test]
    fn test_tampered_file_is_corrupt() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("chain.json");
        let store = ChainStore::new(&path);
        store.save(&mined_chain(2)).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let mut blocks: Vec<serde_json::Value> = serde_json::from_str(&content).unwrap();
        blocks[1]["data"] = serde_json::Value::String("{\"amount\":100}".to_string());
        fs::write(&path, serde_json::to_string(&blocks).unwrap()).unwrap();

        assert!(matches!(
            store.load(1),
            Err(StorageError::CorruptChain { .. })
        ));
    }

    #[test]
    fn test_persisted_field_names() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("chain.json");
        ChainStore::new(&path).save(&mined_chain(1)).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let blocks: Vec<serde_json::Value> = serde_json::from_str(&content).unwrap();
        assert_eq!(blocks.len(), 2);
        for key in ["index", "timestamp", "data", "previousHash", "hash", "nonce"] {
            assert!(blocks[1].get(key).is_some(), "missing {}", key);
        }
    }

    #[test]
    fn test_overwrite_replaces_content() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = ChainStore::new(temp_dir.path().join("nested/dir/chain.json"));

        store.save(&mined_chain(3)).unwrap();
        store.save(&mined_chain(1)).unwrap();

        assert_eq!(store.load(1).unwrap().unwrap().height(), 2);
        store.delete().unwrap();
        assert!(!store.exists());
    }
}
