//! Chain synchronization with peers
//!
//! Owns the shared chain and its store. Every mutation (peer chain
//! adoption or a locally mined block) happens under the chain's write
//! lock and is persisted before the lock is released.

use crate::core::{current_timestamp, Block, Blockchain, BlockchainError, ChainStats};
use crate::storage::{ChainStore, StorageError};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Result of applying a peer's chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Received chain replaced the local one
    Adopted { height: usize },
    /// Local chain kept
    Discarded(BlockchainError),
}

/// Chain synchronization manager
pub struct ChainSync {
    blockchain: Arc<RwLock<Blockchain>>,
    store: Arc<ChainStore>,
}

impl ChainSync {
    pub fn new(blockchain: Arc<RwLock<Blockchain>>, store: Arc<ChainStore>) -> Self {
        Self { blockchain, store }
    }

    pub fn store(&self) -> &ChainStore {
        &self.store
    }

    /// Copy of the local blocks, for `blockchain_response`
    pub async fn chain_snapshot(&self) -> Vec<Block> {
        self.blockchain.read().await.blocks.clone()
    }

    pub async fn height(&self) -> usize {
        self.blockchain.read().await.height()
    }

    pub async fn stats(&self) -> ChainStats {
        self.blockchain.read().await.stats()
    }

    /// Apply the longest-chain rule to a chain received from a peer.
    ///
    /// Validation, replacement and persistence run as one critical section.
    pub async fn handle_blockchain_response(&self, blocks: Vec<Block>) -> SyncOutcome {
        let mut chain = self.blockchain.write().await;

        match chain.replace_chain(blocks) {
            Ok(()) => {
                log::info!(
                    "Received blockchain is longer and valid. \
                     Replacing current blockchain (height {})",
                    chain.height()
                );
                if let Err(e) = self.store.save(&chain) {
                    log::error!("Failed to save blockchain: {}", e);
                }
                SyncOutcome::Adopted {
                    height: chain.height(),
                }
            }
            Err(e) => {
                log::info!(
                    "Received blockchain is not longer or invalid, keeping local chain: {}",
                    e
                );
                SyncOutcome::Discarded(e)
            }
        }
    }

    /// Mine a block carrying `data` on top of the current tip.
    ///
    /// The nonce search runs on the blocking pool without holding the lock.
    /// If the tip moved meanwhile (a peer chain was adopted), the block is
    /// rebuilt on the new tip and mined again.
    pub async fn mine_block(&self, data: impl Into<String>) -> Result<Block, BlockchainError> {
        let data = data.into();

        loop {
            let (mut candidate, difficulty) = {
                let chain = self.blockchain.read().await;
                (
                    chain.next_block(current_timestamp(), data.clone()),
                    chain.difficulty,
                )
            };

            log::info!(
                "Mining block {} with difficulty {}...",
                candidate.index,
                difficulty
            );

            let mined = tokio::task::spawn_blocking(move || {
                candidate.mine(difficulty);
                candidate
            })
            .await
            .map_err(|e| BlockchainError::Mining(e.to_string()))?;

            let mut chain = self.blockchain.write().await;
            match chain.append_mined(mined.clone()) {
                Ok(()) => {
                    if let Err(e) = self.store.save(&chain) {
                        log::error!("Failed to save blockchain: {}", e);
                    }
                    return Ok(mined);
                }
                Err(BlockchainError::StaleTip) => {
                    log::info!("Chain tip moved while mining block {}, retrying", mined.index);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Persist the current chain (shutdown path)
    pub async fn flush(&self) -> Result<(), StorageError> {
        let chain = self.blockchain.read().await;
        self.store.save(&chain)?;
        log::info!("Blockchain saved to {:?}", self.store.path());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain_of(len: u64) -> Blockchain {
        let mut blockchain = Blockchain::with_difficulty(1);
        for i in 1..len {
            blockchain.add_block(Block::unlinked(i, "2024-02-18", format!("block {}", i)));
        }
        blockchain
    }

    fn sync_with(local: Blockchain, dir: &tempfile::TempDir) -> ChainSync {
        let store = Arc::new(ChainStore::new(dir.path().join("chain.json")));
        ChainSync::new(Arc::new(RwLock::new(local)), store)
    }

    #[tokio::test]
    async fn test_adopts_longer_valid_chain() {
        let dir = tempfile::tempdir().unwrap();
        let sync = sync_with(chain_of(3), &dir);
        let remote = chain_of(5);

        let outcome = sync.handle_blockchain_response(remote.blocks.clone()).await;

        assert_eq!(outcome, SyncOutcome::Adopted { height: 5 });
        assert_eq!(sync.chain_snapshot().await, remote.blocks);

        // Adoption is persisted
        let persisted = sync.store().load(1).unwrap().unwrap();
        assert_eq!(persisted.blocks, remote.blocks);
    }

    #[tokio::test]
    async fn test_keeps_local_on_equal_length() {
        let dir = tempfile::tempdir().unwrap();
        let local = chain_of(3);
        let sync = sync_with(local.clone(), &dir);

        let mut remote = Blockchain::with_difficulty(1);
        remote.add_block(Block::unlinked(1, "2024-02-19", "fork a"));
        remote.add_block(Block::unlinked(2, "2024-02-19", "fork b"));

        let outcome = sync.handle_blockchain_response(remote.blocks).await;

        assert!(matches!(
            outcome,
            SyncOutcome::Discarded(BlockchainError::NotLonger { .. })
        ));
        assert_eq!(sync.chain_snapshot().await, local.blocks);
        assert!(!sync.store().exists());
    }

    #[tokio::test]
    async fn test_keeps_local_on_tampered_chain() {
        let dir = tempfile::tempdir().unwrap();
        let local = chain_of(3);
        let sync = sync_with(local.clone(), &dir);

        let mut remote = chain_of(5);
        remote.blocks[2].data = "tampered".to_string();

        let outcome = sync.handle_blockchain_response(remote.blocks).await;

        assert!(matches!(outcome, SyncOutcome::Discarded(_)));
        assert_eq!(sync.chain_snapshot().await, local.blocks);
    }

    #[tokio::test]
    async fn test_mine_block_appends_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let sync = sync_with(Blockchain::with_difficulty(1), &dir);

        let block = sync.mine_block("{\"amount\":4}").await.unwrap();

        assert_eq!(block.index, 1);
        assert!(block.hash.starts_with('0'));
        assert_eq!(sync.height().await, 2);
        assert_eq!(sync.store().load(1).unwrap().unwrap().height(), 2);
    }

    #[tokio::test]
    async fn test_flush_writes_current_chain() {
        let dir = tempfile::tempdir().unwrap();
        let sync = sync_with(chain_of(4), &dir);

        sync.flush().await.unwrap();
        assert_eq!(sync.store().load(1).unwrap().unwrap().height(), 4);
    }
}
