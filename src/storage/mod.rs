//! Storage module for blockchain persistence

pub mod persistence;

pub use persistence::{ChainStore, StorageError, DEFAULT_CHAIN_FILE};
