//! Cryptographic utilities for the blockchain
//!
//! This module provides SHA-256 hashing and the difficulty check used by
//! proof of work.

pub mod hash;

pub use hash::{meets_difficulty, sha256, sha256_hex};
