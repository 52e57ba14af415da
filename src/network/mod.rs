//! P2P Networking module
//!
//! Provides peer-to-peer networking for chain replication.
//!
//! # Features
//! - TCP connections with newline-delimited JSON framing
//! - Peer discovery through peer-list exchange
//! - Full-chain synchronization with the longest-chain rule
//! - Keep-alive broadcasts

pub mod message;
pub mod node;
pub mod peer;
pub mod server;
pub mod sync;

pub use message::{Message, MessageError, PeerAddress, MAX_MESSAGE_SIZE, MESSAGE_DELIMITER};
pub use node::{
    Node, NodeConfig, NodeStatus, DEFAULT_HOST, DEFAULT_PORT, KEEP_ALIVE_INTERVAL, STATUS_INTERVAL,
};
pub use peer::{PeerError, PeerHandle, PeerManager, PEER_QUEUE_SIZE};
pub use server::{connect_to_peer, handle_connection, Connector, MessageCodec, Server};
pub use sync::{ChainSync, SyncOutcome};
