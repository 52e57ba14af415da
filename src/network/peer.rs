//! Peer management for P2P networking
//!
//! Tracks connected peers by their advertised `host:port` identity and
//! routes outgoing messages to each connection's writer task.

use crate::network::message::{Message, PeerAddress};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify, RwLock};

/// Outgoing queue depth per peer
pub const PEER_QUEUE_SIZE: usize = 100;

/// Peer connection errors
#[derive(Error, Debug)]
pub enum PeerError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Peer disconnected")]
    Disconnected,
    #[error("Outgoing queue full for {0}, dropping connection")]
    QueueFull(SocketAddr),
    #[error("Refusing to connect to self: {0}")]
    SelfConnection(String),
    #[error("Peer already known: {0}")]
    AlreadyKnown(String),
    #[error("Invalid peer address: {0}")]
    InvalidAddress(String),
}

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Handle for sending messages to one open connection
#[derive(Clone, Debug)]
pub struct PeerHandle {
    /// Unique per socket, survives registration under any id
    pub conn_id: u64,
    /// Remote socket address
    pub addr: SocketAddr,
    pub tx: mpsc::Sender<Message>,
    /// Signalled when the connection should be torn down
    close: Arc<Notify>,
}

impl PeerHandle {
    pub fn new(addr: SocketAddr, tx: mpsc::Sender<Message>) -> Self {
        Self {
            conn_id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            addr,
            tx,
            close: Arc::new(Notify::new()),
        }
    }

    /// Queue a message for this connection's writer without waiting.
    ///
    /// A peer whose queue is full is not reading its socket; the
    /// connection is told to close and the message is dropped.
    pub fn send(&self, msg: Message) -> Result<(), PeerError> {
        match self.tx.try_send(msg) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.disconnect();
                Err(PeerError::QueueFull(self.addr))
            }
            Err(TrySendError::Closed(_)) => Err(PeerError::Disconnected),
        }
    }

    /// Ask the connection task to shut this socket down
    pub fn disconnect(&self) {
        self.close.notify_one();
    }

    /// Resolves once `disconnect` has been called
    pub async fn closed(&self) {
        self.close.notified().await
    }
}

/// Manages all peer connections
pub struct PeerManager {
    /// Our own listening identity, never registered
    local: PeerAddress,
    /// Registered peers
    handles: RwLock<HashMap<String, PeerHandle>>,
    /// Outbound dials in flight
    dialing: RwLock<HashSet<String>>,
}

impl PeerManager {
    pub fn new(local: PeerAddress) -> Self {
        Self {
            local,
            handles: RwLock::new(HashMap::new()),
            dialing: RwLock::new(HashSet::new()),
        }
    }

    /// Our own listening address
    pub fn local_address(&self) -> &PeerAddress {
        &self.local
    }

    /// Whether `id` names this node
    pub fn is_self(&self, id: &str) -> bool {
        id == self.local.id()
    }

    /// Register a peer. Returns false if `id` is self or already present.
    pub async fn register(&self, id: &str, handle: PeerHandle) -> bool {
        if self.is_self(id) {
            log::debug!("Not registering self: {}", id);
            return false;
        }

        let mut handles = self.handles.write().await;
        if handles.contains_key(id) {
            return false;
        }

        log::info!("Adding peer: {} ({})", id, handle.addr);
        handles.insert(id.to_string(), handle);
        true
    }

    /// Remove a peer by id
    pub async fn unregister(&self, id: &str) {
        let mut handles = self.handles.write().await;
        if handles.remove(id).is_some() {
            log::info!("Removed peer: {}", id);
        }
    }

    /// Remove every id bound to a closed connection
    pub async fn release(&self, conn_id: u64) -> Vec<String> {
        let mut handles = self.handles.write().await;
        let ids: Vec<String> = handles
            .iter()
            .filter(|(_, h)| h.conn_id == conn_id)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &ids {
            handles.remove(id);
            log::info!("Removed peer: {}", id);
        }
        ids
    }

    /// Whether a peer is registered
    pub async fn contains(&self, id: &str) -> bool {
        self.handles.read().await.contains_key(id)
    }

    /// Snapshot of registered peer ids, sorted
    pub async fn list(&self) -> Vec<String> {
        let handles = self.handles.read().await;
        let mut ids: Vec<String> = handles.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Get peer count
    pub async fn peer_count(&self) -> usize {
        self.handles.read().await.len()
    }

    /// Claim an outbound dial slot for `id`.
    ///
    /// Fails for self, for registered peers and for dials already in flight.
    pub async fn begin_dial(&self, id: &str) -> Result<(), PeerError> {
        if self.is_self(id) {
            return Err(PeerError::SelfConnection(id.to_string()));
        }
        if self.contains(id).await {
            return Err(PeerError::AlreadyKnown(id.to_string()));
        }

        let mut dialing = self.dialing.write().await;
        if !dialing.insert(id.to_string()) {
            return Err(PeerError::AlreadyKnown(id.to_string()));
        }
        Ok(())
    }

    /// Release the dial slot for `id`
    pub async fn end_dial(&self, id: &str) {
        self.dialing.write().await.remove(id);
    }

    /// Broadcast a message to all peers.
    ///
    /// A failed send to one peer is logged and does not stop delivery to
    /// the others.
    pub async fn broadcast(&self, msg: Message) {
        let targets: Vec<(String, PeerHandle)> = {
            let handles = self.handles.read().await;
            handles
                .iter()
                .map(|(id, h)| (id.clone(), h.clone()))
                .collect()
        };

        log::debug!("Broadcasting {} to {} peers", msg.type_name(), targets.len());
        for (id, handle) in targets {
            if let Err(e) = handle.send(msg.clone()) {
                log::warn!("Failed to send to {}: {}", id, e);
            }
        }
    }

    /// Send a message to a specific peer
    pub async fn send_to(&self, id: &str, msg: Message) -> Result<(), PeerError> {
        let handle = self.handles.read().await.get(id).cloned();
        match handle {
            Some(handle) => handle.send(msg),
            None => Err(PeerError::Disconnected),
        }
    }
}
