//! P2P Node implementation
//!
//! The main node that orchestrates all networking components: it binds the
//! listener, dials seed peers, dispatches inbound messages and runs the
//! keep-alive and status timers.

use crate::core::{Block, BlockchainError, DEFAULT_DIFFICULTY};
use crate::network::message::{Message, PeerAddress};
use crate::network::peer::{PeerHandle, PeerManager};
use crate::network::server::{Connector, Server};
use crate::network::sync::ChainSync;
use crate::storage::{ChainStore, StorageError, DEFAULT_CHAIN_FILE};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify, RwLock};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Default P2P port
pub const DEFAULT_PORT: u16 = 12315;

/// Default listen host
pub const DEFAULT_HOST: &str = "localhost";

/// Keep-alive broadcast period
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(60);

/// Peer list / chain height log period
pub const STATUS_INTERVAL: Duration = Duration::from_secs(5);

/// Depth of the inbound dispatch queue
const MESSAGE_QUEUE_SIZE: usize = 1000;

/// P2P Node configuration
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Host to listen on (also the host advertised to peers)
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Seed peers (`host:port`) dialed at start-up
    pub seed_peers: Vec<String>,
    /// Chain file
    pub data_path: PathBuf,
    /// Mining difficulty for local blocks
    pub difficulty: u32,
    pub keep_alive_interval: Duration,
    pub status_interval: Duration,
}

impl NodeConfig {
    /// Identity this node registers under on its peers
    pub fn local_address(&self) -> PeerAddress {
        PeerAddress::new(self.host.clone(), self.port)
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            seed_peers: vec![format!("{}:{}", DEFAULT_HOST, DEFAULT_PORT)],
            data_path: PathBuf::from(DEFAULT_CHAIN_FILE),
            difficulty: DEFAULT_DIFFICULTY,
            keep_alive_interval: KEEP_ALIVE_INTERVAL,
            status_interval: STATUS_INTERVAL,
        }
    }
}

/// The main P2P node
pub struct Node {
    pub config: NodeConfig,
    pub peer_manager: Arc<PeerManager>,
    pub chain_sync: Arc<ChainSync>,
    shutdown: Notify,
}

impl Node {
    /// Create a new node, loading the chain from `config.data_path`.
    ///
    /// A chain file that fails validation is an error; the caller must not
    /// keep running on it.
    pub fn new(config: NodeConfig) -> Result<Self, StorageError> {
        let store = Arc::new(ChainStore::new(config.data_path.clone()));
        let blockchain = Arc::new(RwLock::new(store.load_or_default(config.difficulty)?));

        let peer_manager = Arc::new(PeerManager::new(config.local_address()));
        let chain_sync = Arc::new(ChainSync::new(blockchain, store));

        Ok(Self {
            config,
            peer_manager,
            chain_sync,
            shutdown: Notify::new(),
        })
    }

    /// Get the peer manager
    pub fn peer_manager(&self) -> Arc<PeerManager> {
        self.peer_manager.clone()
    }

    /// Start the node and run until `shutdown` is called.
    ///
    /// Failing to bind is returned as an error; everything after that is
    /// contained to the connection it happens on.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let server = Server::bind(&self.config.host, self.config.port).await?;

        let (message_tx, mut message_rx) =
            mpsc::channel::<(PeerHandle, Message)>(MESSAGE_QUEUE_SIZE);
        let connector = Connector::new(self.peer_manager.clone(), message_tx);

        // Spawn connection acceptor
        let acceptor = connector.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                match server.accept().await {
                    Ok((stream, addr)) => acceptor.spawn_inbound(stream, addr),
                    Err(e) => log::error!("Accept error: {}", e),
                }
            }
        });

        self.connect_to_seed_peers(&connector);

        let mut keep_alive = interval_at(
            Instant::now() + self.config.keep_alive_interval,
            self.config.keep_alive_interval,
        );
        keep_alive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut status = interval_at(
            Instant::now() + self.config.status_interval,
            self.config.status_interval,
        );
        status.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Message handling loop
        loop {
            tokio::select! {
                Some((from, msg)) = message_rx.recv() => {
                    self.handle_message(&connector, from, msg).await;
                }
                _ = keep_alive.tick() => {
                    log::debug!("Keeping the program alive");
                    self.peer_manager.broadcast(Message::KeepAlive).await;
                }
                _ = status.tick() => {
                    self.log_status().await;
                }
                _ = self.shutdown.notified() => {
                    log::info!("Node shutting down...");
                    break;
                }
            }
        }

        accept_task.abort();
        Ok(())
    }

    /// Dial every configured seed peer except ourselves
    fn connect_to_seed_peers(&self, connector: &Connector) {
        for seed in &self.config.seed_peers {
            if self.peer_manager.is_self(seed.trim()) {
                log::debug!("Skipping self in seed peers: {}", seed);
                continue;
            }
            connector.spawn_dial(seed);
        }
    }

    /// Handle incoming messages
    async fn handle_message(&self, connector: &Connector, from: PeerHandle, msg: Message) {
        log::debug!("Received {} from {}", msg.type_name(), from.addr);

        match msg {
            Message::BlockchainRequest => {
                let blocks = self.chain_sync.chain_snapshot().await;
                if let Err(e) = from.send(Message::BlockchainResponse(blocks)) {
                    log::warn!("Failed to send blockchain to {}: {}", from.addr, e);
                }
            }

            Message::BlockchainResponse(blocks) => {
                self.chain_sync.handle_blockchain_response(blocks).await;
            }

            Message::PeersRequest(requester) => {
                self.peer_manager.register(&requester.id(), from.clone()).await;
                let peers = self.peer_manager.list().await;
                if let Err(e) = from.send(Message::PeersResponse(peers)) {
                    log::warn!("Failed to send peers to {}: {}", from.addr, e);
                }
            }

            Message::PeersResponse(peers) => {
                log::debug!("Received peers response: {:?}", peers);
                for id in peers {
                    if self.peer_manager.is_self(&id) || self.peer_manager.contains(&id).await {
                        continue;
                    }
                    connector.spawn_dial(&id);
                }
            }

            Message::KeepAlive => {
                log::debug!("Received keep alive message from {}", from.addr);
            }
        }
    }

    async fn log_status(&self) {
        let status = self.status().await;
        log::info!("Peers: {:?}", status.peers);
        log::info!("Blockchain height: {}", status.height);
    }

    /// Mine a block locally and push the new chain to every peer
    pub async fn mine_block(&self, data: impl Into<String>) -> Result<Block, BlockchainError> {
        let block = self.chain_sync.mine_block(data).await?;
        let blocks = self.chain_sync.chain_snapshot().await;
        self.peer_manager
            .broadcast(Message::BlockchainResponse(blocks))
            .await;
        Ok(block)
    }

    /// Get node status
    pub async fn status(&self) -> NodeStatus {
        NodeStatus {
            address: self.config.local_address(),
            height: self.chain_sync.height().await,
            peers: self.peer_manager.list().await,
        }
    }

    /// Stop the message loop and persist the chain
    pub async fn shutdown(&self) -> Result<(), StorageError> {
        self.shutdown.notify_one();
        self.chain_sync.flush().await
    }
}

/// Node status information
#[derive(Debug, Clone)]
pub struct NodeStatus {
    pub address: PeerAddress,
    pub height: usize,
    pub peers: Vec<String>,
}
