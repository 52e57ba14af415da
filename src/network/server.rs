//! TCP server and connection handling
//!
//! Accepts incoming peer connections, dials outgoing ones and runs the
//! newline-delimited JSON framing on every socket.

use crate::network::message::{
    Message, MessageError, PeerAddress, MAX_MESSAGE_SIZE, MESSAGE_DELIMITER,
};
use crate::network::peer::{PeerError, PeerHandle, PeerManager, PEER_QUEUE_SIZE};
use bytes::{BufMut, BytesMut};
use futures::sink::SinkExt;
use futures::stream::StreamExt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{Decoder, Encoder, Framed};

/// Messages forwarded from connections to the node, tagged with the
/// connection they arrived on
pub type InboundSender = mpsc::Sender<(PeerHandle, Message)>;

/// Message codec for newline-delimited framing.
///
/// Each decoded item is the parse result of one line, so a malformed line
/// surfaces as `Some(Err(_))` and the stream keeps going. Empty lines are
/// skipped.
#[derive(Debug, Default)]
pub struct MessageCodec {
    /// Bytes already scanned for a delimiter
    scanned: usize,
}

impl MessageCodec {
    pub fn new() -> Self {
        Self::default()
    }

    fn parse_frame(frame: &[u8]) -> Option<Result<Message, MessageError>> {
        if frame.iter().all(u8::is_ascii_whitespace) {
            return None;
        }
        Some(Message::decode_slice(frame))
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let frame = item
            .encode()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;

        dst.reserve(frame.len());
        dst.put_slice(frame.as_bytes());

        Ok(())
    }
}

impl Decoder for MessageCodec {
    type Item = Result<Message, MessageError>;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let newline = src[self.scanned..]
                .iter()
                .position(|b| *b == MESSAGE_DELIMITER)
                .map(|offset| self.scanned + offset);

            let Some(newline) = newline else {
                if src.len() > MAX_MESSAGE_SIZE {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("Frame exceeds {} bytes without delimiter", MAX_MESSAGE_SIZE),
                    ));
                }
                self.scanned = src.len();
                return Ok(None);
            };

            self.scanned = 0;
            let line = src.split_to(newline + 1);

            if let Some(item) = Self::parse_frame(&line[..newline]) {
                return Ok(Some(item));
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(item) = self.decode(src)? {
            return Ok(Some(item));
        }

        // Trailing bytes without a delimiter are treated as a final frame
        self.scanned = 0;
        let rest = src.split();
        Ok(Self::parse_frame(&rest))
    }
}

/// TCP server for accepting peer connections
pub struct Server {
    listener: TcpListener,
}

impl Server {
    /// Bind to `host:port` and create the server
    pub async fn bind(host: &str, port: u16) -> Result<Self, io::Error> {
        let listener = TcpListener::bind((host, port)).await?;
        log::info!("Listening for P2P connections on: {}:{}", host, port);

        Ok(Self { listener })
    }

    /// Accept incoming connections
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), io::Error> {
        self.listener.accept().await
    }
}

/// Connect to a peer
pub async fn connect_to_peer(addr: &PeerAddress) -> Result<(TcpStream, SocketAddr), PeerError> {
    let stream = TcpStream::connect((addr.host.as_str(), addr.port))
        .await
        .map_err(|e| PeerError::ConnectionFailed(format!("{}: {}", addr, e)))?;

    let peer_addr = stream
        .peer_addr()
        .map_err(|e| PeerError::ConnectionFailed(e.to_string()))?;

    Ok((stream, peer_addr))
}

/// Spawns connection tasks for accepted and dialed sockets
#[derive(Clone)]
pub struct Connector {
    peer_manager: Arc<PeerManager>,
    message_tx: InboundSender,
}

impl Connector {
    pub fn new(peer_manager: Arc<PeerManager>, message_tx: InboundSender) -> Self {
        Self {
            peer_manager,
            message_tx,
        }
    }

    /// Run an accepted socket until it closes
    pub fn spawn_inbound(&self, stream: TcpStream, addr: SocketAddr) {
        log::info!("New peer connected: {}", addr);
        let pm = self.peer_manager.clone();
        let tx = self.message_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, addr, None, pm, tx).await {
                log::warn!("Connection error with {}: {}", addr, e);
            }
        });
    }

    /// Dial `id` in the background unless it is self, known or in flight
    pub fn spawn_dial(&self, id: &str) {
        let connector = self.clone();
        let id = id.to_string();
        tokio::spawn(async move {
            if let Err(e) = connector.dial(&id).await {
                match e {
                    PeerError::SelfConnection(_) | PeerError::AlreadyKnown(_) => {
                        log::debug!("Skipping dial: {}", e)
                    }
                    _ => log::warn!("Failed to connect to peer {}: {}", id, e),
                }
            }
        });
    }

    /// Dial `id` and serve the connection until it closes
    pub async fn dial(&self, id: &str) -> Result<(), PeerError> {
        let addr: PeerAddress = id.parse().map_err(PeerError::InvalidAddress)?;
        let id = addr.id();

        self.peer_manager.begin_dial(&id).await?;
        log::info!("Connecting to peer: {}", id);

        let (stream, socket_addr) = match connect_to_peer(&addr).await {
            Ok(conn) => conn,
            Err(e) => {
                self.peer_manager.end_dial(&id).await;
                return Err(e);
            }
        };

        let result = handle_connection(
            stream,
            socket_addr,
            Some(id.clone()),
            self.peer_manager.clone(),
            self.message_tx.clone(),
        )
        .await;
        self.peer_manager.end_dial(&id).await;
        result
    }
}

/// Handle a peer connection (both inbound and outbound).
///
/// Outbound connections are registered under the dialed id right away;
/// inbound ones are registered later when the peer advertises its
/// listening address in `peers_request`.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    dialed_id: Option<String>,
    peer_manager: Arc<PeerManager>,
    message_tx: InboundSender,
) -> Result<(), PeerError> {
    let framed = Framed::new(stream, MessageCodec::new());
    let (mut writer, mut reader) = framed.split();

    // Create channel for sending to this peer
    let (tx, mut rx) = mpsc::channel::<Message>(PEER_QUEUE_SIZE);
    let handle = PeerHandle::new(addr, tx);

    if let Some(id) = &dialed_id {
        if !peer_manager.register(id, handle.clone()).await {
            log::debug!("Already connected to peer: {}", id);
            return Ok(());
        }
        peer_manager.end_dial(id).await;
    }

    // Every new edge starts by asking for the chain and the peer list
    let bootstrap = [
        Message::BlockchainRequest,
        Message::PeersRequest(peer_manager.local_address().clone()),
    ];
    for msg in bootstrap {
        log::debug!("Sending {} to {}", msg.type_name(), addr);
        if let Err(e) = writer.send(msg).await {
            peer_manager.release(handle.conn_id).await;
            return Err(PeerError::IoError(e));
        }
    }

    // Spawn writer task
    let write_handle = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            log::debug!("Sending {} to {}", msg.type_name(), addr);
            if let Err(e) = writer.send(msg).await {
                log::warn!("Error writing to {}: {}", addr, e);
                break;
            }
        }
    });

    // Read messages
    loop {
        let next = tokio::select! {
            next = reader.next() => next,
            _ = handle.closed() => {
                log::warn!("Disconnecting {}: peer is not reading", addr);
                break;
            }
        };

        match next {
            Some(Ok(Ok(msg))) => {
                log::debug!("Received {} from {}", msg.type_name(), addr);
                if message_tx.send((handle.clone(), msg)).await.is_err() {
                    break;
                }
            }
            Some(Ok(Err(e))) => {
                log::warn!("Dropping malformed message from {}: {}", addr, e);
            }
            Some(Err(e)) => {
                log::warn!("Connection error with {}: {}", addr, e);
                break;
            }
            None => {
                log::info!("Connection closed: {}", addr);
                break;
            }
        }
    }

    // Cleanup
    write_handle.abort();
    peer_manager.release(handle.conn_id).await;

    Ok(())
}
