//! Network message types for P2P communication
//!
//! Every message travels as a JSON envelope `{"type": ..., "data": ...}`
//! followed by a single `\n`.

use crate::core::Block;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Frame delimiter
pub const MESSAGE_DELIMITER: u8 = b'\n';

/// Largest accepted frame, delimiter excluded. Full-chain responses are
/// the biggest messages on the wire.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Message decoding errors
#[derive(Error, Debug)]
pub enum MessageError {
    #[error("Malformed envelope: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Unknown message type: {0}")]
    UnknownType(String),
    #[error("Invalid payload for {kind}: {source}")]
    InvalidPayload {
        kind: &'static str,
        source: serde_json::Error,
    },
}

/// Address a node listens on, advertised in `peers_request`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerAddress {
    pub host: String,
    pub port: u16,
}

impl PeerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Registry identity (`host:port`)
    pub fn id(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for PeerAddress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| format!("expected host:port, got {:?}", s))?;
        if host.is_empty() {
            return Err(format!("missing host in {:?}", s));
        }
        let port = port
            .parse::<u16>()
            .map_err(|e| format!("invalid port in {:?}: {}", s, e))?;
        Ok(Self::new(host, port))
    }
}

/// Network message types
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Ask the peer for its full chain
    BlockchainRequest,

    /// Full chain, genesis first
    BlockchainResponse(Vec<Block>),

    /// Ask the peer for its peer list, advertising where we listen
    PeersRequest(PeerAddress),

    /// Known peer identities (`host:port`)
    PeersResponse(Vec<String>),

    /// Liveness signal
    KeepAlive,
}

/// Raw wire envelope
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

impl Message {
    /// Get message type name as it appears on the wire
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::BlockchainRequest => "blockchain_request",
            Message::BlockchainResponse(_) => "blockchain_response",
            Message::PeersRequest(_) => "peers_request",
            Message::PeersResponse(_) => "peers_response",
            Message::KeepAlive => "keep_alive",
        }
    }

    fn payload(&self) -> Result<Value, serde_json::Error> {
        match self {
            Message::BlockchainRequest | Message::KeepAlive => Ok(Value::Null),
            Message::BlockchainResponse(blocks) => serde_json::to_value(blocks),
            Message::PeersRequest(addr) => serde_json::to_value(addr),
            Message::PeersResponse(peers) => serde_json::to_value(peers),
        }
    }

    /// Serialize to the JSON envelope (no delimiter)
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let envelope = Envelope {
            kind: self.type_name().to_string(),
            data: self.payload()?,
        };
        serde_json::to_string(&envelope)
    }

    /// Serialize to a complete wire frame, delimiter included
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        let mut frame = self.to_json()?;
        frame.push(MESSAGE_DELIMITER as char);
        Ok(frame)
    }

    /// Parse a single frame (delimiter already stripped)
    pub fn decode(frame: &str) -> Result<Self, MessageError> {
        Self::decode_slice(frame.as_bytes())
    }

    /// Parse a single raw frame. Bytes that are not valid UTF-8 JSON are
    /// rejected rather than repaired.
    pub fn decode_slice(frame: &[u8]) -> Result<Self, MessageError> {
        let envelope: Envelope = serde_json::from_slice(frame)?;
        let data = envelope.data;

        match envelope.kind.as_str() {
            "blockchain_request" => Ok(Message::BlockchainRequest),
            "blockchain_response" => Ok(Message::BlockchainResponse(payload(
                "blockchain_response",
                data,
            )?)),
            "peers_request" => Ok(Message::PeersRequest(payload("peers_request", data)?)),
            "peers_response" => Ok(Message::PeersResponse(payload("peers_response", data)?)),
            "keep_alive" => Ok(Message::KeepAlive),
            _ => Err(MessageError::UnknownType(envelope.kind)),
        }
    }
}

fn payload<T: DeserializeOwned>(kind: &'static str, data: Value) -> Result<T, MessageError> {
    serde_json::from_value(data).map_err(|source| MessageError::InvalidPayload { kind, source })
}
