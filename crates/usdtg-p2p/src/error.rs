use thiserror::Error;

use crate::peer::{PeerId, PeerState};

#[derive(Debug, Error)]
pub enum P2pError {
    #[error("io: {0}")]
    Io(String),
    #[error("peer table full ({capacity} peers)")]
    PeerTableFull { capacity: usize },
    #[error("no connected peers to receive the message")]
    BroadcastNoRecipients,
    #[error("peer {0} did not complete the handshake in time")]
    HandshakeTimeout(PeerId),
    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),
    #[error("peer {0} is not connected")]
    NotConnected(PeerId),
    #[error("network manager is not running")]
    NotRunning,
    #[error("network manager is already running")]
    AlreadyRunning,
    #[error("peer {peer} cannot advance from {from}")]
    InvalidTransition { peer: PeerId, from: PeerState },
    #[error("invalid peer address {0:?}")]
    InvalidAddress(String),
    #[error("send queue to peer {0} is full")]
    SendQueueFull(PeerId),
    #[error("address {0} is banned")]
    Banned(String),
    #[error("gossip hop limit {0} reached")]
    HopLimit(u8),
    #[error("protocol version mismatch: ours {ours}, theirs {theirs}")]
    VersionMismatch { ours: u16, theirs: u16 },
    #[error("malformed frame: {0}")]
    Frame(&'static str),
    #[error("payload of {0} bytes exceeds the frame limit")]
    PayloadTooLarge(usize),
    #[error("unknown message type {0}")]
    UnknownMessageType(u8),
    #[error("invalid config: {0}")]
    Config(&'static str),
}

impl From<std::io::Error> for P2pError {
    fn from(e: std::io::Error) -> Self {
        P2pError::Io(e.to_string())
    }
}
