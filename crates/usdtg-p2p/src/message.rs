//! Wire messages and the frame codec.
//!
//! Frame layout (all integers big-endian):
//!
//! ```text
//! magic(4) | version(2) | type(1) | hops(1) | payload_len(4) | checksum(20) | payload
//! ```
//!
//! The checksum is the first 20 bytes of a domain-separated blake3 hash of
//! the payload.

use std::fmt;

use borsh::{BorshDeserialize, BorshSerialize};
use serde::Serialize;
use usdtg_core::{from_bytes, hash32, to_bytes, PROTOCOL_VERSION};

use crate::error::P2pError;
use crate::peer::PeerId;

pub const NETWORK_MAGIC: [u8; 4] = *b"USDG";
/// Per-message framing overhead, counted on top of the payload.
pub const FRAME_HEADER_LEN: usize = 32;
pub const CHECKSUM_LEN: usize = 20;
pub const MAX_PAYLOAD_LEN: usize = 1 << 20;

const DS_FRAME: &[u8] = b"USDTG::FRAME::V1";

/// Message kinds with their stable wire codes.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Handshake = 1,
    Heartbeat = 2,
    Transaction = 10,
    Block = 11,
    ConsensusVote = 20,
    ConsensusProposal = 21,
    PeerList = 30,
    Ping = 99,
    Pong = 100,
}

impl MessageType {
    pub const ALL: [MessageType; 9] = [
        MessageType::Handshake,
        MessageType::Heartbeat,
        MessageType::Transaction,
        MessageType::Block,
        MessageType::ConsensusVote,
        MessageType::ConsensusProposal,
        MessageType::PeerList,
        MessageType::Ping,
        MessageType::Pong,
    ];

    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Connection-management messages, consumed by the manager itself.
    pub const fn is_control(self) -> bool {
        matches!(
            self,
            MessageType::Handshake | MessageType::Heartbeat | MessageType::Ping | MessageType::Pong
        )
    }
}

impl TryFrom<u8> for MessageType {
    type Error = P2pError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Ok(match code {
            1 => MessageType::Handshake,
            2 => MessageType::Heartbeat,
            10 => MessageType::Transaction,
            11 => MessageType::Block,
            20 => MessageType::ConsensusVote,
            21 => MessageType::ConsensusProposal,
            30 => MessageType::PeerList,
            99 => MessageType::Ping,
            100 => MessageType::Pong,
            other => return Err(P2pError::UnknownMessageType(other)),
        })
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::Handshake => "HANDSHAKE",
            MessageType::Heartbeat => "HEARTBEAT",
            MessageType::Transaction => "TRANSACTION",
            MessageType::Block => "BLOCK",
            MessageType::ConsensusVote => "CONSENSUS_VOTE",
            MessageType::ConsensusProposal => "CONSENSUS_PROPOSAL",
            MessageType::PeerList => "PEER_LIST",
            MessageType::Ping => "PING",
            MessageType::Pong => "PONG",
        };
        f.write_str(name)
    }
}

/// Handshake payload, sent by both sides as soon as a connection opens.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Hello {
    pub protocol_version: u16,
    pub node_id: PeerId,
    pub listen_port: u16,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkMessage {
    pub kind: MessageType,
    pub payload: Vec<u8>,
    /// Times this message has been relayed by gossip.
    pub hop_count: u8,
}

impl NetworkMessage {
    pub fn new(kind: MessageType, payload: Vec<u8>) -> Self {
        Self {
            kind,
            payload,
            hop_count: 0,
        }
    }

    pub fn heartbeat() -> Self {
        Self::new(MessageType::Heartbeat, Vec::new())
    }

    pub fn ping(nonce: u64) -> Self {
        Self::new(MessageType::Ping, nonce.to_le_bytes().to_vec())
    }

    /// Pong echoing the ping's payload.
    pub fn pong_for(ping: &NetworkMessage) -> Self {
        Self::new(MessageType::Pong, ping.payload.clone())
    }

    pub fn handshake(hello: &Hello) -> Result<Self, P2pError> {
        let payload = to_bytes(hello).map_err(|_| P2pError::Frame("unencodable handshake"))?;
        Ok(Self::new(MessageType::Handshake, payload))
    }

    pub fn hello(&self) -> Result<Hello, P2pError> {
        if self.kind != MessageType::Handshake {
            return Err(P2pError::Frame("not a handshake"));
        }
        from_bytes(&self.payload).map_err(|_| P2pError::Frame("bad handshake payload"))
    }

    pub fn peer_list(endpoints: &[(String, u16)]) -> Result<Self, P2pError> {
        let payload =
            to_bytes(&endpoints.to_vec()).map_err(|_| P2pError::Frame("unencodable peer list"))?;
        Ok(Self::new(MessageType::PeerList, payload))
    }

    pub fn endpoints(&self) -> Result<Vec<(String, u16)>, P2pError> {
        if self.kind != MessageType::PeerList {
            return Err(P2pError::Frame("not a peer list"));
        }
        from_bytes(&self.payload).map_err(|_| P2pError::Frame("bad peer list payload"))
    }

    /// Bytes this message occupies on the wire.
    pub fn wire_len(&self) -> usize {
        FRAME_HEADER_LEN + self.payload.len()
    }

    /// Copy with the hop count bumped, for relaying.
    pub fn relayed(&self) -> Self {
        Self {
            kind: self.kind,
            payload: self.payload.clone(),
            hop_count: self.hop_count.saturating_add(1),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, P2pError> {
        if self.payload.len() > MAX_PAYLOAD_LEN {
            return Err(P2pError::PayloadTooLarge(self.payload.len()));
        }
        let mut out = Vec::with_capacity(self.wire_len());
        out.extend_from_slice(&NETWORK_MAGIC);
        out.extend_from_slice(&PROTOCOL_VERSION.to_be_bytes());
        out.push(self.kind.code());
        out.push(self.hop_count);
        out.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        out.extend_from_slice(&checksum(&self.payload));
        out.extend_from_slice(&self.payload);
        Ok(out)
    }

    /// Decode one frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` while the buffer holds only part of a frame, or the
    /// message and the number of bytes it consumed.
    pub fn decode_prefix(buf: &[u8]) -> Result<Option<(Self, usize)>, P2pError> {
        if buf.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }
        let (header, rest) = buf.split_at(FRAME_HEADER_LEN);
        if header[0..4] != NETWORK_MAGIC {
            return Err(P2pError::Frame("bad magic"));
        }
        let version = u16::from_be_bytes([header[4], header[5]]);
        if version != PROTOCOL_VERSION {
            return Err(P2pError::VersionMismatch {
                ours: PROTOCOL_VERSION,
                theirs: version,
            });
        }
        let kind = MessageType::try_from(header[6])?;
        let hop_count = header[7];
        let len = u32::from_be_bytes([header[8], header[9], header[10], header[11]]) as usize;
        if len > MAX_PAYLOAD_LEN {
            return Err(P2pError::PayloadTooLarge(len));
        }
        if rest.len() < len {
            return Ok(None);
        }
        let payload = rest[..len].to_vec();
        if header[12..FRAME_HEADER_LEN] != checksum(&payload) {
            return Err(P2pError::Frame("checksum mismatch"));
        }
        Ok(Some((
            Self {
                kind,
                payload,
                hop_count,
            },
            FRAME_HEADER_LEN + len,
        )))
    }

    /// Decode a buffer that must hold exactly one frame.
    pub fn decode(buf: &[u8]) -> Result<Self, P2pError> {
        match Self::decode_prefix(buf)? {
            Some((msg, used)) if used == buf.len() => Ok(msg),
            Some(_) => Err(P2pError::Frame("trailing bytes")),
            None => Err(P2pError::Frame("truncated")),
        }
    }
}

fn checksum(payload: &[u8]) -> [u8; CHECKSUM_LEN] {
    let digest = hash32(DS_FRAME, payload);
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&digest.as_bytes()[..CHECKSUM_LEN]);
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn wire_codes_are_stable() {
        let codes: Vec<u8> = MessageType::ALL.iter().map(|t| t.code()).collect();
        assert_eq!(codes, vec![1, 2, 10, 11, 20, 21, 30, 99, 100]);
        for kind in MessageType::ALL {
            assert_eq!(MessageType::try_from(kind.code()).unwrap(), kind);
        }
        assert!(matches!(
            MessageType::try_from(3),
            Err(P2pError::UnknownMessageType(3))
        ));
    }

    #[test]
    fn frame_header_is_fixed_size() {
        let msg = NetworkMessage::new(MessageType::Transaction, vec![7; 100]);
        let frame = msg.encode().unwrap();
        assert_eq!(frame.len(), FRAME_HEADER_LEN + 100);
        assert_eq!(frame.len(), msg.wire_len());
        assert_eq!(NetworkMessage::decode(&frame).unwrap(), msg);
    }

    #[test]
    fn partial_frames_wait_for_more_bytes() {
        let frame = NetworkMessage::ping(42).encode().unwrap();
        assert!(NetworkMessage::decode_prefix(&frame[..10]).unwrap().is_none());
        assert!(NetworkMessage::decode_prefix(&frame[..frame.len() - 1])
            .unwrap()
            .is_none());

        let mut two = frame.clone();
        two.extend_from_slice(&NetworkMessage::heartbeat().encode().unwrap());
        let (first, used) = NetworkMessage::decode_prefix(&two).unwrap().unwrap();
        assert_eq!(first.kind, MessageType::Ping);
        let (second, _) = NetworkMessage::decode_prefix(&two[used..]).unwrap().unwrap();
        assert_eq!(second.kind, MessageType::Heartbeat);
    }

    #[test]
    fn corrupted_frames_are_rejected() {
        let mut frame = NetworkMessage::new(MessageType::Block, vec![1, 2, 3])
            .encode()
            .unwrap();
        let last = frame.len() - 1;
        frame[last] ^= 0xff;
        assert!(matches!(
            NetworkMessage::decode(&frame),
            Err(P2pError::Frame("checksum mismatch"))
        ));

        let mut bad_magic = NetworkMessage::heartbeat().encode().unwrap();
        bad_magic[0] = b'X';
        assert!(NetworkMessage::decode(&bad_magic).is_err());

        let mut bad_type = NetworkMessage::heartbeat().encode().unwrap();
        bad_type[6] = 55;
        assert!(matches!(
            NetworkMessage::decode(&bad_type),
            Err(P2pError::UnknownMessageType(55))
        ));
    }

    #[test]
    fn oversized_payload_is_refused() {
        let msg = NetworkMessage::new(MessageType::Block, vec![0; MAX_PAYLOAD_LEN + 1]);
        assert!(matches!(msg.encode(), Err(P2pError::PayloadTooLarge(_))));
    }

    #[test]
    fn handshake_and_peer_list_payloads() {
        let hello = Hello {
            protocol_version: PROTOCOL_VERSION,
            node_id: PeerId::from_public_key(b"k"),
            listen_port: 26656,
        };
        let msg = NetworkMessage::handshake(&hello).unwrap();
        assert_eq!(msg.hello().unwrap(), hello);
        assert!(NetworkMessage::heartbeat().hello().is_err());

        let list = vec![("10.0.0.2".to_string(), 26656u16)];
        let msg = NetworkMessage::peer_list(&list).unwrap();
        assert_eq!(msg.endpoints().unwrap(), list);
    }

    #[test]
    fn relaying_bumps_hops() {
        let msg = NetworkMessage::heartbeat().relayed().relayed();
        assert_eq!(msg.hop_count, 2);
        assert_eq!(NetworkMessage::pong_for(&NetworkMessage::ping(9)).payload, 9u64.to_le_bytes());
    }
}
