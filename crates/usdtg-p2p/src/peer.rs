use std::fmt;
use std::str::FromStr;
use std::sync::mpsc::{SyncSender, TrySendError};
use std::time::{Duration, Instant};

use borsh::{BorshDeserialize, BorshSerialize};
use rand_core::{OsRng, RngCore};
use serde::{Serialize, Serializer};
use usdtg_core::hash32;

use crate::error::P2pError;

pub const PEER_ID_LEN: usize = 6;

/// Reputation a peer starts with.
pub const INITIAL_REPUTATION: i32 = 100;
/// Awarded once when the handshake completes.
pub const HANDSHAKE_BONUS: i32 = 10;
pub const VALID_MESSAGE_REWARD: i32 = 1;
pub const INVALID_MESSAGE_PENALTY: i32 = 10;
pub const RATE_LIMIT_PENALTY: i32 = 5;
/// Reputation is clamped to `[-REPUTATION_BOUND, REPUTATION_BOUND]`.
pub const REPUTATION_BOUND: i32 = 1000;

const DS_PEER_ID: &[u8] = b"USDTG::PEER_ID::V1";

/// Opaque peer identifier.
///
/// Only obtainable from OS entropy or a public key; never from a counter.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, BorshSerialize, BorshDeserialize)]
pub struct PeerId([u8; PEER_ID_LEN]);

impl PeerId {
    pub fn random() -> Self {
        let mut bytes = [0u8; PEER_ID_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Derive an identifier by hashing the peer's public key.
    pub fn from_public_key(public_key: &[u8]) -> Self {
        let digest = hash32(DS_PEER_ID, public_key);
        let mut bytes = [0u8; PEER_ID_LEN];
        bytes.copy_from_slice(&digest.as_bytes()[..PEER_ID_LEN]);
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; PEER_ID_LEN] {
        &self.0
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", hex::encode(self.0))
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for PeerId {
    type Err = P2pError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| P2pError::Frame("peer id is not hex"))?;
        let arr: [u8; PEER_ID_LEN] = bytes
            .try_into()
            .map_err(|_| P2pError::Frame("peer id has wrong length"))?;
        Ok(Self(arr))
    }
}

impl Serialize for PeerId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    HandshakeTimeout,
    IdleTimeout,
    ProtocolViolation,
    ConnectionLost,
    /// The peer stopped draining its send queue.
    SlowConsumer,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureReason::HandshakeTimeout => "handshake timeout",
            FailureReason::IdleTimeout => "idle timeout",
            FailureReason::ProtocolViolation => "protocol violation",
            FailureReason::ConnectionLost => "connection lost",
            FailureReason::SlowConsumer => "send queue full",
        })
    }
}

/// Connection lifecycle.
///
/// `Connecting -> Handshaking -> Connected`, and from any of those to one of
/// the terminal states. A peer in a terminal state is no longer in the table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerState {
    Connecting,
    Handshaking,
    Connected,
    Disconnected,
    Failed(FailureReason),
    Banned,
}

impl PeerState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PeerState::Disconnected | PeerState::Failed(_) | PeerState::Banned
        )
    }

    /// Still negotiating: subject to the handshake timeout.
    pub fn is_pending(&self) -> bool {
        matches!(self, PeerState::Connecting | PeerState::Handshaking)
    }
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerState::Connecting => f.write_str("connecting"),
            PeerState::Handshaking => f.write_str("handshaking"),
            PeerState::Connected => f.write_str("connected"),
            PeerState::Disconnected => f.write_str("disconnected"),
            PeerState::Failed(reason) => write!(f, "failed ({reason})"),
            PeerState::Banned => f.write_str("banned"),
        }
    }
}

/// Public snapshot of a peer's metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PeerInfo {
    pub peer_id: PeerId,
    pub ip_address: String,
    pub port: u16,
    pub state: PeerState,
    pub reputation: i32,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub direction: Direction,
}

impl PeerInfo {
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.ip_address, self.port)
    }
}

/// Table entry: public info plus the bookkeeping the manager needs.
pub(crate) struct Peer {
    pub(crate) info: PeerInfo,
    /// When the current state was entered.
    pub(crate) since: Instant,
    pub(crate) last_seen: Instant,
    pub(crate) last_ping: Instant,
    window_start: Instant,
    window_count: u32,
    outbox: Option<SyncSender<Vec<u8>>>,
}

impl Peer {
    pub(crate) fn new(
        peer_id: PeerId,
        ip_address: String,
        port: u16,
        state: PeerState,
        direction: Direction,
        now: Instant,
    ) -> Self {
        Self {
            info: PeerInfo {
                peer_id,
                ip_address,
                port,
                state,
                reputation: INITIAL_REPUTATION,
                messages_sent: 0,
                messages_received: 0,
                bytes_sent: 0,
                bytes_received: 0,
                direction,
            },
            since: now,
            last_seen: now,
            last_ping: now,
            window_start: now,
            window_count: 0,
            outbox: None,
        }
    }

    pub(crate) fn state(&self) -> PeerState {
        self.info.state
    }

    pub(crate) fn set_state(&mut self, state: PeerState, now: Instant) {
        self.info.state = state;
        self.since = now;
    }

    pub(crate) fn adjust_reputation(&mut self, delta: i32) {
        self.info.reputation = self
            .info
            .reputation
            .saturating_add(delta)
            .clamp(-REPUTATION_BOUND, REPUTATION_BOUND);
    }

    pub(crate) fn attach_outbox(&mut self, outbox: SyncSender<Vec<u8>>) {
        self.outbox = Some(outbox);
    }

    /// Hand a frame to the writer, if one is attached, and count it as sent.
    ///
    /// Returns false, counting nothing, when the writer's queue is full.
    pub(crate) fn send_frame(&mut self, frame: &[u8]) -> bool {
        if let Some(outbox) = &self.outbox {
            match outbox.try_send(frame.to_vec()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => return false,
                // Writer gone; the reader side reports the loss.
                Err(TrySendError::Disconnected(_)) => {}
            }
        }
        self.info.messages_sent = self.info.messages_sent.saturating_add(1);
        self.info.bytes_sent = self.info.bytes_sent.saturating_add(frame.len() as u64);
        true
    }

    pub(crate) fn record_received(&mut self, wire_len: usize, now: Instant) {
        self.info.messages_received = self.info.messages_received.saturating_add(1);
        self.info.bytes_received = self.info.bytes_received.saturating_add(wire_len as u64);
        self.last_seen = now;
    }

    /// Fixed one-second window counter. Returns false once the peer has
    /// exceeded `limit` messages in the current window.
    pub(crate) fn admit(&mut self, now: Instant, limit: u32) -> bool {
        if now.saturating_duration_since(self.window_start) >= Duration::from_secs(1) {
            self.window_start = now;
            self.window_count = 0;
        }
        self.window_count = self.window_count.saturating_add(1);
        self.window_count <= limit
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn public_key_ids_are_stable() {
        let a = PeerId::from_public_key(b"node-key-a");
        assert_eq!(a, PeerId::from_public_key(b"node-key-a"));
        assert_ne!(a, PeerId::from_public_key(b"node-key-b"));
        assert_eq!(a.to_string().parse::<PeerId>().unwrap(), a);
    }

    #[test]
    fn random_ids_differ() {
        assert_ne!(PeerId::random(), PeerId::random());
    }

    #[test]
    fn reputation_is_clamped() {
        let now = Instant::now();
        let mut peer = Peer::new(
            PeerId::random(),
            "10.0.0.1".into(),
            9000,
            PeerState::Connecting,
            Direction::Outbound,
            now,
        );
        peer.adjust_reputation(5_000);
        assert_eq!(peer.info.reputation, REPUTATION_BOUND);
        peer.adjust_reputation(i32::MIN);
        assert_eq!(peer.info.reputation, -REPUTATION_BOUND);
    }

    #[test]
    fn rate_window_resets_each_second() {
        let now = Instant::now();
        let mut peer = Peer::new(
            PeerId::random(),
            "10.0.0.1".into(),
            9000,
            PeerState::Connected,
            Direction::Inbound,
            now,
        );
        assert!(peer.admit(now, 2));
        assert!(peer.admit(now, 2));
        assert!(!peer.admit(now, 2));
        assert!(peer.admit(now + Duration::from_secs(1), 2));
    }

    #[test]
    fn full_outbox_refuses_frames() {
        let mut peer = Peer::new(
            PeerId::random(),
            "10.0.0.1".into(),
            9000,
            PeerState::Connected,
            Direction::Outbound,
            Instant::now(),
        );
        let (tx, rx) = std::sync::mpsc::sync_channel(1);
        peer.attach_outbox(tx);
        assert!(peer.send_frame(&[1, 2, 3]));
        assert!(!peer.send_frame(&[4]));
        assert_eq!(peer.info.messages_sent, 1);
        assert_eq!(peer.info.bytes_sent, 3);

        drop(rx);
        assert!(peer.send_frame(&[5]));
        assert_eq!(peer.info.messages_sent, 2);
    }

    #[test]
    fn failed_state_renders_reason() {
        let state = PeerState::Failed(FailureReason::HandshakeTimeout);
        assert_eq!(state.to_string(), "failed (handshake timeout)");
        assert!(state.is_terminal());
        assert!(!PeerState::Handshaking.is_terminal());
    }
}
