//! Peer table and lifecycle.
//!
//! All peer mutation goes through [`NetworkManager`], which keeps the table
//! behind one `RwLock`. Broadcasts fan out from a snapshot taken under that
//! lock: frames are queued on per-peer channels and the socket writes happen
//! on the writer threads, outside the lock. Peer callbacks also run after the
//! lock is released, so they may call back into the manager.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::mpsc::SyncSender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, warn};
use usdtg_core::PROTOCOL_VERSION;

use crate::config::NetworkConfig;
use crate::error::P2pError;
use crate::message::{Hello, MessageType, NetworkMessage};
use crate::peer::{
    Direction, FailureReason, Peer, PeerId, PeerInfo, PeerState, HANDSHAKE_BONUS,
    INVALID_MESSAGE_PENALTY, RATE_LIMIT_PENALTY, VALID_MESSAGE_REWARD,
};

/// Callback for application messages (transactions, blocks, votes, peer lists).
pub type MessageHandler = Arc<dyn Fn(PeerId, &NetworkMessage) + Send + Sync>;

/// Callback for peer lifecycle events. Departures carry the terminal state.
pub type PeerHandler = Arc<dyn Fn(&PeerInfo) + Send + Sync>;

/// Aggregate traffic counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct NetworkStats {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub dropped_messages: u64,
    pub peers_banned: u64,
    pub peers_evicted: u64,
}

/// Point-in-time view returned by [`NetworkManager::status_summary`].
#[derive(Clone, Debug, Serialize)]
pub struct NetworkStatus {
    pub running: bool,
    pub local_id: PeerId,
    pub listen_port: u16,
    pub peer_count: usize,
    pub connected_peers: usize,
    pub max_peers: usize,
    pub stats: NetworkStats,
}

impl fmt::Display for NetworkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Network Status:")?;
        writeln!(f, "  Node: {} (port {})", self.local_id, self.listen_port)?;
        writeln!(f, "  Running: {}", self.running)?;
        writeln!(
            f,
            "  Peers: {} ({} connected, max {})",
            self.peer_count, self.connected_peers, self.max_peers
        )?;
        writeln!(
            f,
            "  Sent: {} messages / {} bytes",
            self.stats.messages_sent, self.stats.bytes_sent
        )?;
        writeln!(
            f,
            "  Received: {} messages / {} bytes ({} dropped)",
            self.stats.messages_received, self.stats.bytes_received, self.stats.dropped_messages
        )?;
        write!(
            f,
            "  Evicted: {} ({} banned)",
            self.stats.peers_evicted, self.stats.peers_banned
        )
    }
}

/// What one [`NetworkManager::maintain`] pass did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub timed_out: Vec<PeerId>,
    pub idle: Vec<PeerId>,
    pub banned: Vec<PeerId>,
    pub pinged: usize,
}

impl MaintenanceReport {
    pub fn evicted(&self) -> usize {
        self.timed_out.len() + self.idle.len() + self.banned.len()
    }
}

enum PeerEvent {
    Connected(PeerInfo),
    Left(PeerInfo),
}

#[derive(Default)]
struct Handlers {
    message: Option<MessageHandler>,
    connected: Option<PeerHandler>,
    disconnected: Option<PeerHandler>,
}

#[derive(Default)]
struct PeerTable {
    running: bool,
    peers: HashMap<PeerId, Peer>,
    banned: HashSet<String>,
    stats: NetworkStats,
    ping_nonce: u64,
    /// Lifecycle events raised under the lock, delivered after it is released.
    events: Vec<PeerEvent>,
}

impl PeerTable {
    /// Move a peer into a terminal state and drop it from the table.
    ///
    /// Dropping the entry closes its outbound channel, which ends the writer.
    fn retire(&mut self, peer_id: &PeerId, state: PeerState) -> Option<PeerInfo> {
        let mut peer = self.peers.remove(peer_id)?;
        peer.info.state = state;
        self.stats.peers_evicted = self.stats.peers_evicted.saturating_add(1);
        if state == PeerState::Banned {
            self.stats.peers_banned = self.stats.peers_banned.saturating_add(1);
            self.banned.insert(peer.info.ip_address.clone());
        }
        self.events.push(PeerEvent::Left(peer.info.clone()));
        Some(peer.info)
    }

    fn mark_connected(&mut self, peer_id: &PeerId, now: Instant) {
        if let Some(peer) = self.peers.get_mut(peer_id) {
            peer.set_state(PeerState::Connected, now);
            peer.adjust_reputation(HANDSHAKE_BONUS);
            self.events.push(PeerEvent::Connected(peer.info.clone()));
        }
    }

    fn check_admission(&self, ip: &str, capacity: usize) -> Result<(), P2pError> {
        if !self.running {
            return Err(P2pError::NotRunning);
        }
        if self.banned.contains(ip) {
            return Err(P2pError::Banned(ip.to_string()));
        }
        if self.peers.len() >= capacity {
            return Err(P2pError::PeerTableFull { capacity });
        }
        Ok(())
    }

    fn insert(&mut self, mut peer: Peer) -> PeerId {
        while self.peers.contains_key(&peer.info.peer_id) {
            peer.info.peer_id = PeerId::random();
        }
        let id = peer.info.peer_id;
        self.peers.insert(id, peer);
        id
    }

    /// Queue a frame for one peer. A peer whose queue is full is failed.
    fn send(&mut self, peer_id: &PeerId, frame: &[u8]) -> Result<(), P2pError> {
        let peer = self
            .peers
            .get_mut(peer_id)
            .ok_or(P2pError::UnknownPeer(*peer_id))?;
        if !peer.send_frame(frame) {
            self.stats.dropped_messages = self.stats.dropped_messages.saturating_add(1);
            warn!(peer = %peer_id, "send queue full, dropping peer");
            self.retire(peer_id, PeerState::Failed(FailureReason::SlowConsumer));
            return Err(P2pError::SendQueueFull(*peer_id));
        }
        self.stats.messages_sent = self.stats.messages_sent.saturating_add(1);
        self.stats.bytes_sent = self.stats.bytes_sent.saturating_add(frame.len() as u64);
        Ok(())
    }

    /// Apply a reputation delta and ban the peer if it falls below `floor`.
    /// Returns true if the peer was banned.
    fn rate(&mut self, peer_id: &PeerId, delta: i32, floor: i32) -> bool {
        let below = match self.peers.get_mut(peer_id) {
            Some(peer) => {
                peer.adjust_reputation(delta);
                peer.info.reputation < floor
            }
            None => return false,
        };
        if below {
            warn!(peer = %peer_id, "reputation below floor, banning");
            self.retire(peer_id, PeerState::Banned);
        }
        below
    }

    fn connected_count(&self) -> usize {
        self.peers
            .values()
            .filter(|p| p.state() == PeerState::Connected)
            .count()
    }
}

struct Shared {
    config: NetworkConfig,
    local_id: PeerId,
    listen_port: AtomicU16,
    table: RwLock<PeerTable>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    handlers: RwLock<Handlers>,
}

/// Owns the peer table. Cheap to clone; clones share the same table.
#[derive(Clone)]
pub struct NetworkManager {
    shared: Arc<Shared>,
}

impl NetworkManager {
    pub fn new(config: NetworkConfig) -> Self {
        Self::with_local_id(config, PeerId::random())
    }

    pub fn with_local_id(config: NetworkConfig, local_id: PeerId) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                local_id,
                listen_port: AtomicU16::new(0),
                table: RwLock::new(PeerTable::default()),
                workers: Mutex::new(Vec::new()),
                handlers: RwLock::new(Handlers::default()),
            }),
        }
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.shared.config
    }

    pub fn local_id(&self) -> PeerId {
        self.shared.local_id
    }

    pub fn listen_port(&self) -> u16 {
        self.shared.listen_port.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.shared.table.read().running
    }

    /// Register the callback for non-control messages from connected peers.
    pub fn set_message_handler<F>(&self, handler: F)
    where
        F: Fn(PeerId, &NetworkMessage) + Send + Sync + 'static,
    {
        self.shared.handlers.write().message = Some(Arc::new(handler));
    }

    /// Called whenever a peer reaches `Connected`.
    pub fn set_peer_connected_handler<F>(&self, handler: F)
    where
        F: Fn(&PeerInfo) + Send + Sync + 'static,
    {
        self.shared.handlers.write().connected = Some(Arc::new(handler));
    }

    /// Called whenever a peer leaves the table, with its terminal state.
    /// Peers dropped by [`NetworkManager::stop`] are not reported.
    pub fn set_peer_disconnected_handler<F>(&self, handler: F)
    where
        F: Fn(&PeerInfo) + Send + Sync + 'static,
    {
        self.shared.handlers.write().disconnected = Some(Arc::new(handler));
    }

    /// Run `f` under the table write lock, then deliver the lifecycle events
    /// it raised.
    fn with_table<R>(&self, f: impl FnOnce(&mut PeerTable) -> R) -> R {
        let mut table = self.shared.table.write();
        let out = f(&mut table);
        let events = std::mem::take(&mut table.events);
        drop(table);
        self.notify(events);
        out
    }

    fn notify(&self, events: Vec<PeerEvent>) {
        if events.is_empty() {
            return;
        }
        let (connected, disconnected) = {
            let handlers = self.shared.handlers.read();
            (handlers.connected.clone(), handlers.disconnected.clone())
        };
        for event in events {
            match (event, &connected, &disconnected) {
                (PeerEvent::Connected(info), Some(handler), _) => handler(&info),
                (PeerEvent::Left(info), _, Some(handler)) => handler(&info),
                _ => {}
            }
        }
    }

    /// Our handshake payload.
    pub fn hello(&self) -> Hello {
        Hello {
            protocol_version: PROTOCOL_VERSION,
            node_id: self.local_id(),
            listen_port: self.listen_port(),
        }
    }

    pub fn try_start(&self, listen_port: u16) -> Result<(), P2pError> {
        {
            let mut table = self.shared.table.write();
            if table.running {
                return Err(P2pError::AlreadyRunning);
            }
            table.running = true;
            self.shared.listen_port.store(listen_port, Ordering::Release);
        }
        info!(node = %self.local_id(), port = listen_port, "network manager started");
        Ok(())
    }

    /// Start the manager. Returns false if it was already running.
    pub fn start(&self, listen_port: u16) -> bool {
        match self.try_start(listen_port) {
            Ok(()) => true,
            Err(e) => {
                warn!("start ignored: {e}");
                false
            }
        }
    }

    /// Stop the manager: empty the peer table and join every worker.
    ///
    /// The running flag is cleared under the same lock that empties the
    /// table, so no admission can slip in behind it. Workers observe the
    /// flag or their closed channel and exit.
    pub fn stop(&self) {
        let dropped = {
            let mut table = self.shared.table.write();
            if !table.running {
                return;
            }
            table.running = false;
            table.events.clear();
            let n = table.peers.len();
            table.peers.clear();
            n
        };

        let workers = std::mem::take(&mut *self.shared.workers.lock());
        let me = thread::current().id();
        for handle in workers {
            if handle.thread().id() == me {
                continue;
            }
            if handle.join().is_err() {
                warn!("network worker panicked");
            }
        }
        info!(dropped_peers = dropped, "network manager stopped");
    }

    /// Track a worker so `stop` can join it. A worker registered after `stop`
    /// collected the list is joined here instead.
    pub(crate) fn register_worker(&self, handle: JoinHandle<()>) {
        let mut workers = self.shared.workers.lock();
        if self.is_running() {
            workers.retain(|h| !h.is_finished());
            workers.push(handle);
            return;
        }
        drop(workers);
        if handle.thread().id() != thread::current().id() && handle.join().is_err() {
            warn!("network worker panicked");
        }
    }

    pub(crate) fn attach_outbox(
        &self,
        peer_id: PeerId,
        outbox: SyncSender<Vec<u8>>,
    ) -> Result<(), P2pError> {
        let mut table = self.shared.table.write();
        let peer = table
            .peers
            .get_mut(&peer_id)
            .ok_or(P2pError::UnknownPeer(peer_id))?;
        peer.attach_outbox(outbox);
        Ok(())
    }

    /// Add an outbound peer in `Connecting` state.
    pub fn try_connect(&self, ip_address: impl Into<String>, port: u16) -> Result<PeerId, P2pError> {
        self.admit(ip_address.into(), port, PeerState::Connecting, Direction::Outbound)
    }

    /// Returns false when the address does not parse, the table is full, the
    /// address is banned or the manager is stopped.
    pub fn connect_to_peer(&self, ip_address: &str, port: u16) -> bool {
        match self.try_connect(ip_address, port) {
            Ok(_) => true,
            Err(e) => {
                debug!(ip = ip_address, port, "connect refused: {e}");
                false
            }
        }
    }

    /// Add a peer for a connection a remote node opened towards us.
    ///
    /// The transport already exists, so the peer starts in `Handshaking`.
    pub fn accept_inbound(&self, ip_address: impl Into<String>, port: u16) -> Result<PeerId, P2pError> {
        self.admit(ip_address.into(), port, PeerState::Handshaking, Direction::Inbound)
    }

    fn admit(
        &self,
        ip_address: String,
        port: u16,
        state: PeerState,
        direction: Direction,
    ) -> Result<PeerId, P2pError> {
        let ip: IpAddr = ip_address
            .trim()
            .parse()
            .map_err(|_| P2pError::InvalidAddress(ip_address.clone()))?;
        let ip_address = ip.to_string();
        let capacity = self.shared.config.max_peers;

        self.with_table(|table| {
            table.check_admission(&ip_address, capacity)?;
            let peer = Peer::new(
                PeerId::random(),
                ip_address,
                port,
                state,
                direction,
                Instant::now(),
            );
            let id = table.insert(peer);
            debug!(peer = %id, ?direction, %state, "peer added");
            Ok(id)
        })
    }

    /// Move a peer one step along `Connecting -> Handshaking -> Connected`.
    ///
    /// A handshake that has outlived its timeout fails the peer instead.
    pub fn advance(&self, peer_id: PeerId) -> Result<PeerState, P2pError> {
        let now = Instant::now();
        let timeout = self.shared.config.handshake_timeout();
        self.with_table(|table| {
            let peer = table
                .peers
                .get_mut(&peer_id)
                .ok_or(P2pError::UnknownPeer(peer_id))?;

            match peer.state() {
                PeerState::Connecting => peer.set_state(PeerState::Handshaking, now),
                PeerState::Handshaking => {
                    if now.saturating_duration_since(peer.since) > timeout {
                        table.retire(&peer_id, PeerState::Failed(FailureReason::HandshakeTimeout));
                        warn!(peer = %peer_id, "handshake timed out");
                        return Err(P2pError::HandshakeTimeout(peer_id));
                    }
                    table.mark_connected(&peer_id, now);
                }
                from => return Err(P2pError::InvalidTransition { peer: peer_id, from }),
            }
            let next = table
                .peers
                .get(&peer_id)
                .map(Peer::state)
                .ok_or(P2pError::UnknownPeer(peer_id))?;
            debug!(peer = %peer_id, state = %next, "peer advanced");
            Ok(next)
        })
    }

    pub fn disconnect(&self, peer_id: PeerId) -> Option<PeerInfo> {
        let info = self.with_table(|table| table.retire(&peer_id, PeerState::Disconnected));
        if info.is_some() {
            debug!(peer = %peer_id, "peer disconnected");
        }
        info
    }

    /// Ban a peer: evict it and refuse its address from now on.
    pub fn ban(&self, peer_id: PeerId, reason: &str) -> Option<PeerInfo> {
        let info = self.with_table(|table| table.retire(&peer_id, PeerState::Banned));
        if let Some(info) = &info {
            warn!(peer = %peer_id, addr = %info.endpoint(), "peer banned: {reason}");
        }
        info
    }

    pub fn fail(&self, peer_id: PeerId, reason: FailureReason) -> Option<PeerInfo> {
        let info = self.with_table(|table| table.retire(&peer_id, PeerState::Failed(reason)));
        if info.is_some() {
            warn!(peer = %peer_id, %reason, "peer failed");
        }
        info
    }

    pub fn is_banned(&self, ip_address: &str) -> bool {
        let normalized = ip_address
            .trim()
            .parse::<IpAddr>()
            .map(|ip| ip.to_string())
            .unwrap_or_else(|_| ip_address.to_string());
        self.shared.table.read().banned.contains(&normalized)
    }

    pub fn try_broadcast(&self, message: &NetworkMessage) -> Result<usize, P2pError> {
        self.fan_out(message, None)
    }

    /// Send to every connected peer. Returns false when nobody is connected;
    /// nothing is counted in that case.
    pub fn broadcast(&self, message: &NetworkMessage) -> bool {
        match self.try_broadcast(message) {
            Ok(n) => {
                debug!(kind = %message.kind, recipients = n, "broadcast");
                true
            }
            Err(e) => {
                debug!(kind = %message.kind, "broadcast not sent: {e}");
                false
            }
        }
    }

    /// Relay a message received from `origin` to every other connected peer.
    pub fn gossip(&self, message: &NetworkMessage, origin: Option<PeerId>) -> Result<usize, P2pError> {
        if message.hop_count >= self.shared.config.max_gossip_hops {
            return Err(P2pError::HopLimit(self.shared.config.max_gossip_hops));
        }
        self.fan_out(&message.relayed(), origin)
    }

    /// Returns how many recipients accepted the frame; peers with a full
    /// send queue are failed and skipped.
    fn fan_out(&self, message: &NetworkMessage, exclude: Option<PeerId>) -> Result<usize, P2pError> {
        let frame = message.encode()?;
        self.with_table(|table| {
            if !table.running {
                return Err(P2pError::NotRunning);
            }
            let recipients: Vec<PeerId> = table
                .peers
                .values()
                .filter(|p| p.state() == PeerState::Connected && Some(p.info.peer_id) != exclude)
                .map(|p| p.info.peer_id)
                .collect();
            if recipients.is_empty() {
                return Err(P2pError::BroadcastNoRecipients);
            }
            let mut delivered = 0;
            for id in &recipients {
                if table.send(id, &frame).is_ok() {
                    delivered += 1;
                }
            }
            Ok(delivered)
        })
    }

    /// Send to a single live peer, whatever its handshake progress.
    pub fn send_to(&self, peer_id: PeerId, message: &NetworkMessage) -> Result<(), P2pError> {
        let frame = message.encode()?;
        self.with_table(|table| table.send(&peer_id, &frame))
    }

    /// Process one message received from `peer_id` and return the replies
    /// to send back.
    ///
    /// Updates counters and reputation, enforces the per-peer rate limit,
    /// completes handshakes and answers pings. Application messages from
    /// connected peers go to the message handler.
    pub fn handle_inbound(
        &self,
        peer_id: PeerId,
        message: NetworkMessage,
    ) -> Result<Vec<NetworkMessage>, P2pError> {
        let now = Instant::now();
        let cfg = &self.shared.config;
        let local_id = self.local_id();

        let (replies, deliver) = self.with_table(|table| {
            let wire_len = message.wire_len();
            let peer = table
                .peers
                .get_mut(&peer_id)
                .ok_or(P2pError::UnknownPeer(peer_id))?;
            peer.record_received(wire_len, now);
            let admitted = peer.admit(now, cfg.max_messages_per_second);
            let state = peer.state();

            table.stats.messages_received = table.stats.messages_received.saturating_add(1);
            table.stats.bytes_received = table.stats.bytes_received.saturating_add(wire_len as u64);

            if !admitted {
                table.stats.dropped_messages = table.stats.dropped_messages.saturating_add(1);
                table.rate(&peer_id, -RATE_LIMIT_PENALTY, cfg.min_reputation);
                debug!(peer = %peer_id, "rate limit exceeded, message dropped");
                return Ok((Vec::new(), false));
            }

            let mut replies = Vec::new();
            match message.kind {
                MessageType::Handshake => {
                    let hello = match message.hello() {
                        Ok(hello) => hello,
                        Err(e) => {
                            table.rate(&peer_id, -INVALID_MESSAGE_PENALTY, cfg.min_reputation);
                            return Err(e);
                        }
                    };
                    if hello.protocol_version != PROTOCOL_VERSION {
                        table.retire(&peer_id, PeerState::Failed(FailureReason::ProtocolViolation));
                        warn!(peer = %peer_id, theirs = hello.protocol_version, "protocol version mismatch");
                        return Err(P2pError::VersionMismatch {
                            ours: PROTOCOL_VERSION,
                            theirs: hello.protocol_version,
                        });
                    }
                    if hello.node_id == local_id {
                        table.retire(&peer_id, PeerState::Failed(FailureReason::ProtocolViolation));
                        warn!(peer = %peer_id, "connected to ourselves, dropping");
                        return Err(P2pError::Frame("handshake from own node id"));
                    }
                    if state.is_pending() {
                        table.mark_connected(&peer_id, now);
                        debug!(peer = %peer_id, remote = %hello.node_id, "handshake complete");
                    }
                }
                MessageType::Ping => replies.push(NetworkMessage::pong_for(&message)),
                MessageType::Pong | MessageType::Heartbeat => {}
                MessageType::Transaction
                | MessageType::Block
                | MessageType::ConsensusVote
                | MessageType::ConsensusProposal
                | MessageType::PeerList => {
                    if state != PeerState::Connected {
                        table.rate(&peer_id, -INVALID_MESSAGE_PENALTY, cfg.min_reputation);
                        return Err(P2pError::NotConnected(peer_id));
                    }
                }
            }
            table.rate(&peer_id, VALID_MESSAGE_REWARD, cfg.min_reputation);
            Ok((replies, !message.kind.is_control()))
        })?;

        if deliver {
            let handler = self.shared.handlers.read().message.clone();
            if let Some(handler) = handler {
                handler(peer_id, &message);
            }
        }
        Ok(replies)
    }

    /// Penalise a peer for bytes that could not be decoded.
    pub fn report_invalid_frame(&self, peer_id: PeerId) {
        let floor = self.shared.config.min_reputation;
        self.with_table(|table| table.rate(&peer_id, -INVALID_MESSAGE_PENALTY, floor));
    }

    /// Enforce timeouts and the reputation floor, and ping connected peers
    /// whose heartbeat is due.
    pub fn maintain(&self, now: Instant) -> MaintenanceReport {
        let cfg = &self.shared.config;
        self.with_table(|table| {
            let mut report = MaintenanceReport::default();
            if !table.running {
                return report;
            }

            let mut verdicts = Vec::new();
            for peer in table.peers.values() {
                let id = peer.info.peer_id;
                let state = peer.state();
                if peer.info.reputation < cfg.min_reputation {
                    verdicts.push((id, PeerState::Banned));
                } else if state.is_pending()
                    && now.saturating_duration_since(peer.since) > cfg.handshake_timeout()
                {
                    verdicts.push((id, PeerState::Failed(FailureReason::HandshakeTimeout)));
                } else if state == PeerState::Connected
                    && now.saturating_duration_since(peer.last_seen) > cfg.idle_timeout()
                {
                    verdicts.push((id, PeerState::Disconnected));
                }
            }
            for (id, verdict) in verdicts {
                table.retire(&id, verdict);
                match verdict {
                    PeerState::Banned => report.banned.push(id),
                    PeerState::Disconnected => report.idle.push(id),
                    _ => report.timed_out.push(id),
                }
                warn!(peer = %id, state = %verdict, "peer evicted");
            }

            let due: Vec<PeerId> = table
                .peers
                .values()
                .filter(|p| {
                    p.state() == PeerState::Connected
                        && now.saturating_duration_since(p.last_ping) >= cfg.heartbeat_interval()
                })
                .map(|p| p.info.peer_id)
                .collect();
            for id in due {
                table.ping_nonce = table.ping_nonce.wrapping_add(1);
                let Ok(frame) = NetworkMessage::ping(table.ping_nonce).encode() else {
                    continue;
                };
                if table.send(&id, &frame).is_ok() {
                    if let Some(peer) = table.peers.get_mut(&id) {
                        peer.last_ping = now;
                    }
                    report.pinged += 1;
                }
            }

            if report.evicted() > 0 {
                debug!(
                    timed_out = report.timed_out.len(),
                    idle = report.idle.len(),
                    banned = report.banned.len(),
                    "maintenance evicted peers"
                );
            }
            report
        })
    }

    pub fn peer_count(&self) -> usize {
        self.shared.table.read().peers.len()
    }

    pub fn connected_peer_count(&self) -> usize {
        self.shared.table.read().connected_count()
    }

    pub fn contains(&self, peer_id: PeerId) -> bool {
        self.shared.table.read().peers.contains_key(&peer_id)
    }

    pub fn peer(&self, peer_id: PeerId) -> Option<PeerInfo> {
        self.shared
            .table
            .read()
            .peers
            .get(&peer_id)
            .map(|p| p.info.clone())
    }

    /// Snapshot of all live peers, ordered by id.
    pub fn peers(&self) -> Vec<PeerInfo> {
        let mut out: Vec<PeerInfo> = self
            .shared
            .table
            .read()
            .peers
            .values()
            .map(|p| p.info.clone())
            .collect();
        out.sort_by_key(|p| p.peer_id);
        out
    }

    /// Endpoints of connected peers, for answering peer-list requests.
    pub fn connected_endpoints(&self) -> Vec<(String, u16)> {
        self.peers()
            .into_iter()
            .filter(|p| p.state == PeerState::Connected)
            .map(|p| (p.ip_address, p.port))
            .collect()
    }

    pub fn stats(&self) -> NetworkStats {
        self.shared.table.read().stats
    }

    pub fn status_summary(&self) -> NetworkStatus {
        let table = self.shared.table.read();
        NetworkStatus {
            running: table.running,
            local_id: self.local_id(),
            listen_port: self.listen_port(),
            peer_count: table.peers.len(),
            connected_peers: table.connected_count(),
            max_peers: self.shared.config.max_peers,
            stats: table.stats,
        }
    }
}

impl fmt::Debug for NetworkManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkManager")
            .field("local_id", &self.local_id())
            .field("running", &self.is_running())
            .field("peers", &self.peer_count())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::message::FRAME_HEADER_LEN;
    use std::sync::mpsc;
    use std::time::Duration;

    fn connected(manager: &NetworkManager) -> PeerId {
        let id = manager.try_connect("10.0.0.1", 1).unwrap();
        manager.advance(id).unwrap();
        manager.advance(id).unwrap();
        id
    }

    #[test]
    fn workers_registered_after_stop_are_joined() {
        let manager = NetworkManager::new(NetworkConfig::default());
        assert!(manager.start(1));
        manager.stop();

        let handle = thread::spawn(|| thread::sleep(Duration::from_millis(20)));
        manager.register_worker(handle);
        assert!(manager.shared.workers.lock().is_empty());
    }

    #[test]
    fn full_send_queue_fails_the_peer() {
        let manager = NetworkManager::new(NetworkConfig::default());
        assert!(manager.start(1));
        let id = connected(&manager);
        let (tx, rx) = mpsc::sync_channel(1);
        manager.attach_outbox(id, tx).unwrap();

        manager.send_to(id, &NetworkMessage::heartbeat()).unwrap();
        assert!(matches!(
            manager.send_to(id, &NetworkMessage::heartbeat()),
            Err(P2pError::SendQueueFull(p)) if p == id
        ));
        assert!(!manager.contains(id));

        let stats = manager.stats();
        assert_eq!(stats.messages_sent, 1);
        assert_eq!(stats.dropped_messages, 1);
        assert_eq!(stats.peers_evicted, 1);
        assert_eq!(rx.try_recv().unwrap().len(), FRAME_HEADER_LEN);
    }

    #[test]
    fn broadcast_skips_a_stalled_peer() {
        let manager = NetworkManager::new(NetworkConfig::default());
        assert!(manager.start(1));
        let stalled = connected(&manager);
        let healthy = connected(&manager);
        let (tx, _rx) = mpsc::sync_channel(0);
        manager.attach_outbox(stalled, tx).unwrap();

        assert_eq!(manager.try_broadcast(&NetworkMessage::heartbeat()).unwrap(), 1);
        assert!(!manager.contains(stalled));
        assert_eq!(manager.peer(healthy).unwrap().messages_sent, 1);
    }
}
