use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::P2pError;

/// Tunables for [`crate::NetworkManager`].
///
/// Missing fields fall back to their defaults when deserialized.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Maximum live peers, inbound and outbound combined.
    pub max_peers: usize,
    pub handshake_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub heartbeat_interval_secs: u64,
    /// Inbound messages accepted per peer per one-second window.
    pub max_messages_per_second: u32,
    /// Peers whose reputation falls below this are banned.
    pub min_reputation: i32,
    pub max_gossip_hops: u8,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            max_peers: 50,
            handshake_timeout_secs: 10,
            idle_timeout_secs: 120,
            heartbeat_interval_secs: 30,
            max_messages_per_second: 100,
            min_reputation: -500,
            max_gossip_hops: 5,
        }
    }
}

impl NetworkConfig {
    pub fn with_max_peers(mut self, max_peers: usize) -> Self {
        self.max_peers = max_peers;
        self
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn validate(&self) -> Result<(), P2pError> {
        if self.max_peers == 0 {
            return Err(P2pError::Config("max_peers must be at least 1"));
        }
        if self.max_messages_per_second == 0 {
            return Err(P2pError::Config("max_messages_per_second must be at least 1"));
        }
        if self.handshake_timeout_secs == 0 || self.idle_timeout_secs == 0 {
            return Err(P2pError::Config("timeouts must be non-zero"));
        }
        Ok(())
    }
}
