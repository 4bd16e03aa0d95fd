#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! USDTg peer-to-peer layer.
//!
//! [`NetworkManager`] owns the peer table and every state transition; the
//! [`transport`] module drives it from real TCP sockets. The manager can be
//! exercised without sockets by calling its transition methods directly.

pub mod config;
pub mod error;
pub mod manager;
pub mod message;
pub mod peer;
pub mod transport;

pub use config::*;
pub use error::*;
pub use manager::*;
pub use message::*;
pub use peer::*;
