#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! USDTg world state.
//!
//! Responsibilities:
//! - Own every account and its per-asset balances
//! - Apply value transfers atomically, never producing negative balances
//! - Carry per-account spending limits (stored, not enforced)
//! - Derive a deterministic state root for auditing
//!
//! The state is purely in memory. Persistence and replay protection belong to
//! the layers that embed it.

pub mod account;
pub mod error;
pub mod merkle;
pub mod world;

pub use account::*;
pub use error::*;
pub use merkle::*;
pub use world::*;
