//! Ledger errors.

use thiserror::Error;
use usdtg_core::{Address, Amount, AssetId, CoreError};

/// Errors produced by ledger queries or transitions.
///
/// Every variant except [`LedgerError::InvariantViolation`] is an expected,
/// recoverable outcome that callers handle locally.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The source account holds less than the requested amount.
    #[error("insufficient funds in {address}: asset {asset} has {available:?}, needs {required:?}")]
    InsufficientFunds {
        /// Debited account.
        address: Address,
        /// Asset being moved.
        asset: AssetId,
        /// Balance at the time of the attempt.
        available: Amount,
        /// Requested amount.
        required: Amount,
    },

    /// The source account has never been created.
    #[error("unknown account {0}")]
    UnknownAccount(Address),

    /// A negative amount was supplied where only non-negative ones are valid.
    #[error("invalid amount {0:?}: must be non-negative")]
    InvalidAmount(Amount),

    /// A spending limit carried negative fields.
    #[error("invalid spending limit")]
    InvalidSpendingLimit,

    /// Core type failure (arithmetic overflow, encoding).
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Internal consistency check failed; the state must not be trusted.
    #[error("ledger invariant violated: {0}")]
    InvariantViolation(String),
}
