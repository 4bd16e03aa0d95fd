//! Protocol-wide constants for the USDTg ledger.

/// Protocol semantic version.
pub const PROTOCOL_VERSION: u16 = 1;

/// Length in bytes of a 32-byte hash.
pub const HASH32_LEN: usize = 32;

/// Length in bytes of an account address.
pub const ADDRESS_LEN: usize = 20;

/// Asset identifier of the native USDTg token.
pub const USDTG_DENOM_ID: u32 = 1;

/// Number of decimal places of the native token.
pub const USDTG_DECIMALS: u32 = 18;

/// Number of atomic units per one USDTg.
///
/// 1 USDTg = 10^18 atoms.
pub const ATOMS_PER_USDTG: i128 = 1_000_000_000_000_000_000;

/// Ticker used when rendering native amounts.
pub const USDTG_SYMBOL: &str = "USDTg";

/// Human-readable prefix used when rendering addresses.
pub const ADDRESS_PREFIX: &str = "usdtg1";

/// Domain separator used when hashing account records into the state tree.
///
/// Prevents cross-domain hash collisions.
pub const DS_ACCOUNT: &[u8] = b"USDTG::ACCOUNT::V1";
