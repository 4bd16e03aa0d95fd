//! Canonical ledger types.
//!
//! Everything here is borsh-encodable so the state layer can hash accounts
//! deterministically. Amounts are signed fixed-point integers; the sign exists
//! so administrative tooling can represent deltas, but stored balances are
//! never negative.

use crate::constants::*;
use borsh::{BorshDeserialize, BorshSerialize};
use core::fmt;
use core::str::FromStr;

/// Errors related to parsing, validation, or construction of core types.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Hex string had an unexpected byte length.
    #[error("invalid hex length: expected {expected} bytes, got {got} bytes")]
    InvalidHexLength {
        /// Expected number of bytes.
        expected: usize,
        /// Actual number of bytes provided.
        got: usize,
    },

    /// Hex decoding failed.
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    /// Arithmetic overflow or underflow occurred.
    #[error("amount overflow or underflow")]
    AmountOverflow,

    /// An amount string could not be parsed.
    #[error("invalid amount: {0}")]
    InvalidAmount(&'static str),

    /// A value violated protocol constraints.
    #[error("invalid value: {0}")]
    InvalidValue(&'static str),
}

fn decode_fixed<const N: usize>(s: &str) -> Result<[u8; N], CoreError> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(s)?;
    if bytes.len() != N {
        return Err(CoreError::InvalidHexLength {
            expected: N,
            got: bytes.len(),
        });
    }
    let mut arr = [0u8; N];
    arr.copy_from_slice(&bytes);
    Ok(arr)
}

/// Fixed-size 32-byte hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub struct Hash32(pub [u8; HASH32_LEN]);

impl Hash32 {
    /// Returns an all-zero hash.
    pub const fn zero() -> Self {
        Self([0u8; HASH32_LEN])
    }

    /// Returns the underlying byte array.
    pub const fn as_bytes(&self) -> &[u8; HASH32_LEN] {
        &self.0
    }
}

impl fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash32({})", hex::encode(self.0))
    }
}

impl fmt::Display for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl From<[u8; HASH32_LEN]> for Hash32 {
    fn from(value: [u8; HASH32_LEN]) -> Self {
        Self(value)
    }
}

impl FromStr for Hash32 {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_fixed::<HASH32_LEN>(s).map(Self)
    }
}

/// 20-byte account address.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize,
)]
pub struct Address(pub [u8; ADDRESS_LEN]);

impl Address {
    /// Returns an all-zero address.
    pub const fn zero() -> Self {
        Self([0u8; ADDRESS_LEN])
    }

    /// Address with every byte set to `seed`.
    ///
    /// Deterministic helper for genesis fixtures and tests; real addresses
    /// come from key material.
    pub const fn from_seed(seed: u8) -> Self {
        Self([seed; ADDRESS_LEN])
    }

    /// Returns the underlying byte array.
    pub const fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }

    /// Abbreviated form for logs, e.g. `usdtg1aaaaaaaa...`.
    pub fn short(&self) -> String {
        format!("{ADDRESS_PREFIX}{}...", hex::encode(&self.0[..4]))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", hex::encode(self.0))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl From<[u8; ADDRESS_LEN]> for Address {
    fn from(value: [u8; ADDRESS_LEN]) -> Self {
        Self(value)
    }
}

impl FromStr for Address {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_fixed::<ADDRESS_LEN>(s).map(Self)
    }
}

/// Identifier of a fungible asset ("denom").
pub type AssetId = u32;

/// Signed fixed-point amount expressed in atoms of its asset.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize,
)]
pub struct Amount(pub i128);

impl Amount {
    /// Returns a zero amount.
    pub const fn zero() -> Self {
        Self(0)
    }

    /// Constructs an amount from atoms.
    pub const fn from_atoms(atoms: i128) -> Self {
        Self(atoms)
    }

    /// Constructs a native amount from whole USDTg.
    ///
    /// Cannot overflow: `i64::MAX * 10^18` fits in `i128`.
    pub const fn from_units(units: i64) -> Self {
        Self(units as i128 * ATOMS_PER_USDTG)
    }

    /// Returns the underlying atom value.
    pub const fn atoms(self) -> i128 {
        self.0
    }

    /// Whether the amount is zero.
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Whether the amount is below zero.
    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Checked addition.
    pub fn checked_add(self, other: Amount) -> Result<Self, CoreError> {
        self.0
            .checked_add(other.0)
            .map(Self)
            .ok_or(CoreError::AmountOverflow)
    }

    /// Checked subtraction.
    pub fn checked_sub(self, other: Amount) -> Result<Self, CoreError> {
        self.0
            .checked_sub(other.0)
            .map(Self)
            .ok_or(CoreError::AmountOverflow)
    }

    /// Parse a non-negative decimal string (`"12.5"`) scaled by `decimals`.
    pub fn parse_units(s: &str, decimals: u32) -> Result<Self, CoreError> {
        let s = s.trim();
        if s.starts_with('-') {
            return Err(CoreError::InvalidAmount("amount must be non-negative"));
        }
        let (whole, frac) = s.split_once('.').unwrap_or((s, ""));
        if whole.is_empty() && frac.is_empty() {
            return Err(CoreError::InvalidAmount("empty amount"));
        }
        let digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        if !digits(whole) || !digits(frac) {
            return Err(CoreError::InvalidAmount("not a decimal number"));
        }
        if frac.len() > decimals as usize {
            return Err(CoreError::InvalidAmount("too many decimal places"));
        }

        let scale = 10i128
            .checked_pow(decimals)
            .ok_or(CoreError::AmountOverflow)?;
        let whole_atoms = if whole.is_empty() {
            0
        } else {
            whole
                .parse::<i128>()
                .map_err(|_| CoreError::AmountOverflow)?
        };
        let frac_atoms = if frac.is_empty() {
            0
        } else {
            format!("{frac:0<width$}", width = decimals as usize)
                .parse::<i128>()
                .map_err(|_| CoreError::AmountOverflow)?
        };

        whole_atoms
            .checked_mul(scale)
            .and_then(|w| w.checked_add(frac_atoms))
            .map(Self)
            .ok_or(CoreError::AmountOverflow)
    }

    /// Render with a fixed number of decimal places, without going through floats.
    pub fn format_units(self, decimals: u32) -> String {
        let scale = match 10u128.checked_pow(decimals) {
            Some(scale) if decimals > 0 => scale,
            _ => return self.0.to_string(),
        };
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        format!(
            "{sign}{}.{:0width$}",
            abs / scale,
            abs % scale,
            width = decimals as usize
        )
    }
}

impl fmt::Debug for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Amount({} atoms)", self.0)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} atoms", self.0)
    }
}

/// A quantity of a specific asset.
#[derive(Clone, Copy, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct Coin {
    /// Asset identifier.
    pub denom_id: AssetId,
    /// Quantity in atoms.
    pub amount: Amount,
}

impl Coin {
    /// Construct a coin of any asset.
    pub const fn new(denom_id: AssetId, amount: Amount) -> Self {
        Self { denom_id, amount }
    }

    /// Construct a native USDTg coin.
    pub const fn usdtg(amount: Amount) -> Self {
        Self::new(USDTG_DENOM_ID, amount)
    }

    /// Whether this coin is the native asset.
    pub const fn is_usdtg(&self) -> bool {
        self.denom_id == USDTG_DENOM_ID
    }
}

impl fmt::Display for Coin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_usdtg() {
            write!(
                f,
                "{} {USDTG_SYMBOL}",
                self.amount.format_units(USDTG_DECIMALS)
            )
        } else {
            write!(f, "{} (denom:{})", self.amount.atoms(), self.denom_id)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn address_hex_roundtrip_accepts_prefix() {
        let addr = Address::from_seed(0xaa);
        let parsed: Address = format!("0x{addr}").parse().unwrap();
        assert_eq!(parsed, addr);
        assert_eq!(addr.short(), "usdtg1aaaaaaaa...");
    }

    #[test]
    fn address_rejects_wrong_length() {
        let err = "aabb".parse::<Address>().unwrap_err();
        assert!(matches!(
            err,
            CoreError::InvalidHexLength {
                expected: 20,
                got: 2
            }
        ));
    }

    #[test]
    fn parse_units_scales_fraction() {
        let a = Amount::parse_units("12.5", USDTG_DECIMALS).unwrap();
        assert_eq!(a, Amount::from_atoms(12 * ATOMS_PER_USDTG + ATOMS_PER_USDTG / 2));
        assert_eq!(Amount::parse_units("1000", 18).unwrap(), Amount::from_units(1000));
        assert_eq!(Amount::parse_units(".25", 2).unwrap(), Amount::from_atoms(25));
    }

    #[test]
    fn parse_units_rejects_garbage() {
        assert!(Amount::parse_units("-1", 18).is_err());
        assert!(Amount::parse_units("1.234", 2).is_err());
        assert!(Amount::parse_units("1e5", 18).is_err());
        assert!(Amount::parse_units("", 18).is_err());
    }

    #[test]
    fn coin_display_is_exact() {
        let native = Coin::usdtg(Amount::from_units(1000));
        assert_eq!(native.to_string(), "1000.000000000000000000 USDTg");

        let other = Coin::new(7, Amount::from_atoms(42));
        assert_eq!(other.to_string(), "42 (denom:7)");
    }

    #[test]
    fn checked_math_reports_overflow() {
        let max = Amount::from_atoms(i128::MAX);
        assert!(matches!(
            max.checked_add(Amount::from_atoms(1)),
            Err(CoreError::AmountOverflow)
        ));
    }
}
