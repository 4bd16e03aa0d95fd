//! Canonical encoding and hashing.
//!
//! Anything that is hashed (state-root leaves) or sent to peers (handshake,
//! peer lists) is encoded with Borsh; JSON is only for operator-facing files.

use crate::types::{CoreError, Hash32};
use borsh::{BorshDeserialize, BorshSerialize};

/// Encode a value with canonical Borsh encoding.
pub fn to_bytes<T: BorshSerialize>(value: &T) -> Result<Vec<u8>, CoreError> {
    borsh::to_vec(value).map_err(|_| CoreError::InvalidValue("borsh encoding failed"))
}

/// Decode a Borsh value, rejecting trailing bytes.
pub fn from_bytes<T: BorshDeserialize>(bytes: &[u8]) -> Result<T, CoreError> {
    T::try_from_slice(bytes).map_err(|_| CoreError::InvalidValue("borsh decoding failed"))
}

/// blake3 over `domain_sep || bytes`.
pub fn hash32(domain_sep: &[u8], bytes: &[u8]) -> Hash32 {
    let digest = blake3::Hasher::new()
        .update(domain_sep)
        .update(bytes)
        .finalize();
    Hash32(*digest.as_bytes())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{Address, Amount, Coin};

    #[test]
    fn domain_separation_changes_digest() {
        assert_ne!(hash32(b"A", b"payload"), hash32(b"B", b"payload"));
        assert_eq!(hash32(b"A", b"payload"), hash32(b"A", b"payload"));
    }

    #[test]
    fn borsh_round_trip_is_exact() {
        let coin = Coin::usdtg(Amount::from_units(3));
        let bytes = to_bytes(&coin).unwrap();
        assert_eq!(from_bytes::<Coin>(&bytes).unwrap(), coin);

        let mut padded = to_bytes(&Address::from_seed(1)).unwrap();
        padded.push(0);
        assert!(from_bytes::<Address>(&padded).is_err());
    }
}
