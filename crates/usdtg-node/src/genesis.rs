//! Genesis allocation loading.
//!
//! File format: a JSON array of `{ "address", "asset", "amount" }` objects.
//! `asset` defaults to the native asset. Native amounts are decimal strings in
//! whole USDTg (`"1000.5"`); other assets are given in atoms.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use usdtg_core::{Address, Amount, AssetId, Coin, USDTG_DECIMALS, USDTG_DENOM_ID};
use usdtg_state::WorldState;

#[derive(Debug, Deserialize)]
struct Allocation {
    address: String,
    #[serde(default = "native_asset")]
    asset: AssetId,
    amount: String,
}

fn native_asset() -> AssetId {
    USDTG_DENOM_ID
}

fn decimals_for(asset: AssetId) -> u32 {
    if asset == USDTG_DENOM_ID {
        USDTG_DECIMALS
    } else {
        0
    }
}

pub fn parse_allocations(json: &str) -> Result<Vec<(Address, Coin)>> {
    let raw: Vec<Allocation> = serde_json::from_str(json).context("genesis is not valid JSON")?;
    if raw.is_empty() {
        bail!("genesis has no allocations");
    }
    raw.into_iter()
        .enumerate()
        .map(|(i, a)| {
            let address: Address = a
                .address
                .parse()
                .with_context(|| format!("allocation {i}: bad address {:?}", a.address))?;
            let amount = Amount::parse_units(&a.amount, decimals_for(a.asset))
                .with_context(|| format!("allocation {i}: bad amount {:?}", a.amount))?;
            Ok((address, Coin::new(a.asset, amount)))
        })
        .collect()
}

pub fn load_genesis(path: &Path) -> Result<WorldState> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("reading genesis file {}", path.display()))?;
    let allocations = parse_allocations(&json)?;
    WorldState::from_genesis(allocations).context("applying genesis allocations")
}

/// Built-in devnet allocations used when no genesis file is configured.
pub fn devnet_state() -> Result<WorldState> {
    let allocations = [(0xa1, 1000), (0xb0, 500), (0xc4, 250)]
        .into_iter()
        .map(|(seed, units)| (Address::from_seed(seed), Coin::usdtg(Amount::from_units(units))));
    WorldState::from_genesis(allocations).context("applying devnet allocations")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_allocations_from_file() {
        let alice = Address::from_seed(0xaa);
        let bob = Address::from_seed(0xbb);
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[
                {{"address": "{alice}", "amount": "1000.5"}},
                {{"address": "0x{bob}", "asset": 7, "amount": "42"}}
            ]"#
        )
        .unwrap();

        let state = load_genesis(file.path()).unwrap();
        assert_eq!(
            state.get_balance(&alice, USDTG_DENOM_ID),
            Amount::parse_units("1000.5", USDTG_DECIMALS).unwrap()
        );
        assert_eq!(state.get_balance(&bob, 7), Amount::from_atoms(42));
        assert_eq!(state.account_count(), 2);
    }

    #[test]
    fn rejects_bad_entries() {
        assert!(parse_allocations("[]").is_err());
        assert!(parse_allocations(r#"[{"address": "abcd", "amount": "1"}]"#).is_err());
        let addr = Address::from_seed(1);
        let negative = format!(r#"[{{"address": "{addr}", "amount": "-5"}}]"#);
        assert!(parse_allocations(&negative).is_err());
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_genesis(&dir.path().join("nope.json")).unwrap_err();
        assert!(err.to_string().contains("reading genesis file"));
    }

    #[test]
    fn devnet_supply() {
        let state = devnet_state().unwrap();
        assert_eq!(state.total_supply(USDTG_DENOM_ID), Amount::from_units(1750));
    }
}
