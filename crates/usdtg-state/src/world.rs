//! The world state: every account, sharded behind reader/writer locks.
//!
//! Locking discipline:
//! - an address always lives in the same shard
//! - a transfer write-locks the shards of both parties, lowest index first
//! - whole-ledger reads take every shard's read lock, lowest index first
//!
//! With a single global order no two operations can wait on each other in a
//! cycle, transfers touching disjoint shards run in parallel, and no reader
//! ever sees a debit without its matching credit.

use std::collections::BTreeMap;
use std::fmt;

use hashbrown::HashMap;
use parking_lot::{RwLock, RwLockReadGuard};
use tracing::{debug, error};

use usdtg_core::{
    hash32, to_bytes, Address, Amount, AssetId, Coin, Hash32, DS_ACCOUNT, USDTG_DECIMALS,
    USDTG_DENOM_ID, USDTG_SYMBOL,
};

use crate::account::{Account, SpendingLimit};
use crate::error::LedgerError;
use crate::merkle::{merkle_root, Leaf};

/// Shard count used by [`WorldState::new`].
pub const DEFAULT_SHARDS: usize = 16;

type AccountMap = HashMap<Address, Account>;

/// Authoritative mapping from address to account.
#[derive(Debug)]
pub struct WorldState {
    shards: Box<[RwLock<AccountMap>]>,
}

impl WorldState {
    /// Empty state with [`DEFAULT_SHARDS`] shards.
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }

    /// Empty state with `count` shards (at least one).
    ///
    /// One shard degenerates to a single global lock.
    pub fn with_shards(count: usize) -> Self {
        let shards = (0..count.max(1))
            .map(|_| RwLock::new(AccountMap::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self { shards }
    }

    /// Build a state from genesis allocations.
    ///
    /// Allocations for the same address and asset overwrite each other.
    pub fn from_genesis<I>(allocations: I) -> Result<Self, LedgerError>
    where
        I: IntoIterator<Item = (Address, Coin)>,
    {
        let state = Self::new();
        for (address, coin) in allocations {
            state.set_balance(&address, coin.denom_id, coin.amount)?;
        }
        Ok(state)
    }

    fn shard_index(&self, address: &Address) -> usize {
        let folded = address
            .as_bytes()
            .iter()
            .fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(u64::from(*b)));
        (folded % self.shards.len() as u64) as usize
    }

    fn read_all(&self) -> Vec<RwLockReadGuard<'_, AccountMap>> {
        self.shards.iter().map(|shard| shard.read()).collect()
    }

    /// Balance of `asset` held by `address`; zero for unknown accounts.
    ///
    /// Never creates an account.
    pub fn get_balance(&self, address: &Address, asset: AssetId) -> Amount {
        self.shards[self.shard_index(address)]
            .read()
            .get(address)
            .map(|acc| acc.balance(asset))
            .unwrap_or_default()
    }

    /// Administrative balance set used for genesis allocation.
    ///
    /// Bypasses conservation entirely; callers must be trusted
    /// initialization code. Creates the account if needed.
    pub fn set_balance(
        &self,
        address: &Address,
        asset: AssetId,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        if amount.is_negative() {
            return Err(LedgerError::InvalidAmount(amount));
        }
        let mut shard = self.shards[self.shard_index(address)].write();
        shard.entry(*address).or_default().put_balance(asset, amount);
        debug!(address = %address.short(), asset, atoms = %amount.atoms(), "balance set");
        Ok(())
    }

    /// Move `amount` of `asset` from `from` to `to` atomically.
    ///
    /// Fails without side effects when `from` was never created, holds too
    /// little, the amount is negative, or the credit would overflow. On
    /// success `to` is created if needed and `from`'s nonce is bumped.
    pub fn transfer(
        &self,
        from: &Address,
        to: &Address,
        asset: AssetId,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        if amount.is_negative() {
            return Err(LedgerError::InvalidAmount(amount));
        }

        let from_idx = self.shard_index(from);
        let to_idx = self.shard_index(to);

        let result = if from_idx == to_idx {
            let mut shard = self.shards[from_idx].write();
            transfer_in_shard(&mut shard, from, to, asset, amount)
        } else {
            let (low, high) = (from_idx.min(to_idx), from_idx.max(to_idx));
            let mut low_guard = self.shards[low].write();
            let mut high_guard = self.shards[high].write();
            let (from_map, to_map) = if from_idx < to_idx {
                (&mut *low_guard, &mut *high_guard)
            } else {
                (&mut *high_guard, &mut *low_guard)
            };
            transfer_across_shards(from_map, to_map, from, to, asset, amount)
        };

        match &result {
            Ok(()) => debug!(
                from = %from.short(),
                to = %to.short(),
                asset,
                atoms = %amount.atoms(),
                "transfer applied"
            ),
            Err(e) => debug!(from = %from.short(), to = %to.short(), asset, "transfer rejected: {e}"),
        }
        result
    }

    /// [`WorldState::transfer`] taking a [`Coin`].
    pub fn transfer_coin(&self, from: &Address, to: &Address, coin: &Coin) -> Result<(), LedgerError> {
        self.transfer(from, to, coin.denom_id, coin.amount)
    }

    /// Attach or replace an account's spending limit, creating the account.
    ///
    /// The limit is stored only; transfers do not consult it.
    pub fn set_spending_limit(
        &self,
        address: &Address,
        limit: SpendingLimit,
    ) -> Result<(), LedgerError> {
        if !limit.is_valid() {
            return Err(LedgerError::InvalidSpendingLimit);
        }
        let mut shard = self.shards[self.shard_index(address)].write();
        shard.entry(*address).or_default().spending_limit = Some(limit);
        debug!(address = %address.short(), %limit, "spending limit set");
        Ok(())
    }

    /// Spending limit attached to `address`, if any.
    pub fn spending_limit(&self, address: &Address) -> Option<SpendingLimit> {
        self.shards[self.shard_index(address)]
            .read()
            .get(address)
            .and_then(|acc| acc.spending_limit)
    }

    /// Whether `address` has ever been created.
    pub fn account_exists(&self, address: &Address) -> bool {
        self.shards[self.shard_index(address)]
            .read()
            .contains_key(address)
    }

    /// Snapshot copy of an account.
    pub fn account(&self, address: &Address) -> Option<Account> {
        self.shards[self.shard_index(address)]
            .read()
            .get(address)
            .cloned()
    }

    /// Nonce of `address`; zero for unknown accounts.
    pub fn nonce(&self, address: &Address) -> u64 {
        self.shards[self.shard_index(address)]
            .read()
            .get(address)
            .map(|acc| acc.nonce)
            .unwrap_or(0)
    }

    /// Number of accounts ever created.
    pub fn account_count(&self) -> usize {
        self.read_all().iter().map(|shard| shard.len()).sum()
    }

    /// Sum of `asset` over all accounts, taken from one consistent view.
    pub fn total_supply(&self, asset: AssetId) -> Amount {
        let shards = self.read_all();
        let total = shards
            .iter()
            .flat_map(|shard| shard.values())
            .fold(0i128, |acc, account| acc.saturating_add(account.balance(asset).atoms()));
        Amount::from_atoms(total)
    }

    /// Supply of every asset held by anyone.
    pub fn asset_supplies(&self) -> BTreeMap<AssetId, Amount> {
        let shards = self.read_all();
        let mut out: BTreeMap<AssetId, Amount> = BTreeMap::new();
        for coin in shards.iter().flat_map(|s| s.values()).flat_map(|a| a.balances()) {
            let entry = out.entry(coin.denom_id).or_default();
            *entry = Amount::from_atoms(entry.atoms().saturating_add(coin.amount.atoms()));
        }
        out
    }

    /// Merkle root over `(address, account)` records in ascending address order.
    pub fn state_root(&self) -> Result<Hash32, LedgerError> {
        let shards = self.read_all();
        let ordered: BTreeMap<&Address, &Account> =
            shards.iter().flat_map(|shard| shard.iter()).collect();

        let mut leaves: Vec<Leaf> = Vec::with_capacity(ordered.len());
        for (address, account) in ordered {
            let mut bytes = to_bytes(address)?;
            bytes.extend_from_slice(&to_bytes(account)?);
            leaves.push(*hash32(DS_ACCOUNT, &bytes).as_bytes());
        }
        Ok(merkle_root(&leaves))
    }

    /// Aggregate figures for logs and status output.
    pub fn summary(&self) -> StateSummary {
        let supplies = self.asset_supplies();
        StateSummary {
            accounts: self.account_count(),
            native_supply: supplies.get(&USDTG_DENOM_ID).copied().unwrap_or_default(),
            supplies,
        }
    }

    /// Scan every account for stored-data corruption.
    ///
    /// Any hit means the ledger can no longer be trusted; it is logged at
    /// error level and returned as [`LedgerError::InvariantViolation`].
    pub fn verify_invariants(&self) -> Result<(), LedgerError> {
        for shard in self.read_all().iter() {
            for (address, account) in shard.iter() {
                if let Some(problem) = account.consistency_error() {
                    error!(address = %address, "ledger corruption: {problem}");
                    return Err(LedgerError::InvariantViolation(format!("{address}: {problem}")));
                }
            }
        }
        Ok(())
    }
}

impl Default for WorldState {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate a transfer against the sender's balance and the receiver's
/// current balance, returning both post-transfer balances.
fn plan_transfer(
    from_account: &Account,
    to_balance: Amount,
    from: &Address,
    asset: AssetId,
    amount: Amount,
) -> Result<(Amount, Amount), LedgerError> {
    let available = from_account.balance(asset);
    if available < amount {
        return Err(LedgerError::InsufficientFunds {
            address: *from,
            asset,
            available,
            required: amount,
        });
    }
    let new_from = available.checked_sub(amount)?;
    let new_to = to_balance.checked_add(amount)?;
    debug_assert!(!new_from.is_negative() && !new_to.is_negative());
    Ok((new_from, new_to))
}

fn transfer_in_shard(
    shard: &mut AccountMap,
    from: &Address,
    to: &Address,
    asset: AssetId,
    amount: Amount,
) -> Result<(), LedgerError> {
    let from_account = shard.get(from).ok_or(LedgerError::UnknownAccount(*from))?;

    if from == to {
        // Self-transfer: funds must exist but balances do not move.
        if !from_account.has_balance(asset, amount) {
            return Err(LedgerError::InsufficientFunds {
                address: *from,
                asset,
                available: from_account.balance(asset),
                required: amount,
            });
        }
        if let Some(account) = shard.get_mut(from) {
            account.bump_nonce();
        }
        return Ok(());
    }

    let to_balance = shard.get(to).map(|a| a.balance(asset)).unwrap_or_default();
    let (new_from, new_to) = plan_transfer(from_account, to_balance, from, asset, amount)?;

    let sender = shard.get_mut(from).ok_or(LedgerError::UnknownAccount(*from))?;
    sender.put_balance(asset, new_from);
    sender.bump_nonce();
    shard.entry(*to).or_default().put_balance(asset, new_to);
    Ok(())
}

fn transfer_across_shards(
    from_map: &mut AccountMap,
    to_map: &mut AccountMap,
    from: &Address,
    to: &Address,
    asset: AssetId,
    amount: Amount,
) -> Result<(), LedgerError> {
    let sender = from_map.get_mut(from).ok_or(LedgerError::UnknownAccount(*from))?;
    let to_balance = to_map.get(to).map(|a| a.balance(asset)).unwrap_or_default();
    let (new_from, new_to) = plan_transfer(sender, to_balance, from, asset, amount)?;

    sender.put_balance(asset, new_from);
    sender.bump_nonce();
    to_map.entry(*to).or_default().put_balance(asset, new_to);
    Ok(())
}

/// Aggregate ledger figures.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateSummary {
    /// Number of accounts.
    pub accounts: usize,
    /// Total native supply.
    pub native_supply: Amount,
    /// Supply per asset.
    pub supplies: BTreeMap<AssetId, Amount>,
}

impl fmt::Display for StateSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "WorldState Summary:")?;
        writeln!(f, "  Total Accounts: {}", self.accounts)?;
        writeln!(
            f,
            "  Total {USDTG_SYMBOL} Supply: {} {USDTG_SYMBOL}",
            self.native_supply.format_units(USDTG_DECIMALS)
        )?;
        for (asset, supply) in self.supplies.iter().filter(|(a, _)| **a != USDTG_DENOM_ID) {
            writeln!(f, "  Asset {asset} Supply: {} atoms", supply.atoms())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_map_to_stable_shards() {
        let state = WorldState::with_shards(4);
        let addr = Address::from_seed(0x42);
        assert_eq!(state.shard_index(&addr), state.shard_index(&addr));
        assert!(state.shard_index(&addr) < 4);
    }

    #[test]
    fn zero_shards_falls_back_to_one() {
        let state = WorldState::with_shards(0);
        assert_eq!(state.shards.len(), 1);
    }

    #[test]
    fn stored_zero_entry_is_reported() {
        let state = WorldState::with_shards(1);
        let addr = Address::from_seed(1);
        state.shards[0]
            .write()
            .entry(addr)
            .or_default()
            .balances_mut_for_test()
            .insert(USDTG_DENOM_ID, Amount::zero());
        assert!(matches!(
            state.verify_invariants(),
            Err(LedgerError::InvariantViolation(_))
        ));
    }
}
