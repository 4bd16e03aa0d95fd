//! Account model: nonce, multi-asset balances and an optional spending limit.

use std::collections::BTreeMap;
use std::fmt;

use borsh::{BorshDeserialize, BorshSerialize};
use usdtg_core::{Amount, AssetId, Coin, USDTG_DECIMALS, USDTG_SYMBOL};

/// Daily and monthly spending caps attached to an account.
///
/// A limit of zero means "unlimited" for that period. The ledger only stores
/// this structure; checking it and rolling periods over is up to the
/// account's controller.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct SpendingLimit {
    /// Maximum native amount spendable per day (0 = unlimited).
    pub daily_limit: Amount,
    /// Maximum native amount spendable per month (0 = unlimited).
    pub monthly_limit: Amount,
    /// Amount spent in the current day.
    pub spent_today: Amount,
    /// Amount spent in the current month.
    pub spent_this_month: Amount,
}

impl SpendingLimit {
    /// Fresh limit with nothing spent yet.
    pub const fn new(daily_limit: Amount, monthly_limit: Amount) -> Self {
        Self {
            daily_limit,
            monthly_limit,
            spent_today: Amount::zero(),
            spent_this_month: Amount::zero(),
        }
    }

    /// No caps in either period.
    pub const fn unlimited() -> Self {
        Self::new(Amount::zero(), Amount::zero())
    }

    /// All fields must be non-negative.
    pub fn is_valid(&self) -> bool {
        !(self.daily_limit.is_negative()
            || self.monthly_limit.is_negative()
            || self.spent_today.is_negative()
            || self.spent_this_month.is_negative())
    }

    /// Remaining daily allowance; `None` when the day is uncapped.
    pub fn remaining_daily(&self) -> Option<Amount> {
        remaining(self.daily_limit, self.spent_today)
    }

    /// Remaining monthly allowance; `None` when the month is uncapped.
    pub fn remaining_monthly(&self) -> Option<Amount> {
        remaining(self.monthly_limit, self.spent_this_month)
    }
}

fn remaining(limit: Amount, spent: Amount) -> Option<Amount> {
    if limit.is_zero() {
        return None;
    }
    Some(Amount::from_atoms((limit.atoms() - spent.atoms()).max(0)))
}

impl fmt::Display for SpendingLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let render = |limit: Amount| {
            if limit.is_zero() {
                "unlimited".to_string()
            } else {
                format!("{} {USDTG_SYMBOL}", limit.format_units(USDTG_DECIMALS))
            }
        };
        write!(
            f,
            "SpendingLimit{{daily: {}, monthly: {}}}",
            render(self.daily_limit),
            render(self.monthly_limit)
        )
    }
}

/// A ledger account.
///
/// Balances are keyed by asset; an asset with a zero balance has no entry, so
/// a never-funded asset and a drained one are indistinguishable.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Account {
    /// Count of successful outgoing transfers.
    ///
    /// Informational only: nothing checks it, so it offers no replay protection.
    pub nonce: u64,
    balances: BTreeMap<AssetId, Amount>,
    /// Optional spending caps.
    pub spending_limit: Option<SpendingLimit>,
}

impl Account {
    /// Empty account.
    pub fn new() -> Self {
        Self::default()
    }

    /// Balance of `asset`, zero if none is held.
    pub fn balance(&self, asset: AssetId) -> Amount {
        self.balances.get(&asset).copied().unwrap_or_default()
    }

    /// Non-zero balances in ascending asset order.
    pub fn balances(&self) -> impl Iterator<Item = Coin> + '_ {
        self.balances
            .iter()
            .map(|(asset, amount)| Coin::new(*asset, *amount))
    }

    /// Whether the account holds at least `amount` of `asset`.
    pub fn has_balance(&self, asset: AssetId, amount: Amount) -> bool {
        self.balance(asset) >= amount
    }

    /// Store a balance, dropping the entry when it reaches zero.
    pub(crate) fn put_balance(&mut self, asset: AssetId, amount: Amount) {
        if amount.is_zero() {
            self.balances.remove(&asset);
        } else {
            self.balances.insert(asset, amount);
        }
    }

    pub(crate) fn bump_nonce(&mut self) {
        self.nonce = self.nonce.saturating_add(1);
    }

    #[cfg(test)]
    pub(crate) fn balances_mut_for_test(&mut self) -> &mut BTreeMap<AssetId, Amount> {
        &mut self.balances
    }

    /// Describe the first stored-data inconsistency, if any.
    pub(crate) fn consistency_error(&self) -> Option<String> {
        for (asset, amount) in &self.balances {
            if amount.is_negative() {
                return Some(format!("asset {asset} has negative balance {amount:?}"));
            }
            if amount.is_zero() {
                return Some(format!("asset {asset} stores a zero balance entry"));
            }
        }
        match &self.spending_limit {
            Some(limit) if !limit.is_valid() => Some("spending limit has negative fields".into()),
            _ => None,
        }
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Account{{nonce: {}, balances: {{", self.nonce)?;
        for (i, coin) in self.balances().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{coin}")?;
        }
        f.write_str("}")?;
        if let Some(limit) = &self.spending_limit {
            write!(f, ", limit: {limit}")?;
        }
        f.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use usdtg_core::USDTG_DENOM_ID;

    #[test]
    fn zero_balance_leaves_no_entry() {
        let mut acc = Account::new();
        acc.put_balance(USDTG_DENOM_ID, Amount::from_units(5));
        acc.put_balance(USDTG_DENOM_ID, Amount::zero());
        assert_eq!(acc.balances().count(), 0);
        assert_eq!(acc, Account::new());
    }

    #[test]
    fn remaining_allowance_treats_zero_as_unlimited() {
        let mut limit = SpendingLimit::new(Amount::from_units(100), Amount::zero());
        limit.spent_today = Amount::from_units(30);
        assert_eq!(limit.remaining_daily(), Some(Amount::from_units(70)));
        assert_eq!(limit.remaining_monthly(), None);

        limit.spent_today = Amount::from_units(130);
        assert_eq!(limit.remaining_daily(), Some(Amount::zero()));
    }

    #[test]
    fn limit_display_matches_units() {
        let limit = SpendingLimit::new(Amount::from_units(100), Amount::zero());
        assert_eq!(
            limit.to_string(),
            "SpendingLimit{daily: 100.000000000000000000 USDTg, monthly: unlimited}"
        );
    }

    #[test]
    fn negative_limit_is_invalid() {
        let limit = SpendingLimit::new(Amount::from_atoms(-1), Amount::zero());
        assert!(!limit.is_valid());
        assert!(SpendingLimit::unlimited().is_valid());
    }
}
