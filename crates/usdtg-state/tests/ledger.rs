use usdtg_core::{Address, Amount, Coin, USDTG_DENOM_ID};
use usdtg_state::{LedgerError, SpendingLimit, WorldState};

const USDTG: u32 = USDTG_DENOM_ID;
const OTHER_ASSET: u32 = 7;

fn alice() -> Address {
    Address::from_seed(0xa1)
}

fn bob() -> Address {
    Address::from_seed(0xb0)
}

fn charlie() -> Address {
    Address::from_seed(0xc4)
}

fn units(n: i64) -> Amount {
    Amount::from_units(n)
}

fn genesis() -> WorldState {
    WorldState::from_genesis([
        (alice(), Coin::usdtg(units(1000))),
        (bob(), Coin::usdtg(units(500))),
        (charlie(), Coin::usdtg(units(250))),
    ])
    .expect("genesis")
}

#[test]
fn genesis_scenario_and_transfers_conserve_supply() {
    let state = genesis();
    assert_eq!(state.total_supply(USDTG), units(1750));

    state
        .transfer(&alice(), &bob(), USDTG, units(100))
        .expect("alice -> bob");
    assert_eq!(state.get_balance(&alice(), USDTG), units(900));
    assert_eq!(state.get_balance(&bob(), USDTG), units(600));
    assert_eq!(state.total_supply(USDTG), units(1750));

    state
        .transfer(&bob(), &charlie(), USDTG, units(50))
        .expect("bob -> charlie");
    assert_eq!(state.get_balance(&bob(), USDTG), units(550));
    assert_eq!(state.get_balance(&charlie(), USDTG), units(300));
    assert_eq!(state.total_supply(USDTG), units(1750));

    let err = state
        .transfer(&charlie(), &alice(), USDTG, units(1000))
        .expect_err("charlie is short");
    assert!(matches!(
        err,
        LedgerError::InsufficientFunds { available, required, .. }
            if available == units(300) && required == units(1000)
    ));
    assert_eq!(state.get_balance(&charlie(), USDTG), units(300));
    assert_eq!(state.get_balance(&alice(), USDTG), units(900));
    assert_eq!(state.total_supply(USDTG), units(1750));
}

#[test]
fn rejected_transfer_changes_nothing() {
    let state = genesis();
    let root_before = state.state_root().expect("root");

    assert!(state
        .transfer(&bob(), &alice(), USDTG, units(501))
        .is_err());
    assert!(state
        .transfer(&bob(), &alice(), OTHER_ASSET, Amount::from_atoms(1))
        .is_err());

    assert_eq!(state.state_root().expect("root"), root_before);
    assert_eq!(state.nonce(&bob()), 0);
}

#[test]
fn unknown_sender_is_reported_without_creating_accounts() {
    let state = genesis();
    let ghost = Address::from_seed(0x99);
    let fresh = Address::from_seed(0x98);

    let err = state
        .transfer(&ghost, &fresh, USDTG, Amount::zero())
        .expect_err("ghost has no account");
    assert!(matches!(err, LedgerError::UnknownAccount(a) if a == ghost));
    assert!(!state.account_exists(&ghost));
    assert!(!state.account_exists(&fresh));
    assert_eq!(state.account_count(), 3);
}

#[test]
fn negative_amounts_are_rejected() {
    let state = genesis();
    let err = state
        .transfer(&alice(), &bob(), USDTG, Amount::from_atoms(-1))
        .expect_err("negative");
    assert!(matches!(err, LedgerError::InvalidAmount(_)));

    let err = state
        .set_balance(&alice(), USDTG, Amount::from_atoms(-5))
        .expect_err("negative");
    assert!(matches!(err, LedgerError::InvalidAmount(_)));
    assert_eq!(state.get_balance(&alice(), USDTG), units(1000));
}

#[test]
fn balance_queries_have_no_side_effects() {
    let state = genesis();
    let root_before = state.state_root().expect("root");
    let stranger = Address::from_seed(0x42);

    assert_eq!(state.get_balance(&stranger, USDTG), Amount::zero());
    assert_eq!(state.get_balance(&alice(), OTHER_ASSET), Amount::zero());
    assert_eq!(state.nonce(&stranger), 0);
    assert!(state.spending_limit(&stranger).is_none());

    assert!(!state.account_exists(&stranger));
    assert_eq!(state.account_count(), 3);
    assert_eq!(state.state_root().expect("root"), root_before);
}

#[test]
fn transfers_create_recipients_and_bump_sender_nonce() {
    let state = genesis();
    let dave = Address::from_seed(0xd0);

    state
        .transfer(&alice(), &dave, USDTG, units(10))
        .expect("to new account");
    assert!(state.account_exists(&dave));
    assert_eq!(state.get_balance(&dave, USDTG), units(10));
    assert_eq!(state.nonce(&alice()), 1);
    assert_eq!(state.nonce(&dave), 0);
}

#[test]
fn draining_an_asset_removes_its_entry() {
    let state = genesis();
    state
        .transfer(&charlie(), &bob(), USDTG, units(250))
        .expect("drain");
    let account = state.account(&charlie()).expect("still exists");
    assert_eq!(account.balances().count(), 0);
    assert_eq!(account.nonce, 1);
    state.verify_invariants().expect("consistent");
}

#[test]
fn self_transfer_only_bumps_nonce() {
    let state = genesis();
    state
        .transfer(&alice(), &alice(), USDTG, units(400))
        .expect("self transfer");
    assert_eq!(state.get_balance(&alice(), USDTG), units(1000));
    assert_eq!(state.nonce(&alice()), 1);

    assert!(matches!(
        state.transfer(&alice(), &alice(), USDTG, units(1001)),
        Err(LedgerError::InsufficientFunds { .. })
    ));
    assert_eq!(state.nonce(&alice()), 1);
}

#[test]
fn assets_are_independent() {
    let state = genesis();
    state
        .set_balance(&alice(), OTHER_ASSET, Amount::from_atoms(5_000))
        .expect("set");
    state
        .transfer_coin(&alice(), &bob(), &Coin::new(OTHER_ASSET, Amount::from_atoms(1_200)))
        .expect("other asset");

    assert_eq!(state.get_balance(&bob(), OTHER_ASSET), Amount::from_atoms(1_200));
    assert_eq!(state.total_supply(OTHER_ASSET), Amount::from_atoms(5_000));
    assert_eq!(state.total_supply(USDTG), units(1750));

    let supplies = state.asset_supplies();
    assert_eq!(supplies.len(), 2);
    assert_eq!(supplies[&USDTG], units(1750));

    let summary = state.summary();
    assert_eq!(summary.accounts, 3);
    assert_eq!(summary.native_supply, units(1750));
    assert!(summary.to_string().contains("1750.000000000000000000 USDTg"));
}

#[test]
fn overflowing_credit_fails_atomically() {
    let state = WorldState::new();
    let whale = Address::from_seed(1);
    let rich = Address::from_seed(2);
    state
        .set_balance(&whale, OTHER_ASSET, Amount::from_atoms(10))
        .expect("set");
    state
        .set_balance(&rich, OTHER_ASSET, Amount::from_atoms(i128::MAX))
        .expect("set");

    assert!(matches!(
        state.transfer(&whale, &rich, OTHER_ASSET, Amount::from_atoms(10)),
        Err(LedgerError::Core(_))
    ));
    assert_eq!(state.get_balance(&whale, OTHER_ASSET), Amount::from_atoms(10));
    assert_eq!(state.nonce(&whale), 0);
}

#[test]
fn spending_limits_are_stored_not_enforced() {
    let state = genesis();
    let limit = SpendingLimit::new(units(5), units(50));
    state.set_spending_limit(&alice(), limit).expect("valid");
    assert_eq!(state.spending_limit(&alice()), Some(limit));

    state
        .transfer(&alice(), &bob(), USDTG, units(100))
        .expect("limit does not gate transfers");

    let bad = SpendingLimit::new(Amount::from_atoms(-1), units(1));
    assert!(matches!(
        state.set_spending_limit(&bob(), bad),
        Err(LedgerError::InvalidSpendingLimit)
    ));
    assert!(state.spending_limit(&bob()).is_none());

    let newcomer = Address::from_seed(0x77);
    state
        .set_spending_limit(&newcomer, SpendingLimit::unlimited())
        .expect("creates account");
    assert!(state.account_exists(&newcomer));
}

#[test]
fn state_root_ignores_shard_layout_and_history_order() {
    let coarse = WorldState::with_shards(1);
    let fine = WorldState::with_shards(64);
    for state in [&coarse, &fine] {
        state.set_balance(&charlie(), USDTG, units(250)).expect("set");
        state.set_balance(&alice(), USDTG, units(1000)).expect("set");
        state.set_balance(&bob(), USDTG, units(500)).expect("set");
    }
    assert_eq!(
        coarse.state_root().expect("root"),
        fine.state_root().expect("root")
    );

    coarse
        .transfer(&alice(), &bob(), USDTG, units(1))
        .expect("transfer");
    assert_ne!(
        coarse.state_root().expect("root"),
        fine.state_root().expect("root")
    );
}
