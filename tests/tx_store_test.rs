//! Transaction recording, confirmations and balances
//!
//! Run with: cargo test --test tx_store_test -- --nocapture

mod common;

use common::{foreign_address, fund, funding_tx, TestEnvironment};
use hd_wallet::{Amount, Confirmation, RecordOutcome};
use std::collections::BTreeMap;

#[test]
fn test_recording_twice_changes_nothing() -> anyhow::Result<()> {
    let env = TestEnvironment::new("idempotent")?;
    let wallet = env.create_wallet()?;
    let tx = fund(&wallet, 40_000, 1, 0)?;

    let before = wallet.balance(1)?;
    let outcome = wallet.record_transaction(&tx, Confirmation::Confirmed { height: 1 })?;
    assert_eq!(outcome, RecordOutcome::Unchanged);
    assert_eq!(wallet.balance(1)?, before);
    assert_eq!(wallet.unspent(0)?.len(), 1);
    Ok(())
}

#[test]
fn test_balance_grows_with_each_funding() -> anyhow::Result<()> {
    let env = TestEnvironment::new("monotonic")?;
    let wallet = env.create_wallet()?;

    let mut last = wallet.balance(0)?;
    assert_eq!(last, Amount::ZERO);
    for (nonce, sats) in [10_000u64, 25_000, 1_000].into_iter().enumerate() {
        fund(&wallet, sats, 1, nonce as u32)?;
        let balance = wallet.balance(0)?;
        assert_eq!(balance, last + Amount::from_sat(sats));
        last = balance;
    }
    Ok(())
}

#[test]
fn test_min_conf_filters_recent_outputs() -> anyhow::Result<()> {
    let env = TestEnvironment::new("min_conf")?;
    let wallet = env.create_wallet()?;
    fund(&wallet, 10_000, 1, 0)?;
    fund(&wallet, 20_000, 5, 1)?;
    assert_eq!(wallet.synced_height()?, 5);

    assert_eq!(wallet.balance(1)?, Amount::from_sat(30_000));
    assert_eq!(wallet.balance(2)?, Amount::from_sat(10_000));
    assert_eq!(wallet.balance(6)?, Amount::ZERO);

    wallet.set_synced_height(10)?;
    assert_eq!(wallet.balance(6)?, Amount::from_sat(30_000));
    assert_eq!(wallet.balance(7)?, Amount::from_sat(10_000));
    Ok(())
}

#[test]
fn test_unconfirmed_counts_only_at_zero_conf() -> anyhow::Result<()> {
    let env = TestEnvironment::new("unconfirmed")?;
    let wallet = env.create_wallet()?;
    let address = wallet.gen_addresses(1)?.remove(0);
    let tx = funding_tx(&address.address, 15_000, 0);

    assert_eq!(
        wallet.record_transaction(&tx, Confirmation::Unconfirmed)?,
        RecordOutcome::Inserted
    );
    assert_eq!(wallet.balance(0)?, Amount::from_sat(15_000));
    assert_eq!(wallet.balance(1)?, Amount::ZERO);

    assert_eq!(
        wallet.record_transaction(&tx, Confirmation::Confirmed { height: 3 })?,
        RecordOutcome::Updated
    );
    assert_eq!(wallet.balance(1)?, Amount::from_sat(15_000));

    let record = wallet.transaction(&tx.compute_txid())?.expect("recorded");
    assert_eq!(record.confirmation, Confirmation::Confirmed { height: 3 });
    Ok(())
}

#[test]
fn test_unrelated_transaction_is_ignored() -> anyhow::Result<()> {
    let env = TestEnvironment::new("unrelated")?;
    let wallet = env.create_wallet()?;
    let tx = funding_tx(&foreign_address(), 5_000, 0);

    assert_eq!(
        wallet.record_transaction(&tx, Confirmation::Confirmed { height: 2 })?,
        RecordOutcome::Ignored
    );
    assert!(wallet.transaction(&tx.compute_txid())?.is_none());
    assert_eq!(wallet.balance(0)?, Amount::ZERO);
    assert_eq!(wallet.synced_height()?, 0);
    Ok(())
}

#[test]
fn test_records_survive_reopen() -> anyhow::Result<()> {
    let env = TestEnvironment::new("persisted")?;
    let wallet = env.create_wallet()?;
    fund(&wallet, 12_345, 4, 0)?;
    wallet.close()?;

    let reopened = env.open_wallet()?;
    assert_eq!(reopened.balance(1)?, Amount::from_sat(12_345));
    assert_eq!(reopened.synced_height()?, 4);
    Ok(())
}

#[test]
fn test_spend_arriving_before_its_funding() -> anyhow::Result<()> {
    let env = TestEnvironment::new("out_of_order")?;
    let wallet = env.create_wallet()?;
    let funding = fund(&wallet, 100_000, 1, 0)?;

    let mut to = BTreeMap::new();
    to.insert(foreign_address().to_string(), Amount::from_sat(40_000));
    let created = wallet.create_transaction(&to, 1)?;

    // Replay both into a fresh wallet from the same seed, newest first. The replay
    // has not handed out the change address, so only the spend marker is kept.
    let replay_env = TestEnvironment::new("out_of_order_replay")?;
    let replay = replay_env.create_wallet()?;
    replay.gen_addresses(1)?;
    assert_eq!(
        replay.record_transaction(&created.tx, Confirmation::Confirmed { height: 2 })?,
        RecordOutcome::Ignored
    );
    assert_eq!(
        replay.record_transaction(&funding, Confirmation::Confirmed { height: 1 })?,
        RecordOutcome::Inserted
    );

    assert_eq!(replay.balance(0)?, Amount::ZERO);
    assert!(replay.unspent(0)?.is_empty());
    assert_eq!(replay.synced_height()?, 1);
    Ok(())
}
