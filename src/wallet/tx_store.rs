use bitcoin::{Amount, OutPoint, Transaction, Txid};
use chrono::Utc;
use sled::transaction::{ConflictableTransactionResult, TransactionalTree};

use crate::error::WalletError;
use crate::storage::{
    keys, tx_get, tx_put, AddressLocator, AddressRecord, Confirmation, OutputRecord, Store,
    TxRecord,
};

/// What `record_transaction` did with a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// First time seen; outputs and spends were applied
    Inserted,
    /// Already known; its confirmation state changed
    Updated,
    /// Already known in the same state
    Unchanged,
    /// Neither spends nor pays anything the wallet owns yet
    Ignored,
}

/// Transactions touching owned addresses and the outputs they created.
pub struct TxStore {
    store: Store,
}

impl TxStore {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Height of the chain tip confirmations are counted against
    pub fn synced_height(&self) -> Result<u32, WalletError> {
        Ok(Store::get(self.store.tx_mgr(), keys::SYNCED_HEIGHT)?.unwrap_or(0))
    }

    pub fn set_synced_height(&self, height: u32) -> Result<(), WalletError> {
        self.store.transaction(|_, tx_mgr| {
            tx_put(tx_mgr, keys::SYNCED_HEIGHT, &height)?;
            Ok(())
        })?;
        log::debug!("Synced to height {}", height);
        Ok(())
    }

    /// Insert `tx`, or update its confirmation state if it is already known.
    ///
    /// Recording the same transaction twice in the same state changes nothing.
    /// Transactions may arrive in any order: a spend recorded before the output it
    /// spends still marks that output spent once it shows up. An ignored transaction
    /// leaves only those spend markers behind and does not move the chain tip.
    pub fn record_transaction(
        &self,
        tx: &Transaction,
        confirmation: Confirmation,
    ) -> Result<RecordOutcome, WalletError> {
        let txid = tx.compute_txid();
        let tx_key = keys::tx(&txid);
        let raw_hex = bitcoin::consensus::encode::serialize_hex(tx);

        let outcome = self.store.transaction(|addr_mgr, tx_mgr| {
            let outcome = match tx_get::<TxRecord>(tx_mgr, &tx_key)? {
                Some(record) if record.confirmation == confirmation => RecordOutcome::Unchanged,
                Some(mut record) => {
                    record.confirmation = confirmation;
                    tx_put(tx_mgr, &tx_key, &record)?;

                    for vout in 0..tx.output.len() as u32 {
                        let out_key = keys::output(&OutPoint::new(txid, vout));
                        if let Some(mut output) = tx_get::<OutputRecord>(tx_mgr, &out_key)? {
                            output.height = confirmation.height();
                            tx_put(tx_mgr, &out_key, &output)?;
                        }
                    }
                    RecordOutcome::Updated
                }
                None => {
                    let spends_owned = apply_spends(tx_mgr, tx, txid)?;
                    let pays_owned = apply_outputs(addr_mgr, tx_mgr, tx, txid, confirmation)?;
                    if spends_owned || pays_owned {
                        let record = TxRecord {
                            txid,
                            raw_hex: raw_hex.clone(),
                            confirmation,
                            first_seen: Utc::now(),
                        };
                        tx_put(tx_mgr, &tx_key, &record)?;
                        RecordOutcome::Inserted
                    } else {
                        RecordOutcome::Ignored
                    }
                }
            };

            if matches!(outcome, RecordOutcome::Inserted | RecordOutcome::Updated) {
                if let Some(height) = confirmation.height() {
                    let tip = tx_get::<u32>(tx_mgr, keys::SYNCED_HEIGHT)?.unwrap_or(0);
                    if height > tip {
                        tx_put(tx_mgr, keys::SYNCED_HEIGHT, &height)?;
                    }
                }
            }
            Ok(outcome)
        })?;

        match outcome {
            RecordOutcome::Inserted => log::info!("Recorded transaction {}", txid),
            RecordOutcome::Updated => {
                log::info!("Transaction {} is now {:?}", txid, confirmation)
            }
            RecordOutcome::Unchanged | RecordOutcome::Ignored => {
                log::debug!("Transaction {}: {:?}", txid, outcome)
            }
        }
        Ok(outcome)
    }

    pub fn transaction(&self, txid: &Txid) -> Result<Option<TxRecord>, WalletError> {
        Store::get(self.store.tx_mgr(), &keys::tx(txid))
    }

    /// Decode the stored consensus bytes of a recorded transaction
    pub fn raw_transaction(&self, txid: &Txid) -> Result<Option<Transaction>, WalletError> {
        match self.transaction(txid)? {
            Some(record) => bitcoin::consensus::encode::deserialize_hex(&record.raw_hex)
                .map(Some)
                .map_err(|e| WalletError::Bitcoin(e.to_string())),
            None => Ok(None),
        }
    }

    /// Every output ever paid to `account`, spent or not
    pub fn outputs(&self, account: u32) -> Result<Vec<OutputRecord>, WalletError> {
        let outputs: Vec<OutputRecord> = Store::scan(self.store.tx_mgr(), keys::OUTPUT_PREFIX)?;
        Ok(outputs
            .into_iter()
            .filter(|output| output.owner.account == account)
            .collect())
    }

    /// Unspent outputs of `account` with at least `min_conf` confirmations
    pub fn unspent(&self, account: u32, min_conf: u32) -> Result<Vec<OutputRecord>, WalletError> {
        let tip = self.synced_height()?;
        Ok(self
            .outputs(account)?
            .into_iter()
            .filter(|output| !output.is_spent() && output.confirmations(tip) >= min_conf)
            .collect())
    }

    /// Sum of `unspent(account, min_conf)`; `min_conf == 0` counts unconfirmed outputs
    pub fn balance(&self, account: u32, min_conf: u32) -> Result<Amount, WalletError> {
        let total = self
            .unspent(account, min_conf)?
            .iter()
            .map(|output| output.value_sats)
            .sum();
        Ok(Amount::from_sat(total))
    }
}

/// Mark wallet outputs spent by `tx` and remember every outpoint it spends, so an
/// output recorded after its spender starts out spent. Returns whether an owned
/// output was spent.
fn apply_spends(
    tx_mgr: &TransactionalTree,
    tx: &Transaction,
    txid: Txid,
) -> ConflictableTransactionResult<bool, WalletError> {
    let mut relevant = false;
    for input in &tx.input {
        tx_put(tx_mgr, &keys::spend(&input.previous_output), &txid)?;

        let out_key = keys::output(&input.previous_output);
        if let Some(mut spent) = tx_get::<OutputRecord>(tx_mgr, &out_key)? {
            relevant = true;
            if spent.spent_by.is_none() {
                spent.spent_by = Some(txid);
                tx_put(tx_mgr, &out_key, &spent)?;
            }
        }
    }
    Ok(relevant)
}

/// Store the outputs of `tx` that pay owned scripts. Returns whether there were any.
fn apply_outputs(
    addr_mgr: &TransactionalTree,
    tx_mgr: &TransactionalTree,
    tx: &Transaction,
    txid: Txid,
    confirmation: Confirmation,
) -> ConflictableTransactionResult<bool, WalletError> {
    let mut relevant = false;
    for (vout, txout) in tx.output.iter().enumerate() {
        let Some(owner) = tx_get::<AddressLocator>(addr_mgr, &keys::script(&txout.script_pubkey))?
        else {
            continue;
        };
        relevant = true;

        let outpoint = OutPoint::new(txid, vout as u32);
        let output = OutputRecord {
            outpoint,
            value_sats: txout.value.to_sat(),
            script_pubkey: txout.script_pubkey.clone(),
            owner,
            height: confirmation.height(),
            spent_by: tx_get::<Txid>(tx_mgr, &keys::spend(&outpoint))?,
        };
        tx_put(tx_mgr, &keys::output(&outpoint), &output)?;

        let address_key = keys::address(owner.account, owner.chain, owner.index);
        if let Some(mut address) = tx_get::<AddressRecord>(addr_mgr, &address_key)? {
            if !address.used {
                address.used = true;
                tx_put(addr_mgr, &address_key, &address)?;
            }
        }
    }
    Ok(relevant)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::address_manager::AddressManager;
    use crate::wallet::keys::{MasterKey, Seed};
    use bitcoin::hashes::Hash;
    use bitcoin::{absolute, transaction, Network, ScriptBuf, Sequence, TxIn, TxOut, Witness};
    use tempfile::TempDir;

    struct Fixture {
        _temp_dir: TempDir,
        addresses: AddressManager,
        txs: TxStore,
    }

    fn fixture() -> Fixture {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::create(&temp_dir.path().join("db")).unwrap();
        let master = MasterKey::from_seed(&Seed::new(&[9u8; 32]).unwrap(), Network::Regtest).unwrap();
        let addresses = AddressManager::load(store.clone(), Network::Regtest, Some(master)).unwrap();
        addresses.new_account("default").unwrap();
        Fixture {
            _temp_dir: temp_dir,
            addresses,
            txs: TxStore::new(store),
        }
    }

    fn paying(script: ScriptBuf, sats: u64, spend: OutPoint) -> Transaction {
        Transaction {
            version: transaction::Version::TWO,
            lock_time: absolute::LockTime::ZERO,
            input: vec![TxIn {
                previous_output: spend,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(sats),
                script_pubkey: script,
            }],
        }
    }

    #[test]
    fn test_record_is_idempotent() {
        let f = fixture();
        let address = f.addresses.next_addresses(0, 1).unwrap().remove(0);
        let tx = paying(
            address.address.script_pubkey(),
            50_000,
            OutPoint::new(Txid::all_zeros(), 0),
        );

        let confirmed = Confirmation::Confirmed { height: 10 };
        assert_eq!(f.txs.record_transaction(&tx, confirmed).unwrap(), RecordOutcome::Inserted);
        assert_eq!(f.txs.record_transaction(&tx, confirmed).unwrap(), RecordOutcome::Unchanged);

        assert_eq!(f.txs.outputs(0).unwrap().len(), 1);
        assert_eq!(f.txs.balance(0, 1).unwrap(), Amount::from_sat(50_000));
        assert_eq!(f.txs.synced_height().unwrap(), 10);
        assert!(f.addresses.address_info(&address.address).unwrap().unwrap().used);
    }

    #[test]
    fn test_confirmation_updates_output_height() {
        let f = fixture();
        let address = f.addresses.next_addresses(0, 1).unwrap().remove(0);
        let tx = paying(
            address.address.script_pubkey(),
            20_000,
            OutPoint::new(Txid::all_zeros(), 1),
        );

        f.txs.record_transaction(&tx, Confirmation::Unconfirmed).unwrap();
        assert_eq!(f.txs.balance(0, 0).unwrap(), Amount::from_sat(20_000));
        assert_eq!(f.txs.balance(0, 1).unwrap(), Amount::ZERO);

        let outcome = f
            .txs
            .record_transaction(&tx, Confirmation::Confirmed { height: 3 })
            .unwrap();
        assert_eq!(outcome, RecordOutcome::Updated);
        assert_eq!(f.txs.balance(0, 1).unwrap(), Amount::from_sat(20_000));

        f.txs.set_synced_height(5).unwrap();
        assert_eq!(f.txs.unspent(0, 3).unwrap().len(), 1);
        assert!(f.txs.unspent(0, 4).unwrap().is_empty());
    }

    #[test]
    fn test_unrelated_transaction_is_ignored() {
        let f = fixture();
        let tx = paying(ScriptBuf::new(), 1_000, OutPoint::new(Txid::all_zeros(), 2));

        assert_eq!(
            f.txs.record_transaction(&tx, Confirmation::Unconfirmed).unwrap(),
            RecordOutcome::Ignored
        );
        assert!(f.txs.transaction(&tx.compute_txid()).unwrap().is_none());
    }

    #[test]
    fn test_spend_marks_output_spent() {
        let f = fixture();
        let address = f.addresses.next_addresses(0, 1).unwrap().remove(0);
        let funding = paying(
            address.address.script_pubkey(),
            30_000,
            OutPoint::new(Txid::all_zeros(), 3),
        );
        f.txs
            .record_transaction(&funding, Confirmation::Confirmed { height: 1 })
            .unwrap();

        let spend = paying(ScriptBuf::new(), 29_000, OutPoint::new(funding.compute_txid(), 0));
        assert_eq!(
            f.txs.record_transaction(&spend, Confirmation::Unconfirmed).unwrap(),
            RecordOutcome::Inserted
        );

        assert_eq!(f.txs.balance(0, 0).unwrap(), Amount::ZERO);
        let output = &f.txs.outputs(0).unwrap()[0];
        assert_eq!(output.spent_by, Some(spend.compute_txid()));
        assert_eq!(
            f.txs.raw_transaction(&spend.compute_txid()).unwrap(),
            Some(spend)
        );
    }

    #[test]
    fn test_spend_recorded_before_funding() {
        let f = fixture();
        let mut addresses = f.addresses.next_addresses(0, 2).unwrap();
        let change = addresses.remove(1);
        let receive = addresses.remove(0);
        let funding = paying(
            receive.address.script_pubkey(),
            50_000,
            OutPoint::new(Txid::all_zeros(), 4),
        );
        let spend = paying(
            change.address.script_pubkey(),
            49_000,
            OutPoint::new(funding.compute_txid(), 0),
        );

        f.txs
            .record_transaction(&spend, Confirmation::Confirmed { height: 2 })
            .unwrap();
        f.txs
            .record_transaction(&funding, Confirmation::Confirmed { height: 1 })
            .unwrap();

        assert_eq!(f.txs.balance(0, 0).unwrap(), Amount::from_sat(49_000));
        let funded = f
            .txs
            .outputs(0)
            .unwrap()
            .into_iter()
            .find(|output| output.outpoint.txid == funding.compute_txid())
            .unwrap();
        assert_eq!(funded.spent_by, Some(spend.compute_txid()));
    }

    #[test]
    fn test_ignored_spend_still_marks_later_output() {
        let f = fixture();
        let address = f.addresses.next_addresses(0, 1).unwrap().remove(0);
        let funding = paying(
            address.address.script_pubkey(),
            10_000,
            OutPoint::new(Txid::all_zeros(), 5),
        );
        let spend = paying(ScriptBuf::new(), 9_000, OutPoint::new(funding.compute_txid(), 0));

        assert_eq!(
            f.txs.record_transaction(&spend, Confirmation::Unconfirmed).unwrap(),
            RecordOutcome::Ignored
        );
        f.txs
            .record_transaction(&funding, Confirmation::Confirmed { height: 1 })
            .unwrap();
        assert_eq!(f.txs.balance(0, 0).unwrap(), Amount::ZERO);
    }

    #[test]
    fn test_ignored_transaction_keeps_tip() {
        let f = fixture();
        f.txs.set_synced_height(7).unwrap();
        let tx = paying(ScriptBuf::new(), 1_000, OutPoint::new(Txid::all_zeros(), 6));

        assert_eq!(
            f.txs
                .record_transaction(&tx, Confirmation::Confirmed { height: 1_000 })
                .unwrap(),
            RecordOutcome::Ignored
        );
        assert_eq!(f.txs.synced_height().unwrap(), 7);
    }

    #[test]
    fn test_confirmation_update_raises_tip() {
        let f = fixture();
        let address = f.addresses.next_addresses(0, 1).unwrap().remove(0);
        let tx = paying(
            address.address.script_pubkey(),
            5_000,
            OutPoint::new(Txid::all_zeros(), 7),
        );

        f.txs.record_transaction(&tx, Confirmation::Unconfirmed).unwrap();
        assert_eq!(f.txs.synced_height().unwrap(), 0);
        f.txs
            .record_transaction(&tx, Confirmation::Confirmed { height: 12 })
            .unwrap();
        assert_eq!(f.txs.synced_height().unwrap(), 12);
    }
}
