use bitcoin::blockdata::script::ScriptBuf;
use bitcoin::blockdata::transaction::{Transaction, TxIn, TxOut};
use bitcoin::blockdata::witness::Witness;
use bitcoin::transaction::Sequence;
use bitcoin::{absolute, Address, Amount, Network};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::config::WalletConfig;
use crate::error::WalletError;
use crate::storage::OutputRecord;
use crate::wallet::ManagedAddress;

/// Outputs chosen to fund a transaction and how their value splits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub inputs: Vec<OutputRecord>,
    pub total_in: u64,
    pub fee: u64,
    /// Zero when the leftover was below the dust limit and went to the fee
    pub change: u64,
}

/// A signed transaction ready for broadcast
#[derive(Debug, Clone)]
pub struct CreatedTransaction {
    pub tx: Transaction,
    pub fee: Amount,
    /// Wallet outputs spent by `tx`, in input order
    pub inputs: Vec<OutputRecord>,
    /// Internal-branch address receiving the change, if any
    pub change: Option<ManagedAddress>,
}

impl CreatedTransaction {
    pub fn txid(&self) -> bitcoin::Txid {
        self.tx.compute_txid()
    }

    pub fn total_in(&self) -> Amount {
        Amount::from_sat(self.inputs.iter().map(|i| i.value_sats).sum())
    }

    pub fn total_out(&self) -> Amount {
        self.tx.output.iter().map(|o| o.value).sum()
    }
}

pub struct TransactionBuilder {
    network: Network,
    fee_rate_sat_vb: u64,
    dust_limit_sats: u64,
}

impl TransactionBuilder {
    pub fn new(config: &WalletConfig) -> Self {
        Self {
            network: config.network,
            fee_rate_sat_vb: config.fee_rate_sat_vb,
            dust_limit_sats: config.dust_limit_sats,
        }
    }

    /// Parse destinations into outputs, in address order
    pub fn validate_destinations(
        &self,
        destinations: &BTreeMap<String, Amount>,
    ) -> Result<Vec<TxOut>, WalletError> {
        if destinations.is_empty() {
            return Err(WalletError::InvalidDestination(
                "at least one destination is required".into(),
            ));
        }

        destinations
            .iter()
            .map(|(address, amount)| {
                if *amount == Amount::ZERO {
                    return Err(WalletError::InvalidDestination(format!(
                        "amount for {} must be positive",
                        address
                    )));
                }
                if *amount > Amount::MAX_MONEY {
                    return Err(WalletError::InvalidDestination(format!(
                        "amount for {} exceeds the 21M BTC supply",
                        address
                    )));
                }
                let parsed = Address::from_str(address)
                    .map_err(|e| {
                        WalletError::InvalidDestination(format!("Invalid address {}: {}", address, e))
                    })?
                    .require_network(self.network)
                    .map_err(|e| {
                        WalletError::InvalidDestination(format!(
                            "Address network mismatch for {}: {}",
                            address, e
                        ))
                    })?;
                Ok(TxOut {
                    value: *amount,
                    script_pubkey: parsed.script_pubkey(),
                })
            })
            .collect()
    }

    /// Select outputs to cover `target` plus fees using a largest-first strategy.
    ///
    /// `num_outputs` counts the destination outputs only; room for a change output is
    /// added while estimating. Equal values are ordered by outpoint.
    pub fn select_utxos(
        &self,
        available: &[OutputRecord],
        target: u64,
        num_outputs: usize,
    ) -> Result<Selection, WalletError> {
        let mut sorted = available.to_vec();
        sorted.sort_by(|a, b| {
            b.value_sats
                .cmp(&a.value_sats)
                .then_with(|| a.outpoint.cmp(&b.outpoint))
        });

        let mut selected = Vec::new();
        let mut total = 0u64;

        for output in sorted {
            total = total.saturating_add(output.value_sats);
            selected.push(output);

            let fee_without_change = self.fee(selected.len(), num_outputs);
            if total < self.required(target, fee_without_change)? {
                continue;
            }

            let fee_with_change = self.fee(selected.len(), num_outputs + 1);
            let change = total.saturating_sub(target.saturating_add(fee_with_change));

            let (fee, change) = if change >= self.dust_limit_sats {
                (fee_with_change, change)
            } else {
                (total - target, 0)
            };

            return Ok(Selection {
                inputs: selected,
                total_in: total,
                fee,
                change,
            });
        }

        let inputs = selected.len().max(1);
        Err(WalletError::InsufficientFunds {
            needed: self.required(target, self.fee(inputs, num_outputs))?,
            available: total,
        })
    }

    fn fee(&self, num_inputs: usize, num_outputs: usize) -> u64 {
        estimate_tx_size(num_inputs, num_outputs).saturating_mul(self.fee_rate_sat_vb)
    }

    /// `target + fee`, or an error when no amount of inputs could cover it
    fn required(&self, target: u64, fee: u64) -> Result<u64, WalletError> {
        target
            .checked_add(fee)
            .filter(|needed| *needed <= Amount::MAX_MONEY.to_sat())
            .ok_or_else(|| {
                WalletError::InvalidDestination(format!(
                    "{} sats plus a {} sat fee exceeds the 21M BTC supply",
                    target, fee
                ))
            })
    }

    /// Unsigned transaction spending `selection`; change, if any, is the last output
    pub fn build_unsigned(
        &self,
        selection: &Selection,
        mut outputs: Vec<TxOut>,
        change_script: Option<ScriptBuf>,
    ) -> Transaction {
        let input = selection
            .inputs
            .iter()
            .map(|output| TxIn {
                previous_output: output.outpoint,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            })
            .collect();

        if let Some(script_pubkey) = change_script.filter(|_| selection.change > 0) {
            outputs.push(TxOut {
                value: Amount::from_sat(selection.change),
                script_pubkey,
            });
        }

        Transaction {
            version: bitcoin::transaction::Version::TWO,
            lock_time: absolute::LockTime::ZERO,
            input,
            output: outputs,
        }
    }
}

/// Estimate transaction size in virtual bytes for P2WPKH inputs and outputs
pub fn estimate_tx_size(num_inputs: usize, num_outputs: usize) -> u64 {
    let base_size = 10;
    let input_size = 68;
    let output_size = 31;

    (base_size + (num_inputs * input_size) + (num_outputs * output_size)) as u64
}
