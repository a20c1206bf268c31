use bitcoin::blockdata::transaction::Transaction;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{Message, Secp256k1};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::{Address, Amount, CompressedPublicKey, Network, PrivateKey};

use crate::error::WalletError;
use crate::storage::{AddressLocator, OutputRecord};

/// Supplies private keys for owned outputs.
///
/// Signs P2WPKH (SegWit v0) inputs only. A source without private keys, such as a
/// watch-only wallet, returns `WalletError::Signing`.
pub trait KeySource {
    fn private_key(&self, locator: &AddressLocator) -> Result<PrivateKey, WalletError>;
}

impl KeySource for crate::wallet::AddressManager {
    fn private_key(&self, locator: &AddressLocator) -> Result<PrivateKey, WalletError> {
        crate::wallet::AddressManager::private_key(self, locator)
    }
}

/// Sign every input of `tx`. `spent[i]` is the wallet output spent by input `i`.
pub fn sign_transaction<K: KeySource + ?Sized>(
    mut tx: Transaction,
    spent: &[OutputRecord],
    keys: &K,
    network: Network,
) -> Result<Transaction, WalletError> {
    if spent.len() != tx.input.len() {
        return Err(WalletError::Signing(format!(
            "{} inputs but {} spent outputs",
            tx.input.len(),
            spent.len()
        )));
    }

    let secp = Secp256k1::new();
    let mut witnesses = Vec::with_capacity(spent.len());

    {
        let mut sighash_cache = SighashCache::new(&tx);

        for (input_index, (input, output)) in tx.input.iter().zip(spent).enumerate() {
            if input.previous_output != output.outpoint {
                return Err(WalletError::Signing(format!(
                    "input {} does not spend {}",
                    input_index, output.outpoint
                )));
            }

            let private_key = keys.private_key(&output.owner)?;
            let public_key = CompressedPublicKey::from_private_key(&secp, &private_key)
                .map_err(|e| WalletError::Signing(e.to_string()))?;
            let script_pubkey = Address::p2wpkh(&public_key, network).script_pubkey();
            if script_pubkey != output.script_pubkey {
                return Err(WalletError::Signing(format!(
                    "derived key does not control {}",
                    output.outpoint
                )));
            }

            let sighash = sighash_cache
                .p2wpkh_signature_hash(
                    input_index,
                    &script_pubkey,
                    Amount::from_sat(output.value_sats),
                    EcdsaSighashType::All,
                )
                .map_err(|e| WalletError::Bitcoin(e.to_string()))?;

            let message = Message::from_digest(sighash.to_byte_array());
            let signature = secp.sign_ecdsa(&message, &private_key.inner);

            let mut sig_with_hashtype = signature.serialize_der().to_vec();
            sig_with_hashtype.push(EcdsaSighashType::All.to_u32() as u8);

            witnesses.push((sig_with_hashtype, public_key.to_bytes()));
        }
    }

    for (input, (sig, pubkey)) in tx.input.iter_mut().zip(witnesses) {
        input.witness.clear();
        input.witness.push(sig);
        input.witness.push(pubkey);
    }

    log::debug!("Signed {} input(s)", tx.input.len());
    Ok(tx)
}
