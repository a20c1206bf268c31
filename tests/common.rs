//! Common test utilities for wallet integration tests
//!
//! - Test environment with a temporary wallet directory
//! - Regtest configuration with cheap seed sealing
//! - Funding transactions and signature checks
//! - A broadcaster that never touches the network

#![allow(dead_code)]

use bitcoin::absolute;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{Message, Secp256k1};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::transaction::{Sequence, TxIn, TxOut, Version};
use bitcoin::{OutPoint, ScriptBuf, Witness};
use hd_wallet::wallet::MasterKey;
use hd_wallet::{
    Address, Amount, Broadcaster, Chain, Confirmation, KdfParams, Network, OutputRecord, Seed,
    Transaction, Txid, Wallet, WalletConfig, WalletError,
};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

pub const PASSPHRASE: &[u8] = b"correct horse battery staple";

pub fn init_logging() {
    env_logger::builder()
        .filter_level(log::LevelFilter::Debug)
        .is_test(true)
        .try_init()
        .ok();
}

pub fn test_config() -> WalletConfig {
    let mut config = WalletConfig::new(Network::Regtest);
    config.fee_rate_sat_vb = 2;
    config.kdf = KdfParams {
        log_n: 4,
        r: 8,
        p: 1,
    };
    config
}

pub fn test_seed() -> Seed {
    Seed::new(&[7u8; 32]).expect("valid seed")
}

/// Test environment with automatic cleanup
pub struct TestEnvironment {
    pub temp_dir: TempDir,
    pub path: PathBuf,
}

impl TestEnvironment {
    pub fn new(test_name: &str) -> anyhow::Result<Self> {
        init_logging();
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join(test_name);
        log::info!("Test wallet directory: {:?}", path);
        Ok(Self { temp_dir, path })
    }

    pub fn create_wallet(&self) -> anyhow::Result<Wallet> {
        Ok(Wallet::create(
            &self.path,
            PASSPHRASE,
            &test_seed(),
            test_config(),
        )?)
    }

    pub fn open_wallet(&self) -> anyhow::Result<Wallet> {
        Ok(Wallet::open(&self.path, PASSPHRASE, &test_seed(), test_config())?)
    }
}

/// A transaction paying `sats` to `address`. `nonce` keeps txids distinct.
pub fn funding_tx(address: &Address, sats: u64, nonce: u32) -> Transaction {
    Transaction {
        version: Version::TWO,
        lock_time: absolute::LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint::new(Txid::all_zeros(), nonce),
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: Amount::from_sat(sats),
            script_pubkey: address.script_pubkey(),
        }],
    }
}

/// Pay a fresh receiving address of `wallet` in a block at `height`
pub fn fund(wallet: &Wallet, sats: u64, height: u32, nonce: u32) -> anyhow::Result<Transaction> {
    let address = wallet.gen_addresses(1)?.remove(0);
    let tx = funding_tx(&address.address, sats, nonce);
    wallet.record_transaction(&tx, Confirmation::Confirmed { height })?;
    Ok(tx)
}

/// A regtest address the test wallet does not own
pub fn foreign_address() -> Address {
    let seed = Seed::new(&[42u8; 32]).expect("valid seed");
    MasterKey::from_seed(&seed, Network::Regtest)
        .and_then(|master| master.derive_account_key(0))
        .and_then(|account| account.derive_address_key(Chain::External, 0))
        .expect("derivable")
        .address
}

/// Check the P2WPKH witness of input `index` against the output it spends
pub fn verify_p2wpkh_input(
    tx: &Transaction,
    index: usize,
    spent: &OutputRecord,
) -> anyhow::Result<()> {
    let witness = &tx.input[index].witness;
    anyhow::ensure!(witness.len() == 2, "expected signature and pubkey");

    let sig = bitcoin::ecdsa::Signature::from_slice(witness.nth(0).unwrap_or_default())?;
    let pubkey = bitcoin::PublicKey::from_slice(witness.nth(1).unwrap_or_default())?;
    anyhow::ensure!(sig.sighash_type == EcdsaSighashType::All, "expected SIGHASH_ALL");

    let sighash = SighashCache::new(tx).p2wpkh_signature_hash(
        index,
        &spent.script_pubkey,
        Amount::from_sat(spent.value_sats),
        EcdsaSighashType::All,
    )?;
    let message = Message::from_digest(sighash.to_byte_array());
    Secp256k1::verification_only().verify_ecdsa(&message, &sig.signature, &pubkey.inner)?;
    Ok(())
}

/// Broadcaster that keeps transactions in memory
#[derive(Default)]
pub struct MockBroadcaster {
    pub sent: Mutex<Vec<Transaction>>,
    pub fail: bool,
    /// Time each broadcast takes, letting other tasks run meanwhile
    pub delay: Option<Duration>,
}

impl MockBroadcaster {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }
}

impl Broadcaster for MockBroadcaster {
    async fn broadcast(&self, tx: &Transaction) -> Result<Txid, WalletError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(WalletError::Network("Broadcast failed: rejected".into()));
        }
        self.sent.lock().push(tx.clone());
        Ok(tx.compute_txid())
    }
}
