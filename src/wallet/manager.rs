use bitcoin::{Address, Amount, Network, Transaction, Txid};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use zeroize::Zeroizing;

use super::address_manager::{AddressManager, ManagedAddress};
use super::keys::{MasterKey, Seed};
use super::tx_store::{RecordOutcome, TxStore};
use crate::config::WalletConfig;
use crate::error::WalletError;
use crate::storage::{
    keys, AccountRecord, Confirmation, ManagerRecord, OutputRecord, SealedSeed, Store, TxRecord,
};
use crate::transaction::{sign_transaction, Broadcaster, CreatedTransaction, TransactionBuilder};

/// Name given to account 0 of a new wallet
pub const DEFAULT_ACCOUNT_NAME: &str = "default";

type SecretFn<'a> = Box<dyn Fn() -> Result<Zeroizing<Vec<u8>>, WalletError> + 'a>;

/// Caller-supplied secret retrieval, invoked once while opening a wallet
pub struct OpenCallbacks<'a> {
    obtain_seed: SecretFn<'a>,
    obtain_passphrase: SecretFn<'a>,
}

impl<'a> OpenCallbacks<'a> {
    pub fn new<S, P>(obtain_seed: S, obtain_passphrase: P) -> Self
    where
        S: Fn() -> Result<Zeroizing<Vec<u8>>, WalletError> + 'a,
        P: Fn() -> Result<Zeroizing<Vec<u8>>, WalletError> + 'a,
    {
        Self {
            obtain_seed: Box::new(obtain_seed),
            obtain_passphrase: Box::new(obtain_passphrase),
        }
    }

    /// Callbacks that hand out secrets the caller already holds
    pub fn from_secrets(passphrase: &'a [u8], seed: &'a Seed) -> Self {
        Self::new(
            move || Ok(Zeroizing::new(seed.as_bytes().to_vec())),
            move || Ok(Zeroizing::new(passphrase.to_vec())),
        )
    }
}

/// An open wallet. Owns the database handle until `close` or drop.
///
/// Mutating operations take the wallet lock for writing, queries take it for
/// reading, so a query never observes half of a multi-step update. Sends are
/// additionally serialized end to end, so a send only selects outputs after the
/// previous send's spend is recorded.
pub struct Wallet {
    config: WalletConfig,
    store: Store,
    addresses: AddressManager,
    transactions: TxStore,
    builder: TransactionBuilder,
    lock: RwLock<()>,
    send_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wallet")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Wallet {
    /// Create a new wallet at `path` with account 0
    pub fn create(
        path: impl AsRef<Path>,
        passphrase: &[u8],
        seed: &Seed,
        config: WalletConfig,
    ) -> Result<Self, WalletError> {
        let path = path.as_ref();
        let existed = path.exists();

        match Self::initialize(path, passphrase, seed, config) {
            Ok(wallet) => {
                log::info!("Created wallet at {:?} on {}", path, wallet.network());
                Ok(wallet)
            }
            Err(err) => {
                if !existed && path.exists() && !matches!(err, WalletError::AlreadyExists(_)) {
                    if let Err(cleanup) = fs::remove_dir_all(path) {
                        log::warn!("Failed to remove partial wallet at {:?}: {}", path, cleanup);
                    }
                }
                Err(err)
            }
        }
    }

    fn initialize(
        path: &Path,
        passphrase: &[u8],
        seed: &Seed,
        config: WalletConfig,
    ) -> Result<Self, WalletError> {
        if passphrase.is_empty() {
            return Err(WalletError::InvalidArgument(
                "passphrase must not be empty".into(),
            ));
        }

        let store = Store::create(path)?;
        let master = MasterKey::from_seed(seed, config.network)?;
        let manager = ManagerRecord {
            version: ManagerRecord::CURRENT_VERSION,
            network: config.network,
            created_at: Utc::now(),
            master_fingerprint: master.fingerprint().to_string(),
            sealed_seed: SealedSeed::seal(seed, passphrase, config.kdf)?,
        };

        let addresses = AddressManager::create(
            store.clone(),
            config.network,
            master,
            &manager,
            DEFAULT_ACCOUNT_NAME,
        )?;
        store.flush()?;

        Ok(Self::assemble(config, store, addresses))
    }

    /// Open an existing wallet, checking `passphrase` and `seed` against the stored seed
    pub fn open(
        path: impl AsRef<Path>,
        passphrase: &[u8],
        seed: &Seed,
        config: WalletConfig,
    ) -> Result<Self, WalletError> {
        Self::open_with(path, config, &OpenCallbacks::from_secrets(passphrase, seed))
    }

    pub fn open_with(
        path: impl AsRef<Path>,
        config: WalletConfig,
        callbacks: &OpenCallbacks<'_>,
    ) -> Result<Self, WalletError> {
        let path = path.as_ref();
        let store = Store::open(path)?;
        let manager = read_manager(&store, &config)?;

        let passphrase = (callbacks.obtain_passphrase)()?;
        let stored = manager.sealed_seed.unseal(&passphrase)?;

        let supplied = Seed::new(&(callbacks.obtain_seed)()?)?;
        if supplied.as_bytes() != stored.as_bytes() {
            return Err(WalletError::Authentication(
                "seed does not match the wallet".into(),
            ));
        }

        let master = MasterKey::from_seed(&stored, config.network)?;
        if master.fingerprint().to_string() != manager.master_fingerprint {
            return Err(WalletError::Authentication(
                "stored seed does not match the master fingerprint".into(),
            ));
        }

        let addresses = AddressManager::load(store.clone(), config.network, Some(master))?;
        log::info!("Opened wallet at {:?}", path);
        Ok(Self::assemble(config, store, addresses))
    }

    /// Open without secrets. Addresses and balances work; signing fails.
    pub fn open_watch_only(
        path: impl AsRef<Path>,
        config: WalletConfig,
    ) -> Result<Self, WalletError> {
        let path = path.as_ref();
        let store = Store::open(path)?;
        read_manager(&store, &config)?;

        let addresses = AddressManager::load(store.clone(), config.network, None)?;
        log::info!("Opened wallet at {:?} (watch-only)", path);
        Ok(Self::assemble(config, store, addresses))
    }

    fn assemble(config: WalletConfig, store: Store, addresses: AddressManager) -> Self {
        Self {
            builder: TransactionBuilder::new(&config),
            transactions: TxStore::new(store.clone()),
            config,
            store,
            addresses,
            lock: RwLock::new(()),
            send_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Flush pending writes and release the database handle
    pub fn close(self) -> Result<(), WalletError> {
        let _guard = self.lock.write();
        self.store.flush()?;
        log::info!("Closed wallet at {:?}", self.store.path());
        Ok(())
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    pub fn network(&self) -> Network {
        self.config.network
    }

    pub fn path(&self) -> &Path {
        self.store.path()
    }

    pub fn is_watch_only(&self) -> bool {
        !self.addresses.has_private_keys()
    }

    pub fn last_account(&self) -> Result<u32, WalletError> {
        let _guard = self.lock.read();
        self.addresses.last_account()
    }

    pub fn accounts(&self) -> Result<Vec<AccountRecord>, WalletError> {
        let _guard = self.lock.read();
        self.addresses.accounts()
    }

    pub fn new_account(&self, name: &str) -> Result<u32, WalletError> {
        let _guard = self.lock.write();
        self.addresses.new_account(name)
    }

    /// All addresses of the last account, receiving branch first
    pub fn addresses(&self) -> Result<Vec<ManagedAddress>, WalletError> {
        let _guard = self.lock.read();
        let account = self.addresses.last_account()?;
        self.addresses.addresses(account)
    }

    /// Visit the addresses of the last account without collecting them
    pub fn for_each_address<F>(&self, visitor: F) -> Result<(), WalletError>
    where
        F: FnMut(&ManagedAddress) -> Result<(), WalletError>,
    {
        let _guard = self.lock.read();
        let account = self.addresses.last_account()?;
        self.addresses.for_each_address(account, visitor)
    }

    /// Generate `n` new receiving addresses for the last account
    pub fn gen_addresses(&self, n: u32) -> Result<Vec<ManagedAddress>, WalletError> {
        let _guard = self.lock.write();
        let account = self.addresses.last_account()?;
        let addresses = self.addresses.next_addresses(account, n)?;
        log::info!("Generated {} address(es) for account {}", addresses.len(), account);
        Ok(addresses)
    }

    pub fn is_owned(&self, address: &Address) -> Result<bool, WalletError> {
        let _guard = self.lock.read();
        self.addresses.is_owned(address)
    }

    /// Balance of the last account counting outputs with at least `min_conf` confirmations
    pub fn balance(&self, min_conf: u32) -> Result<Amount, WalletError> {
        let _guard = self.lock.read();
        let account = self.addresses.last_account()?;
        self.transactions.balance(account, min_conf)
    }

    pub fn unspent(&self, min_conf: u32) -> Result<Vec<OutputRecord>, WalletError> {
        let _guard = self.lock.read();
        let account = self.addresses.last_account()?;
        self.transactions.unspent(account, min_conf)
    }

    pub fn transaction(&self, txid: &Txid) -> Result<Option<TxRecord>, WalletError> {
        let _guard = self.lock.read();
        self.transactions.transaction(txid)
    }

    pub fn record_transaction(
        &self,
        tx: &Transaction,
        confirmation: Confirmation,
    ) -> Result<RecordOutcome, WalletError> {
        let _guard = self.lock.write();
        self.transactions.record_transaction(tx, confirmation)
    }

    pub fn synced_height(&self) -> Result<u32, WalletError> {
        let _guard = self.lock.read();
        self.transactions.synced_height()
    }

    pub fn set_synced_height(&self, height: u32) -> Result<(), WalletError> {
        let _guard = self.lock.write();
        self.transactions.set_synced_height(height)
    }

    /// Build and sign a transaction paying `to` from the last account.
    ///
    /// Nothing is persisted unless signing succeeds, and then only the change index.
    /// The spent outputs stay unspent until the transaction is recorded.
    pub fn create_transaction(
        &self,
        to: &BTreeMap<String, Amount>,
        min_conf: u32,
    ) -> Result<CreatedTransaction, WalletError> {
        let _guard = self.lock.write();
        let account = self.addresses.last_account()?;

        let outputs = self.builder.validate_destinations(to)?;
        let target = outputs
            .iter()
            .try_fold(0u64, |acc, out| acc.checked_add(out.value.to_sat()))
            .ok_or_else(|| {
                WalletError::InvalidDestination("total amount overflows".into())
            })?;

        let available = self.transactions.unspent(account, min_conf)?;
        let selection = self.builder.select_utxos(&available, target, outputs.len())?;

        let change = if selection.change > 0 {
            Some(self.addresses.peek_internal(account)?)
        } else {
            None
        };
        let unsigned = self.builder.build_unsigned(
            &selection,
            outputs,
            change.as_ref().map(|c| c.address.script_pubkey()),
        );
        let tx = sign_transaction(unsigned, &selection.inputs, &self.addresses, self.network())?;

        let change = match change {
            Some(change) => Some(self.addresses.commit_internal(account, change.index)?),
            None => None,
        };

        log::info!(
            "Created transaction {} spending {} input(s), fee {} sats",
            tx.compute_txid(),
            selection.inputs.len(),
            selection.fee
        );

        Ok(CreatedTransaction {
            tx,
            fee: Amount::from_sat(selection.fee),
            inputs: selection.inputs,
            change,
        })
    }

    /// Create, broadcast and record a transaction; returns the broadcast txid.
    ///
    /// Concurrent sends on one wallet run one at a time, so two sends never pick
    /// the same outputs.
    pub async fn send_bitcoin<B: Broadcaster>(
        &self,
        to: &BTreeMap<String, Amount>,
        min_conf: u32,
        broadcaster: &B,
    ) -> Result<Txid, WalletError> {
        let _send = self.send_lock.lock().await;
        let created = self.create_transaction(to, min_conf)?;
        let txid = broadcaster.broadcast(&created.tx).await?;
        log::info!("Bitcoin sent - txid: {}", txid);

        self.record_transaction(&created.tx, Confirmation::Unconfirmed)?;
        Ok(txid)
    }
}

fn read_manager(store: &Store, config: &WalletConfig) -> Result<ManagerRecord, WalletError> {
    let manager: ManagerRecord = Store::get(store.addr_mgr(), keys::MANAGER)?
        .ok_or_else(|| WalletError::NotFound(store.path().display().to_string()))?;

    if manager.version > ManagerRecord::CURRENT_VERSION {
        return Err(WalletError::InvalidArgument(format!(
            "wallet version {} is newer than supported version {}",
            manager.version,
            ManagerRecord::CURRENT_VERSION
        )));
    }
    if manager.network != config.network {
        return Err(WalletError::InvalidArgument(format!(
            "wallet was created for {} but opened for {}",
            manager.network, config.network
        )));
    }
    Ok(manager)
}
