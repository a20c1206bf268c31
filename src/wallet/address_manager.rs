use bitcoin::bip32::Xpub;
use bitcoin::{Address, Network, PrivateKey, Script};
use parking_lot::RwLock;
use sled::transaction::ConflictableTransactionError;
use std::collections::BTreeMap;
use std::str::FromStr;

use super::keys::{AccountKey, Chain, MasterKey};
use crate::error::{StorageError, WalletError};
use crate::storage::{
    keys, tx_get, tx_put, AccountRecord, AddressLocator, AddressRecord, ManagerRecord, Store,
};

/// Indices above this are hardened and unusable for address derivation
const MAX_ADDRESS_INDEX: u32 = (1 << 31) - 1;

/// Most receiving addresses one `next_addresses` call hands out
pub const MAX_ADDRESSES_PER_CALL: u32 = 10_000;

/// An address generated by the wallet, with its place in the key tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedAddress {
    pub account: u32,
    pub chain: Chain,
    pub index: u32,
    pub address: Address,
}

impl ManagedAddress {
    pub fn locator(&self) -> AddressLocator {
        AddressLocator {
            account: self.account,
            chain: self.chain,
            index: self.index,
        }
    }
}

/// Accounts and their generated addresses, persisted in the address-manager namespace.
///
/// Index counters only move forward inside a store transaction, so every
/// `(account, chain, index)` is handed out at most once.
pub struct AddressManager {
    store: Store,
    network: Network,
    master: Option<MasterKey>,
    account_keys: RwLock<BTreeMap<u32, AccountKey>>,
}

impl AddressManager {
    /// Load every account key. Without a master key the manager is watch-only.
    pub fn load(
        store: Store,
        network: Network,
        master: Option<MasterKey>,
    ) -> Result<Self, WalletError> {
        let accounts: Vec<AccountRecord> =
            Store::scan(store.addr_mgr(), keys::ACCOUNT_PREFIX)?;

        let mut account_keys = BTreeMap::new();
        for record in &accounts {
            let key = match &master {
                Some(master) => {
                    let key = master.derive_account_key(record.index)?;
                    if key.xpub().to_string() != record.xpub {
                        return Err(WalletError::Authentication(format!(
                            "seed does not match account {}",
                            record.index
                        )));
                    }
                    key
                }
                None => {
                    let xpub = Xpub::from_str(&record.xpub).map_err(|e| {
                        StorageError::corrupt(format!("account {}", record.index), e.to_string())
                    })?;
                    AccountKey::from_xpub(record.index, xpub, network)
                }
            };
            account_keys.insert(record.index, key);
        }

        log::debug!(
            "Loaded {} account(s), private keys {}",
            account_keys.len(),
            if master.is_some() { "available" } else { "unavailable" }
        );

        Ok(Self {
            store,
            network,
            master,
            account_keys: RwLock::new(account_keys),
        })
    }

    /// Write the manager record and account 0 of a new wallet in one transaction
    pub fn create(
        store: Store,
        network: Network,
        master: MasterKey,
        manager: &ManagerRecord,
        account_name: &str,
    ) -> Result<Self, WalletError> {
        let key = master.derive_account_key(0)?;
        let account = AccountRecord {
            index: 0,
            name: account_name.to_string(),
            xpub: key.xpub().to_string(),
            next_external: 0,
            next_internal: 0,
        };

        store.transaction(|addr_mgr, _| {
            if addr_mgr.get(keys::MANAGER)?.is_some() {
                return Err(ConflictableTransactionError::Abort(
                    WalletError::AlreadyExists(store.path().display().to_string()),
                ));
            }
            tx_put(addr_mgr, keys::MANAGER, manager)?;
            tx_put(addr_mgr, &keys::account(0), &account)?;
            tx_put(addr_mgr, keys::NEXT_ACCOUNT, &1u32)?;
            Ok(())
        })?;

        Self::load(store, network, Some(master))
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn has_private_keys(&self) -> bool {
        self.master.is_some()
    }

    /// Create the next account and return its index
    pub fn new_account(&self, name: &str) -> Result<u32, WalletError> {
        let master = self.master.as_ref().ok_or_else(|| {
            WalletError::Signing("creating an account requires private key access".into())
        })?;

        let (index, key) = self.store.transaction(|addr_mgr, _| {
            let index = tx_get::<u32>(addr_mgr, keys::NEXT_ACCOUNT)?.unwrap_or(0);
            let key = master
                .derive_account_key(index)
                .map_err(ConflictableTransactionError::Abort)?;

            let record = AccountRecord {
                index,
                name: name.to_string(),
                xpub: key.xpub().to_string(),
                next_external: 0,
                next_internal: 0,
            };
            tx_put(addr_mgr, &keys::account(index), &record)?;
            tx_put(addr_mgr, keys::NEXT_ACCOUNT, &(index + 1))?;
            Ok((index, key))
        })?;

        self.account_keys.write().insert(index, key);
        log::info!("Created account {} ({})", index, name);
        Ok(index)
    }

    /// Highest-indexed account
    pub fn last_account(&self) -> Result<u32, WalletError> {
        let next: Option<u32> = Store::get(self.store.addr_mgr(), keys::NEXT_ACCOUNT)?;
        match next {
            Some(n) if n > 0 => Ok(n - 1),
            _ => Err(WalletError::NoAccount),
        }
    }

    pub fn account(&self, index: u32) -> Result<AccountRecord, WalletError> {
        Store::get(self.store.addr_mgr(), &keys::account(index))?
            .ok_or_else(|| WalletError::NotFound(format!("account {}", index)))
    }

    pub fn accounts(&self) -> Result<Vec<AccountRecord>, WalletError> {
        Store::scan(self.store.addr_mgr(), keys::ACCOUNT_PREFIX)
    }

    /// Reserve, derive and persist the next `n` receiving addresses of `account`
    pub fn next_addresses(
        &self,
        account: u32,
        n: u32,
    ) -> Result<Vec<ManagedAddress>, WalletError> {
        if n == 0 {
            return Err(WalletError::InvalidArgument(
                "address count must be positive".into(),
            ));
        }
        if n > MAX_ADDRESSES_PER_CALL {
            return Err(WalletError::InvalidArgument(format!(
                "cannot allocate {} addresses at once (max {})",
                n, MAX_ADDRESSES_PER_CALL
            )));
        }
        let key = self.account_key(account)?;

        let addresses = self.store.transaction(|addr_mgr, _| {
            let mut record: AccountRecord = tx_get(addr_mgr, &keys::account(account))?
                .ok_or_else(|| {
                    ConflictableTransactionError::Abort(WalletError::NotFound(format!(
                        "account {}",
                        account
                    )))
                })?;

            let start = record.next_index(Chain::External);
            let end = start
                .checked_add(n)
                .filter(|end| *end - 1 <= MAX_ADDRESS_INDEX)
                .ok_or_else(|| {
                    ConflictableTransactionError::Abort(WalletError::InvalidArgument(format!(
                        "account {} cannot allocate {} more addresses",
                        account, n
                    )))
                })?;

            let mut addresses = Vec::new();
            for index in start..end {
                let managed = derive_managed(&key, Chain::External, index)
                    .map_err(ConflictableTransactionError::Abort)?;
                put_address(addr_mgr, &managed, false)?;
                addresses.push(managed);
            }

            record.next_external = end;
            tx_put(addr_mgr, &keys::account(account), &record)?;
            Ok(addresses)
        })?;

        log::debug!(
            "Account {}: allocated receiving indices {}..{}",
            account,
            addresses[0].index,
            addresses[addresses.len() - 1].index + 1
        );
        Ok(addresses)
    }

    /// Visit every address generated for `account` in index order, receiving
    /// branch first. A visitor error stops the walk and is returned as is.
    pub fn for_each_address<F>(&self, account: u32, mut visitor: F) -> Result<(), WalletError>
    where
        F: FnMut(&ManagedAddress) -> Result<(), WalletError>,
    {
        self.account(account)?;

        for item in self
            .store
            .addr_mgr()
            .scan_prefix(keys::account_addresses(account))
        {
            let (key, raw) = item?;
            let record: AddressRecord = serde_json::from_slice(&raw).map_err(|e| {
                StorageError::corrupt(String::from_utf8_lossy(&key), e.to_string())
            })?;
            let managed = self.to_managed(&record)?;
            visitor(&managed)?;
        }
        Ok(())
    }

    pub fn addresses(&self, account: u32) -> Result<Vec<ManagedAddress>, WalletError> {
        let mut addresses = Vec::new();
        self.for_each_address(account, |managed| {
            addresses.push(managed.clone());
            Ok(())
        })?;
        Ok(addresses)
    }

    pub fn lookup_script(&self, script: &Script) -> Result<Option<AddressLocator>, WalletError> {
        Store::get(self.store.addr_mgr(), &keys::script(script))
    }

    pub fn address_info(&self, address: &Address) -> Result<Option<AddressRecord>, WalletError> {
        match self.lookup_script(&address.script_pubkey())? {
            Some(locator) => Store::get(
                self.store.addr_mgr(),
                &keys::address(locator.account, locator.chain, locator.index),
            ),
            None => Ok(None),
        }
    }

    pub fn is_owned(&self, address: &Address) -> Result<bool, WalletError> {
        Ok(self.lookup_script(&address.script_pubkey())?.is_some())
    }

    /// Derive the next change address without reserving it
    pub fn peek_internal(&self, account: u32) -> Result<ManagedAddress, WalletError> {
        let record = self.account(account)?;
        let key = self.account_key(account)?;
        derive_managed(&key, Chain::Internal, record.next_index(Chain::Internal))
    }

    /// Reserve a change index previously returned by `peek_internal`
    pub fn commit_internal(&self, account: u32, index: u32) -> Result<ManagedAddress, WalletError> {
        let key = self.account_key(account)?;
        let managed = derive_managed(&key, Chain::Internal, index)?;

        self.store.transaction(|addr_mgr, _| {
            let mut record: AccountRecord = tx_get(addr_mgr, &keys::account(account))?
                .ok_or_else(|| {
                    ConflictableTransactionError::Abort(WalletError::NotFound(format!(
                        "account {}",
                        account
                    )))
                })?;
            if record.next_internal <= index {
                record.next_internal = index + 1;
                tx_put(addr_mgr, &keys::account(account), &record)?;
            }
            let address_key = keys::address(account, Chain::Internal, index);
            if tx_get::<AddressRecord>(addr_mgr, &address_key)?.is_none() {
                put_address(addr_mgr, &managed, false)?;
            }
            Ok(())
        })?;

        log::debug!("Account {}: allocated change index {}", account, index);
        Ok(managed)
    }

    /// Private key for an owned address; fails when the wallet is watch-only
    pub fn private_key(&self, locator: &AddressLocator) -> Result<PrivateKey, WalletError> {
        let key = self
            .account_key(locator.account)
            .map_err(|_| WalletError::Signing(format!("no key for account {}", locator.account)))?;
        let pair = key.derive_address_key(locator.chain, locator.index)?;
        pair.private_key().copied().ok_or_else(|| {
            WalletError::Signing(format!(
                "private key for {}/{}/{} is unavailable",
                locator.account,
                locator.chain.index(),
                locator.index
            ))
        })
    }

    fn account_key(&self, account: u32) -> Result<AccountKey, WalletError> {
        self.account_keys
            .read()
            .get(&account)
            .cloned()
            .ok_or_else(|| WalletError::NotFound(format!("account {}", account)))
    }

    fn to_managed(&self, record: &AddressRecord) -> Result<ManagedAddress, WalletError> {
        let address = Address::from_str(&record.address)
            .and_then(|a| a.require_network(self.network))
            .map_err(|e| StorageError::corrupt(record.address.clone(), e.to_string()))?;
        Ok(ManagedAddress {
            account: record.account,
            chain: record.chain,
            index: record.index,
            address,
        })
    }
}

fn derive_managed(key: &AccountKey, chain: Chain, index: u32) -> Result<ManagedAddress, WalletError> {
    let pair = key.derive_address_key(chain, index)?;
    Ok(ManagedAddress {
        account: key.account(),
        chain,
        index,
        address: pair.address,
    })
}

fn put_address(
    addr_mgr: &sled::transaction::TransactionalTree,
    managed: &ManagedAddress,
    used: bool,
) -> sled::transaction::ConflictableTransactionResult<(), WalletError> {
    let record = AddressRecord {
        account: managed.account,
        chain: managed.chain,
        index: managed.index,
        address: managed.address.to_string(),
        used,
    };
    tx_put(
        addr_mgr,
        &keys::address(managed.account, managed.chain, managed.index),
        &record,
    )?;
    tx_put(
        addr_mgr,
        &keys::script(&managed.address.script_pubkey()),
        &managed.locator(),
    )
}
