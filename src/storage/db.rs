use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
    TransactionalTree,
};
use sled::{Db, Transactional, Tree};
use std::path::{Path, PathBuf};

use crate::error::{StorageError, WalletError};

/// Namespace holding accounts, addresses and the sealed seed
pub const ADDR_MGR_NAMESPACE: &str = "waddrmgrNamespace";
/// Namespace holding transactions, outputs and the synced height
pub const TX_MGR_NAMESPACE: &str = "wtxmgr";

/// File sled writes into every database directory
const SLED_CONF_FILE: &str = "conf";

/// Handle to the embedded database backing one wallet.
///
/// The underlying `sled::Db` holds an exclusive lock on `path` until every clone
/// of this handle is dropped.
#[derive(Clone)]
pub struct Store {
    db: Db,
    addr_mgr: Tree,
    tx_mgr: Tree,
    path: PathBuf,
}

impl Store {
    /// Open a database at `path` for a new wallet
    pub fn create(path: &Path) -> Result<Self, WalletError> {
        let store = Self::open_db(path)?;
        if store.addr_mgr.contains_key(keys::MANAGER)? {
            return Err(WalletError::AlreadyExists(path.display().to_string()));
        }
        Ok(store)
    }

    /// Open the database of an existing wallet.
    ///
    /// A directory without a database in it is `NotFound` and is left untouched.
    pub fn open(path: &Path) -> Result<Self, WalletError> {
        if !Self::exists(path) {
            return Err(WalletError::NotFound(path.display().to_string()));
        }
        let store = Self::open_db(path)?;
        if !store.addr_mgr.contains_key(keys::MANAGER)? {
            return Err(WalletError::NotFound(path.display().to_string()));
        }
        Ok(store)
    }

    /// Whether `path` holds a sled database
    pub fn exists(path: &Path) -> bool {
        path.join(SLED_CONF_FILE).is_file()
    }

    fn open_db(path: &Path) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        let addr_mgr = db.open_tree(ADDR_MGR_NAMESPACE)?;
        let tx_mgr = db.open_tree(TX_MGR_NAMESPACE)?;
        log::debug!("Opened wallet database at {:?}", path);
        Ok(Self {
            db,
            addr_mgr,
            tx_mgr,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn addr_mgr(&self) -> &Tree {
        &self.addr_mgr
    }

    pub fn tx_mgr(&self) -> &Tree {
        &self.tx_mgr
    }

    /// Run `f` as one serializable transaction over both namespaces.
    ///
    /// Returning an abort error, or any storage failure, discards every write made by `f`.
    /// `f` may be re-run when sled detects a conflicting concurrent transaction.
    pub fn transaction<F, T>(&self, f: F) -> Result<T, WalletError>
    where
        F: Fn(&TransactionalTree, &TransactionalTree) -> ConflictableTransactionResult<T, WalletError>,
    {
        (&self.addr_mgr, &self.tx_mgr)
            .transaction(|(addr_mgr, tx_mgr)| f(addr_mgr, tx_mgr))
            .map_err(|err| match err {
                TransactionError::Abort(err) => err,
                TransactionError::Storage(err) => WalletError::from(err),
            })
    }

    pub fn get<T: DeserializeOwned>(tree: &Tree, key: &[u8]) -> Result<Option<T>, WalletError> {
        match tree.get(key)? {
            Some(raw) => Ok(Some(decode(key, &raw)?)),
            None => Ok(None),
        }
    }

    /// Decode every record under `prefix`, in key order
    pub fn scan<T: DeserializeOwned>(tree: &Tree, prefix: &[u8]) -> Result<Vec<T>, WalletError> {
        let mut records = Vec::new();
        for item in tree.scan_prefix(prefix) {
            let (key, raw) = item?;
            records.push(decode(&key, &raw)?);
        }
        Ok(records)
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}

fn decode<T: DeserializeOwned>(key: &[u8], raw: &[u8]) -> Result<T, StorageError> {
    serde_json::from_slice(raw)
        .map_err(|e| StorageError::corrupt(String::from_utf8_lossy(key), e.to_string()))
}

/// Read and decode a record inside a transaction
pub(crate) fn tx_get<T: DeserializeOwned>(
    tree: &TransactionalTree,
    key: &[u8],
) -> ConflictableTransactionResult<Option<T>, WalletError> {
    match tree.get(key)? {
        Some(raw) => decode(key, &raw)
            .map(Some)
            .map_err(|e| ConflictableTransactionError::Abort(e.into())),
        None => Ok(None),
    }
}

/// Encode and write a record inside a transaction
pub(crate) fn tx_put<T: Serialize>(
    tree: &TransactionalTree,
    key: &[u8],
    value: &T,
) -> ConflictableTransactionResult<(), WalletError> {
    let raw = serde_json::to_vec(value)
        .map_err(|e| ConflictableTransactionError::Abort(WalletError::from(e)))?;
    tree.insert(key, raw)?;
    Ok(())
}

/// Key layout of both namespaces. Integers are big-endian so key order is index order.
pub(crate) mod keys {
    use bitcoin::hashes::Hash;
    use bitcoin::{OutPoint, Script, Txid};

    use crate::wallet::keys::Chain;

    pub const MANAGER: &[u8] = b"manager";
    pub const NEXT_ACCOUNT: &[u8] = b"next_account";
    pub const SYNCED_HEIGHT: &[u8] = b"synced_height";

    pub const ACCOUNT_PREFIX: &[u8] = b"acct/";
    pub const ADDRESS_PREFIX: &[u8] = b"addr/";
    pub const SCRIPT_PREFIX: &[u8] = b"script/";
    pub const TX_PREFIX: &[u8] = b"tx/";
    pub const OUTPUT_PREFIX: &[u8] = b"out/";
    /// Outpoint to the txid of the recorded transaction spending it
    pub const SPEND_PREFIX: &[u8] = b"spend/";

    fn key(prefix: &[u8], body: &[u8]) -> Vec<u8> {
        let mut key = Vec::with_capacity(prefix.len() + body.len() + 4);
        key.extend_from_slice(prefix);
        key.extend_from_slice(body);
        key
    }

    pub fn account(index: u32) -> Vec<u8> {
        key(ACCOUNT_PREFIX, &index.to_be_bytes())
    }

    /// Prefix of every address of `account`, external branch first
    pub fn account_addresses(account: u32) -> Vec<u8> {
        key(ADDRESS_PREFIX, &account.to_be_bytes())
    }

    pub fn address(account: u32, chain: Chain, index: u32) -> Vec<u8> {
        let mut key = account_addresses(account);
        key.push(chain.index() as u8);
        key.extend_from_slice(&index.to_be_bytes());
        key
    }

    pub fn script(script: &Script) -> Vec<u8> {
        key(SCRIPT_PREFIX, script.as_bytes())
    }

    pub fn tx(txid: &Txid) -> Vec<u8> {
        key(TX_PREFIX, txid.as_byte_array())
    }

    pub fn output(outpoint: &OutPoint) -> Vec<u8> {
        let mut key = key(OUTPUT_PREFIX, outpoint.txid.as_byte_array());
        key.extend_from_slice(&outpoint.vout.to_be_bytes());
        key
    }

    pub fn spend(outpoint: &OutPoint) -> Vec<u8> {
        let mut key = key(SPEND_PREFIX, outpoint.txid.as_byte_array());
        key.extend_from_slice(&outpoint.vout.to_be_bytes());
        key
    }
}
