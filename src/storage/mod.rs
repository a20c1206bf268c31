//! Storage and persistence layer
//!
//! - Embedded database handle and namespaces
//! - Persisted record models
//! - Passphrase sealing of the seed

mod crypto;
mod db;
mod models;

pub(crate) use db::{keys, tx_get, tx_put};
pub use crypto::SealedSeed;
pub use db::{Store, ADDR_MGR_NAMESPACE, TX_MGR_NAMESPACE};
pub use models::{
    AccountRecord, AddressLocator, AddressRecord, Confirmation, ManagerRecord, OutputRecord,
    TxRecord,
};
