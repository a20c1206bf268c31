//! Wallet Core Module
//!
//! - `keys.rs` - Seeds and BIP84 key derivation
//! - `address_manager.rs` - Accounts and generated addresses
//! - `tx_store.rs` - Recorded transactions and owned outputs
//! - `manager.rs` - The `Wallet` handle tying them together

pub mod address_manager;
pub mod keys;
pub mod manager;
pub mod tx_store;

pub use address_manager::{AddressManager, ManagedAddress, MAX_ADDRESSES_PER_CALL};
pub use keys::{AccountKey, Chain, MasterKey, Seed};
pub use manager::{OpenCallbacks, Wallet, DEFAULT_ACCOUNT_NAME};
pub use tx_store::{RecordOutcome, TxStore};
