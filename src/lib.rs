//! HD wallet core: BIP84 keys, addresses, transactions
//!
//! Derives P2WPKH addresses from a seed, tracks the transactions that touch them in an
//! embedded database, and builds and signs spends from the tracked outputs.
//!
//! # Architecture
//!
//! - **Key Derivation**: `m/84'/coin'/account'/chain/index` from a BIP32 seed
//! - **Address Manager**: accounts, gap-free address indices, ownership lookup
//! - **Transaction Store**: recorded transactions, owned outputs, balances
//! - **Transaction Builder**: coin selection, fees, change, P2WPKH signing
//! - **Wallet**: the handle owning all of the above for one database
//!
//! # Example
//!
//! ```ignore
//! use hd_wallet::{Seed, Wallet, WalletConfig};
//!
//! let seed = Seed::generate();
//! let wallet = Wallet::create("./my-wallet", b"passphrase", &seed, WalletConfig::from_env())?;
//!
//! let address = wallet.gen_addresses(1)?.remove(0);
//! println!("Send coins to {}", address.address);
//!
//! wallet.close()?;
//! ```

// Public modules
pub mod config;
pub mod error;
pub mod storage;
pub mod transaction;
pub mod wallet;

// Re-exports for convenience
pub use config::{KdfParams, WalletConfig};
pub use error::{Result, StorageError, WalletError};
pub use storage::{Confirmation, OutputRecord, TxRecord};
pub use transaction::{Broadcaster, CreatedTransaction, EsploraBroadcaster};
pub use wallet::{Chain, ManagedAddress, OpenCallbacks, RecordOutcome, Seed, Wallet};

pub use bitcoin::{Address, Amount, Network, Transaction, Txid};
