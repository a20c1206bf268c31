//! Transaction construction and broadcast
//!
//! - Coin selection and fee estimation
//! - P2WPKH input signing
//! - Esplora broadcast

pub mod broadcast;
pub mod builder;
pub mod signer;

pub use broadcast::{Broadcaster, EsploraBroadcaster};
pub use builder::{estimate_tx_size, CreatedTransaction, Selection, TransactionBuilder};
pub use signer::{sign_transaction, KeySource};
