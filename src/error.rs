//! Error types for wallet operations
//!
//! `WalletError` is what every public operation returns. Persistence failures are
//! wrapped in `StorageError` so callers can tell a broken store apart from bad input.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WalletError {
    #[error("Invalid seed: {0}")]
    InvalidSeed(String),

    #[error("No account has been created")]
    NoAccount,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid destination: {0}")]
    InvalidDestination(String),

    #[error("Insufficient funds: need {needed} sats, have {available} sats")]
    InsufficientFunds { needed: u64, available: u64 },

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Wallet already exists: {0}")]
    AlreadyExists(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Bitcoin error: {0}")]
    Bitcoin(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl WalletError {
    /// True when the same call can succeed with different arguments
    /// (another amount, another address, a lower confirmation target).
    pub fn is_retryable_with_new_input(&self) -> bool {
        matches!(
            self,
            WalletError::InvalidArgument(_)
                | WalletError::InvalidDestination(_)
                | WalletError::InsufficientFunds { .. }
                | WalletError::NotFound(_)
        )
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Corrupt record {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

impl StorageError {
    pub fn corrupt(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

impl From<sled::Error> for WalletError {
    fn from(err: sled::Error) -> Self {
        WalletError::Storage(StorageError::Database(err))
    }
}

impl From<serde_json::Error> for WalletError {
    fn from(err: serde_json::Error) -> Self {
        WalletError::Storage(StorageError::Json(err))
    }
}

pub type Result<T> = std::result::Result<T, WalletError>;
