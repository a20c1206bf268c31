//! Data models for wallet storage

use bitcoin::{Network, OutPoint, ScriptBuf, Txid};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::crypto::SealedSeed;
use crate::wallet::keys::Chain;

/// Wallet-wide metadata, written once at creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerRecord {
    pub version: u32,
    pub network: Network,
    pub created_at: DateTime<Utc>,
    /// BIP32 fingerprint of the master key, hex
    pub master_fingerprint: String,
    pub sealed_seed: SealedSeed,
}

impl ManagerRecord {
    pub const CURRENT_VERSION: u32 = 1;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub index: u32,
    pub name: String,
    /// Account-level extended public key
    pub xpub: String,
    /// Next unallocated receiving index
    pub next_external: u32,
    /// Next unallocated change index
    pub next_internal: u32,
}

impl AccountRecord {
    pub fn next_index(&self, chain: Chain) -> u32 {
        match chain {
            Chain::External => self.next_external,
            Chain::Internal => self.next_internal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRecord {
    pub account: u32,
    pub chain: Chain,
    pub index: u32,
    pub address: String,
    /// Set once a recorded transaction pays this address
    pub used: bool,
}

/// Where an owned script sits in the key tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressLocator {
    pub account: u32,
    pub chain: Chain,
    pub index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum Confirmation {
    Unconfirmed,
    Confirmed { height: u32 },
}

impl Confirmation {
    pub fn height(&self) -> Option<u32> {
        match self {
            Confirmation::Unconfirmed => None,
            Confirmation::Confirmed { height } => Some(*height),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxRecord {
    pub txid: Txid,
    /// Consensus-encoded transaction, hex
    pub raw_hex: String,
    pub confirmation: Confirmation,
    pub first_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRecord {
    pub outpoint: OutPoint,
    pub value_sats: u64,
    pub script_pubkey: ScriptBuf,
    pub owner: AddressLocator,
    /// Height of the block containing the funding transaction
    pub height: Option<u32>,
    pub spent_by: Option<Txid>,
}

impl OutputRecord {
    pub fn is_spent(&self) -> bool {
        self.spent_by.is_some()
    }

    /// Confirmation count relative to the chain tip `tip`
    pub fn confirmations(&self, tip: u32) -> u32 {
        match self.height {
            Some(height) if tip >= height => tip - height + 1,
            Some(_) => 1,
            None => 0,
        }
    }
}
