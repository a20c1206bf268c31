use bip39::Mnemonic;
use bitcoin::bip32::{ChildNumber, DerivationPath, Fingerprint, Xpriv, Xpub};
use bitcoin::key::CompressedPublicKey;
use bitcoin::secp256k1::Secp256k1;
use bitcoin::{Address, Network, PrivateKey};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use zeroize::Zeroizing;

use crate::config;
use crate::error::WalletError;

/// Shortest seed accepted by BIP32 (128 bits)
pub const MIN_SEED_LEN: usize = 16;
/// Longest seed accepted by BIP32 (512 bits)
pub const MAX_SEED_LEN: usize = 64;
/// Seed length used by `Seed::generate`
pub const RECOMMENDED_SEED_LEN: usize = 32;

/// Root entropy of the key tree. Wiped from memory on drop.
#[derive(Clone)]
pub struct Seed(Zeroizing<Vec<u8>>);

impl Seed {
    pub fn new(bytes: &[u8]) -> Result<Self, WalletError> {
        if !(MIN_SEED_LEN..=MAX_SEED_LEN).contains(&bytes.len()) {
            return Err(WalletError::InvalidSeed(format!(
                "seed must be {}..={} bytes, got {}",
                MIN_SEED_LEN,
                MAX_SEED_LEN,
                bytes.len()
            )));
        }
        Ok(Self(Zeroizing::new(bytes.to_vec())))
    }

    /// Generate a new random seed of `RECOMMENDED_SEED_LEN` bytes
    pub fn generate() -> Self {
        let mut bytes = Zeroizing::new(vec![0u8; RECOMMENDED_SEED_LEN]);
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// BIP39 seed for a mnemonic phrase and optional passphrase
    pub fn from_mnemonic(words: &str, passphrase: &str) -> Result<Self, WalletError> {
        let mnemonic =
            Mnemonic::parse(words).map_err(|e| WalletError::InvalidSeed(e.to_string()))?;
        let seed = Zeroizing::new(mnemonic.to_seed(passphrase));
        Self::new(&seed[..])
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Seed(<{} bytes>)", self.0.len())
    }
}

/// Derivation branch below an account: receiving addresses or change
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    External,
    Internal,
}

impl Chain {
    pub fn index(self) -> u32 {
        match self {
            Chain::External => 0,
            Chain::Internal => 1,
        }
    }
}

/// BIP32 master key. Only lives in memory while a wallet is open with private access.
pub struct MasterKey {
    xpriv: Xpriv,
    network: Network,
}

impl MasterKey {
    pub fn from_seed(seed: &Seed, network: Network) -> Result<Self, WalletError> {
        let xpriv = Xpriv::new_master(network, seed.as_bytes())
            .map_err(|e| WalletError::InvalidSeed(e.to_string()))?;
        Ok(Self { xpriv, network })
    }

    pub fn fingerprint(&self) -> Fingerprint {
        let secp = Secp256k1::new();
        self.xpriv.fingerprint(&secp)
    }

    /// Derive the BIP84 account key `m/84'/coin'/account'`
    pub fn derive_account_key(&self, account: u32) -> Result<AccountKey, WalletError> {
        let secp = Secp256k1::new();
        let path = account_path(account, self.network)?;

        let xpriv = self
            .xpriv
            .derive_priv(&secp, &path)
            .map_err(|e| WalletError::Bitcoin(e.to_string()))?;
        let xpub = Xpub::from_priv(&secp, &xpriv);

        Ok(AccountKey {
            account,
            xpriv: Some(xpriv),
            xpub,
            network: self.network,
        })
    }
}

/// Derive an account key straight from a seed
pub fn derive_account_key(
    seed: &Seed,
    account: u32,
    network: Network,
) -> Result<AccountKey, WalletError> {
    MasterKey::from_seed(seed, network)?.derive_account_key(account)
}

fn account_path(account: u32, network: Network) -> Result<DerivationPath, WalletError> {
    if account >= (1 << 31) {
        return Err(WalletError::InvalidArgument(format!(
            "account index {} out of range",
            account
        )));
    }
    DerivationPath::from_str(&config::account_path(network, account))
        .map_err(|e| WalletError::Bitcoin(e.to_string()))
}

/// Key of one account. Address keys are derived from here, never from the master.
#[derive(Clone)]
pub struct AccountKey {
    account: u32,
    xpriv: Option<Xpriv>,
    xpub: Xpub,
    network: Network,
}

impl AccountKey {
    /// Public-only account key; derives addresses but cannot sign
    pub fn from_xpub(account: u32, xpub: Xpub, network: Network) -> Self {
        Self {
            account,
            xpriv: None,
            xpub,
            network,
        }
    }

    pub fn account(&self) -> u32 {
        self.account
    }

    pub fn xpub(&self) -> &Xpub {
        &self.xpub
    }

    pub fn has_private(&self) -> bool {
        self.xpriv.is_some()
    }

    /// Derive the key pair at `chain/index` below this account
    pub fn derive_address_key(
        &self,
        chain: Chain,
        index: u32,
    ) -> Result<AddressKeyPair, WalletError> {
        let secp = Secp256k1::new();
        let path = [
            ChildNumber::from_normal_idx(chain.index())
                .map_err(|e| WalletError::Bitcoin(e.to_string()))?,
            ChildNumber::from_normal_idx(index)
                .map_err(|e| WalletError::InvalidArgument(e.to_string()))?,
        ];

        let (public_key, private_key) = match &self.xpriv {
            Some(xpriv) => {
                let child = xpriv
                    .derive_priv(&secp, &path)
                    .map_err(|e| WalletError::Bitcoin(e.to_string()))?;
                let public_key = CompressedPublicKey(child.private_key.public_key(&secp));
                (public_key, Some(PrivateKey::new(child.private_key, self.network)))
            }
            None => {
                let child = self
                    .xpub
                    .derive_pub(&secp, &path)
                    .map_err(|e| WalletError::Bitcoin(e.to_string()))?;
                (CompressedPublicKey(child.public_key), None)
            }
        };

        Ok(AddressKeyPair {
            chain,
            index,
            address: Address::p2wpkh(&public_key, self.network),
            public_key,
            private_key,
        })
    }
}

impl fmt::Debug for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountKey")
            .field("account", &self.account)
            .field("xpub", &self.xpub)
            .field("has_private", &self.has_private())
            .finish()
    }
}

pub struct AddressKeyPair {
    pub chain: Chain,
    pub index: u32,
    pub address: Address,
    pub public_key: CompressedPublicKey,
    private_key: Option<PrivateKey>,
}

impl AddressKeyPair {
    pub fn private_key(&self) -> Option<&PrivateKey> {
        self.private_key.as_ref()
    }
}
