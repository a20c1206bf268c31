//! Wallet configuration
//!
//! Fixes the Bitcoin network, fee policy and seed-sealing parameters for one wallet
//! handle. The network is chosen at construction and never changes afterwards.
use bitcoin::Network;
use serde::{Deserialize, Serialize};
use std::env;

/// Default fee rate when none is configured (sat/vB)
pub const DEFAULT_FEE_RATE_SAT_VB: u64 = 2;

/// Smallest change output worth creating (P2WPKH dust limit)
pub const DEFAULT_DUST_LIMIT_SATS: u64 = 546;

#[derive(Clone, Debug)]
pub struct WalletConfig {
    /// Bitcoin network type (address encoding and BIP44 coin type)
    pub network: Network,
    /// Esplora API base URL used by `EsploraBroadcaster`
    pub esplora_url: String,
    /// Fee rate used by the transaction builder
    pub fee_rate_sat_vb: u64,
    /// Change below this amount is added to the fee instead
    pub dust_limit_sats: u64,
    /// Parameters for deriving the seed-sealing key from the passphrase
    pub kdf: KdfParams,
}

/// scrypt cost parameters, persisted alongside the sealed seed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub log_n: u8,
    pub r: u32,
    pub p: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            log_n: 15,
            r: 8,
            p: 1,
        }
    }
}

impl WalletConfig {
    /// Configuration for the given network with default fee policy
    pub fn new(network: Network) -> Self {
        Self {
            network,
            esplora_url: default_esplora_url(network).to_string(),
            ..Default::default()
        }
    }

    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `BITCOIN_NETWORK`: "bitcoin"/"mainnet", "testnet", "signet" (default) or "regtest"
    /// - `ESPLORA_URL`: Esplora API endpoint (optional, has per-network defaults)
    /// - `FEE_RATE_SAT_VB`: fee rate for new transactions (optional)
    pub fn from_env() -> Self {
        let network_str = env::var("BITCOIN_NETWORK")
            .unwrap_or_else(|_| "signet".to_string())
            .to_lowercase();

        let network = match network_str.as_str() {
            "bitcoin" | "mainnet" => {
                log::info!("Using MAINNET network");
                Network::Bitcoin
            }
            "testnet" => {
                log::info!("Using TESTNET network");
                Network::Testnet
            }
            "regtest" => {
                log::info!("Using REGTEST network");
                Network::Regtest
            }
            "signet" | "" => {
                log::info!("Using SIGNET network");
                Network::Signet
            }
            other => {
                log::warn!("Unknown network '{}', defaulting to Signet", other);
                Network::Signet
            }
        };

        let esplora_url = env::var("ESPLORA_URL")
            .unwrap_or_else(|_| default_esplora_url(network).to_string());
        log::info!("Esplora URL: {}", esplora_url);

        let fee_rate_sat_vb = match env::var("FEE_RATE_SAT_VB") {
            Ok(raw) => raw.parse().unwrap_or_else(|_| {
                log::warn!(
                    "Invalid FEE_RATE_SAT_VB '{}', using {} sat/vB",
                    raw,
                    DEFAULT_FEE_RATE_SAT_VB
                );
                DEFAULT_FEE_RATE_SAT_VB
            }),
            Err(_) => DEFAULT_FEE_RATE_SAT_VB,
        };

        Self {
            network,
            esplora_url,
            fee_rate_sat_vb,
            ..Default::default()
        }
    }

    /// Get the BIP44 coin type for this network
    ///
    /// - Mainnet: 0
    /// - Testnet/Signet/Regtest: 1
    pub fn coin_type(&self) -> u32 {
        coin_type(self.network)
    }

    /// BIP84 account derivation path, e.g. "m/84'/1'/0'"
    pub fn account_path(&self, account: u32) -> String {
        account_path(self.network, account)
    }
}

/// BIP84 derivation path of `account` on `network`
pub fn account_path(network: Network, account: u32) -> String {
    format!("m/84'/{}'/{}'", coin_type(network), account)
}

/// BIP44 coin type of `network`
pub fn coin_type(network: Network) -> u32 {
    match network {
        Network::Bitcoin => 0,
        _ => 1,
    }
}

fn default_esplora_url(network: Network) -> &'static str {
    match network {
        Network::Bitcoin => "https://mempool.space/api",
        Network::Testnet => "https://mempool.space/testnet/api",
        Network::Regtest => "http://localhost:3000",
        _ => "https://mempool.space/signet/api",
    }
}

impl Default for WalletConfig {
    /// Default configuration (Signet)
    fn default() -> Self {
        Self {
            network: Network::Signet,
            esplora_url: default_esplora_url(Network::Signet).to_string(),
            fee_rate_sat_vb: DEFAULT_FEE_RATE_SAT_VB,
            dust_limit_sats: DEFAULT_DUST_LIMIT_SATS,
            kdf: KdfParams::default(),
        }
    }
}
