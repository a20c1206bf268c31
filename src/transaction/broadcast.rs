use bitcoin::{Transaction, Txid};
use std::str::FromStr;

use crate::config::WalletConfig;
use crate::error::WalletError;

/// Hands a signed transaction to the network
#[allow(async_fn_in_trait)]
pub trait Broadcaster {
    async fn broadcast(&self, tx: &Transaction) -> Result<Txid, WalletError>;
}

/// Broadcasts through an Esplora `POST /tx` endpoint. Failures are not retried.
#[derive(Clone, Debug)]
pub struct EsploraBroadcaster {
    client: reqwest::Client,
    base_url: String,
}

impl EsploraBroadcaster {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &WalletConfig) -> Self {
        Self::new(config.esplora_url.clone())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl Broadcaster for EsploraBroadcaster {
    async fn broadcast(&self, tx: &Transaction) -> Result<Txid, WalletError> {
        let tx_hex = bitcoin::consensus::encode::serialize_hex(tx);

        log::debug!("Broadcasting transaction to: {}/tx", self.base_url);

        let response = self
            .client
            .post(format!("{}/tx", self.base_url))
            .body(tx_hex)
            .send()
            .await
            .map_err(|e| WalletError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(WalletError::Network(format!(
                "Broadcast failed: {}",
                error_text
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| WalletError::Network(e.to_string()))?;

        let txid = Txid::from_str(body.trim())
            .map_err(|e| WalletError::Network(format!("Unexpected broadcast response: {}", e)))?;
        if txid != tx.compute_txid() {
            log::warn!(
                "Esplora returned txid {} for transaction {}",
                txid,
                tx.compute_txid()
            );
        }
        Ok(txid)
    }
}
