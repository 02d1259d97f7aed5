use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::{ChainAdapter, FetchError, newest_first};
use crate::core::{Chain, NormalizedTx, WatchedAddress};

/// Esplora-style REST client (Blockstream) for UTXO chains.
pub struct BlockstreamClient {
    base_url: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct EsploraTx {
    #[serde(default = "unknown_txid")]
    txid: String,
    #[serde(default)]
    vin: Vec<EsploraVin>,
    #[serde(default)]
    status: Option<EsploraStatus>,
}

#[derive(Debug, Deserialize)]
struct EsploraVin {
    /// Null for coinbase inputs.
    #[serde(default)]
    prevout: Option<EsploraPrevout>,
}

#[derive(Debug, Deserialize)]
struct EsploraPrevout {
    #[serde(default)]
    scriptpubkey_address: Option<String>,
    #[serde(default)]
    value: u64,
}

#[derive(Debug, Deserialize)]
struct EsploraStatus {
    #[serde(default)]
    block_time: Option<i64>,
}

fn unknown_txid() -> String {
    "unknown".into()
}

impl EsploraTx {
    fn block_time(&self) -> Option<i64> {
        self.status.as_ref().and_then(|s| s.block_time)
    }

    /// Sum of inputs spent from `address` (exact match).
    fn spent_by(&self, address: &str) -> u128 {
        self.vin
            .iter()
            .filter_map(|vin| vin.prevout.as_ref())
            .filter(|prevout| prevout.scriptpubkey_address.as_deref() == Some(address))
            .map(|prevout| u128::from(prevout.value))
            .sum()
    }
}

impl BlockstreamClient {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    fn txs_url(&self, address: &str) -> String {
        format!("{}/address/{address}/txs", self.base_url)
    }
}

#[async_trait]
impl ChainAdapter for BlockstreamClient {
    fn chain(&self) -> Chain {
        Chain::Utxo
    }

    async fn fetch_latest(&self, target: &WatchedAddress) -> Result<Option<NormalizedTx>, FetchError> {
        let body = self
            .client
            .get(self.txs_url(&target.address))
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let raw: Vec<Value> = serde_json::from_str(&body)?;
        let Some(first_raw) = raw.first() else {
            debug!("No BTC transactions for {}", target.address);
            return Ok(None);
        };
        let latest = EsploraTx::deserialize(first_raw)?;

        // Provider contract: most recent first. Older entries are only read
        // for their times; ones that do not parse are skipped.
        let older = raw[1..]
            .iter()
            .map(|tx| tx.pointer("/status/block_time").and_then(Value::as_i64));
        if !newest_first(latest.block_time(), older) {
            warn!(
                "Blockstream history for {} is not newest-first; inspecting {} anyway",
                target.label, latest.txid
            );
        }

        Ok(Some(NormalizedTx {
            chain: Chain::Utxo,
            tx_id: latest.txid.clone(),
            from_address: None,
            to_address: None,
            value: latest.spent_by(&target.address),
            raw: Some(first_raw.clone()),
        }))
    }
}
