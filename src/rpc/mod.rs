pub mod blockstream;
pub mod etherscan;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;

use crate::core::{Chain, NormalizedTx, WatchedAddress};

pub use blockstream::BlockstreamClient;
pub use etherscan::EtherscanClient;

/// Fetches the latest transaction of an address from a chain data provider.
///
/// `Ok(None)` means the provider had nothing to inspect this cycle. Errors are
/// per-address and never fatal to the poll loop.
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    fn chain(&self) -> Chain;
    async fn fetch_latest(&self, target: &WatchedAddress) -> Result<Option<NormalizedTx>, FetchError>;
}

#[derive(Debug, Error)]
pub enum FetchError {
    /// Transport failure, timeout or non-2xx status.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("unparsable value {value:?} in tx {tx_id}")]
    BadValue { tx_id: String, value: String },
}

/// HTTP client shared by all adapters. Every request is bounded by `timeout`.
pub fn build_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("wallet-sentinel/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Whether a provider list is really newest-first, judged by timestamps.
/// Entries without a timestamp (unconfirmed) count as newest.
pub(crate) fn newest_first<I>(first: Option<i64>, rest: I) -> bool
where
    I: IntoIterator<Item = Option<i64>>,
{
    let Some(first) = first else {
        return true;
    };
    rest.into_iter().flatten().all(|t| t <= first)
}
