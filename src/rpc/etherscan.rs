use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::{ChainAdapter, FetchError, newest_first};
use crate::core::{Chain, NormalizedTx, WatchedAddress};

/// Etherscan `account/txlist` client for account chains.
pub struct EtherscanClient {
    base_url: String,
    api_key: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct TxListResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: String,
    /// A list on success, an error string otherwise.
    #[serde(default)]
    result: Value,
}

#[derive(Debug, Deserialize)]
struct EtherscanTx {
    #[serde(default = "unknown_hash")]
    hash: String,
    #[serde(default)]
    value: String,
    #[serde(default)]
    to: String,
    #[serde(default)]
    from: String,
    #[serde(default, rename = "timeStamp")]
    time_stamp: String,
}

fn unknown_hash() -> String {
    "unknown".into()
}

impl EtherscanTx {
    fn timestamp(&self) -> Option<i64> {
        self.time_stamp.parse().ok()
    }

    fn value_wei(&self) -> Result<u128, FetchError> {
        let value = self.value.trim();
        if value.is_empty() {
            return Ok(0);
        }
        value.parse().map_err(|_| FetchError::BadValue {
            tx_id: self.hash.clone(),
            value: self.value.clone(),
        })
    }
}

impl EtherscanClient {
    pub fn new(client: Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            client,
        }
    }
}

#[async_trait]
impl ChainAdapter for EtherscanClient {
    fn chain(&self) -> Chain {
        Chain::Account
    }

    async fn fetch_latest(&self, target: &WatchedAddress) -> Result<Option<NormalizedTx>, FetchError> {
        let body = self
            .client
            .get(&self.base_url)
            .query(&[
                ("module", "account"),
                ("action", "txlist"),
                ("address", target.address.as_str()),
                ("startblock", "0"),
                ("endblock", "99999999"),
                ("sort", "desc"),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let response: TxListResponse = serde_json::from_str(&body)?;
        if response.status != "1" {
            debug!(
                "Etherscan returned status {:?} for {}: {} {}",
                response.status, target.label, response.message, response.result
            );
            return Ok(None);
        }
        let Value::Array(raw) = response.result else {
            debug!("Etherscan result for {} is not a list", target.label);
            return Ok(None);
        };
        let Some(first_raw) = raw.first() else {
            return Ok(None);
        };
        let latest = EtherscanTx::deserialize(first_raw)?;

        // Requested sort=desc, so the first entry is the newest. The rest
        // only contribute timestamps.
        let older = raw[1..].iter().map(|tx| {
            tx.get("timeStamp")
                .and_then(Value::as_str)
                .and_then(|t| t.parse().ok())
        });
        if !newest_first(latest.timestamp(), older) {
            warn!(
                "Etherscan txlist for {} is not newest-first; inspecting {} anyway",
                target.label, latest.hash
            );
        }

        Ok(Some(NormalizedTx {
            chain: Chain::Account,
            tx_id: latest.hash.clone(),
            from_address: Some(latest.from.to_lowercase()),
            to_address: Some(latest.to.to_lowercase()),
            value: latest.value_wei()?,
            raw: Some(first_raw.clone()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;
    use std::time::Duration;

    const WATCHED: &str = "0x742d35Cc6634C0532925a3b844Bc454e4438f44e";
    const MIXER_MIXED: &str = "0xD90e2f925DA726b50C4Ed8D0Fb90Ad053324F31b";

    fn target() -> WatchedAddress {
        WatchedAddress::new(Chain::Account, WATCHED, "Treasury")
    }

    fn client(server: &MockServer) -> EtherscanClient {
        let http = crate::rpc::build_client(Duration::from_secs(5)).unwrap();
        EtherscanClient::new(http, server.url("/api"), "KEY")
    }

    #[tokio::test]
    async fn normalizes_latest_transaction() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api")
                    .query_param("module", "account")
                    .query_param("action", "txlist")
                    .query_param("address", WATCHED)
                    .query_param("sort", "desc")
                    .query_param("apikey", "KEY");
                then.status(200).json_body(json!({
                    "status": "1",
                    "message": "OK",
                    "result": [
                        {
                            "hash": "0xnew",
                            "value": "25000000000000000000",
                            "from": WATCHED,
                            "to": MIXER_MIXED,
                            "timeStamp": "1700000100"
                        },
                        {
                            "hash": "0xold",
                            "value": "1",
                            "from": WATCHED,
                            "to": WATCHED,
                            "timeStamp": "1700000000"
                        }
                    ]
                }));
            })
            .await;

        let tx = client(&server).fetch_latest(&target()).await.unwrap().unwrap();

        mock.assert_async().await;
        assert_eq!(tx.tx_id, "0xnew");
        assert_eq!(tx.value, 25_000_000_000_000_000_000);
        assert_eq!(tx.from_address.as_deref(), Some(WATCHED.to_lowercase().as_str()));
        assert_eq!(tx.to_address.as_deref(), Some(MIXER_MIXED.to_lowercase().as_str()));
        assert_eq!(tx.raw.unwrap()["hash"], "0xnew");
    }

    #[tokio::test]
    async fn non_success_status_is_none() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api");
                then.status(200).json_body(json!({
                    "status": "0",
                    "message": "NOTOK",
                    "result": "Invalid API Key"
                }));
            })
            .await;

        assert!(client(&server).fetch_latest(&target()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_result_is_none() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api");
                then.status(200)
                    .json_body(json!({ "status": "1", "message": "OK", "result": [] }));
            })
            .await;

        assert!(client(&server).fetch_latest(&target()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn contract_creation_has_empty_recipient() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api");
                then.status(200).json_body(json!({
                    "status": "1",
                    "message": "OK",
                    "result": [{ "hash": "0xdeploy", "value": "0", "from": WATCHED, "to": "" }]
                }));
            })
            .await;

        let tx = client(&server).fetch_latest(&target()).await.unwrap().unwrap();
        assert_eq!(tx.to_address.as_deref(), Some(""));
        assert_eq!(tx.value, 0);
    }

    #[tokio::test]
    async fn malformed_older_entry_is_skipped() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api");
                then.status(200).json_body(json!({
                    "status": "1",
                    "message": "OK",
                    "result": [
                        {
                            "hash": "0xnew",
                            "value": "7",
                            "from": WATCHED,
                            "to": WATCHED,
                            "timeStamp": "1700000100"
                        },
                        { "hash": ["not", "a", "string"], "value": 3 }
                    ]
                }));
            })
            .await;

        let tx = client(&server).fetch_latest(&target()).await.unwrap().unwrap();
        assert_eq!(tx.tx_id, "0xnew");
        assert_eq!(tx.value, 7);
    }

    #[tokio::test]
    async fn unparsable_value_is_fetch_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api");
                then.status(200).json_body(json!({
                    "status": "1",
                    "message": "OK",
                    "result": [{ "hash": "0xbad", "value": "12abc", "from": WATCHED, "to": WATCHED }]
                }));
            })
            .await;

        let err = client(&server).fetch_latest(&target()).await.unwrap_err();
        assert!(matches!(err, FetchError::BadValue { .. }));
    }

    #[tokio::test]
    async fn http_failure_is_fetch_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api");
                then.status(502);
            })
            .await;

        let err = client(&server).fetch_latest(&target()).await.unwrap_err();
        assert!(matches!(err, FetchError::Http(_)));
    }

    #[tokio::test]
    async fn truncated_body_is_fetch_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api");
                then.status(200).body("{\"status\": \"1\", \"result\": [");
            })
            .await;

        let err = client(&server).fetch_latest(&target()).await.unwrap_err();
        assert!(matches!(err, FetchError::Decode(_)));
    }
}
