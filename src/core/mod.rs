pub mod pipeline;
pub mod tx;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ledger model of a watched chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Chain {
    /// UTXO-style (Bitcoin, via Blockstream).
    #[serde(rename = "BTC")]
    Utxo,
    /// Account-style (EVM, via Etherscan).
    #[serde(rename = "ETH")]
    Account,
}

impl Chain {
    pub fn ticker(&self) -> &'static str {
        match self {
            Chain::Utxo => "BTC",
            Chain::Account => "ETH",
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.ticker())
    }
}

/// A monitoring target from the watchlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedAddress {
    pub chain: Chain,
    pub address: String,
    pub label: String,
}

impl WatchedAddress {
    pub fn new(chain: Chain, address: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            chain,
            address: address.into(),
            label: label.into(),
        }
    }

    /// Compare against another address the way this chain compares addresses.
    /// Account chains are case-insensitive, UTXO chains are exact.
    pub fn matches(&self, other: &str) -> bool {
        match self.chain {
            Chain::Utxo => self.address == other,
            Chain::Account => self.address.eq_ignore_ascii_case(other),
        }
    }
}

/// The most recent transaction of a watched address, reduced to what the rules need.
///
/// For UTXO chains `value` is the sum of the watched address's own inputs, so
/// `from_address`/`to_address` are left empty. For account chains both
/// addresses are lower-cased.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedTx {
    pub chain: Chain,
    pub tx_id: String,
    pub from_address: Option<String>,
    pub to_address: Option<String>,
    /// Base units: satoshis or wei.
    pub value: u128,
    /// Provider payload of the selected transaction, for diagnostics only.
    pub raw: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the alert log. Created by the rule engine, never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertRecord {
    /// ISO-8601 UTC, second precision.
    pub timestamp: String,
    pub chain: Chain,
    pub address: String,
    pub label: String,
    #[serde(alias = "tx_hash")]
    pub tx_id: String,
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_sats: Option<u128>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_wei: Option<u128>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flagged_contract: Option<String>,
}

impl AlertRecord {
    /// Start a record for `target` about `tx_id` stamped with `at`.
    pub fn new(
        at: DateTime<Utc>,
        target: &WatchedAddress,
        tx_id: &str,
        severity: Severity,
        message: String,
    ) -> Self {
        Self {
            timestamp: format_timestamp(at),
            chain: target.chain,
            address: target.address.clone(),
            label: target.label.clone(),
            tx_id: tx_id.to_string(),
            severity,
            message,
            value_sats: None,
            value_wei: None,
            flagged_contract: None,
        }
    }
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

pub fn now_utc() -> String {
    format_timestamp(Utc::now())
}
