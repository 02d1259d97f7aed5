use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::core::{Chain, Severity, WatchedAddress};
use crate::signals::{FlaggedSet, Thresholds};

/// Sections that must be present in the config file.
pub const REQUIRED_SECTIONS: &[&str] = &[
    "api_keys",
    "watchlist",
    "thresholds",
    "flagged_contracts",
    "polling",
    "logging",
];

/// Placeholder shipped in the example config.
const PLACEHOLDER_API_KEY: &str = "YOUR_ETHERSCAN_API_KEY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{} not found (copy config.example.toml to get started)", .0.display())]
    NotFound(PathBuf),
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("config missing required sections: {}", .0.join(", "))]
    MissingSections(Vec<String>),
    #[error("invalid {chain} address {address:?} in {section}: {reason}")]
    InvalidAddress {
        chain: Chain,
        section: &'static str,
        address: String,
        reason: String,
    },
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub api_keys: ApiKeysConfig,
    pub watchlist: WatchlistConfig,
    pub thresholds: ThresholdConfig,
    pub flagged_contracts: Vec<FlaggedContractConfig>,
    pub polling: PollingConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub providers: ProviderConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ApiKeysConfig {
    pub etherscan: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct WatchlistConfig {
    pub btc: Vec<WalletConfig>,
    pub eth: Vec<WalletConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WalletConfig {
    pub address: String,
    #[serde(default = "default_label")]
    pub label: String,
}

fn default_label() -> String {
    "unlabeled".into()
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ThresholdConfig {
    pub btc_outflow_sats: u64,
    /// Integer or decimal string; strings allow values past `i64::MAX`.
    #[serde(deserialize_with = "deserialize_wei")]
    pub eth_outflow_wei: u128,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FlaggedContractConfig {
    pub address: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_seconds: u64,
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub alert_log_file: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ProviderConfig {
    pub blockstream_url: String,
    pub etherscan_url: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct NotificationConfig {
    pub enabled: bool,
    pub min_severity: Severity,
    pub cooldown_seconds: u64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            btc_outflow_sats: 50_000_000,
            eth_outflow_wei: 500_000_000_000_000_000,
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 300,
            request_timeout_seconds: 10,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            alert_log_file: "alerts.json".into(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            blockstream_url: "https://blockstream.info/api".into(),
            etherscan_url: "https://api.etherscan.io/api".into(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_severity: Severity::Critical,
            cooldown_seconds: 30,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WeiAmount {
    Int(u64),
    Text(String),
}

fn deserialize_wei<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
    match WeiAmount::deserialize(deserializer)? {
        WeiAmount::Int(v) => Ok(u128::from(v)),
        WeiAmount::Text(s) => s
            .trim()
            .replace('_', "")
            .parse()
            .map_err(|e| serde::de::Error::custom(format!("bad wei amount {s:?}: {e}"))),
    }
}

/// Validated, immutable runtime settings built once from [`Config`].
#[derive(Debug, Clone)]
pub struct Settings {
    pub etherscan_api_key: String,
    /// UTXO targets first, then account targets, each in file order.
    pub watchlist: Vec<WatchedAddress>,
    pub thresholds: Thresholds,
    pub flagged: FlaggedSet,
    pub interval: Duration,
    pub request_timeout: Duration,
    pub alert_log: PathBuf,
    pub providers: ProviderConfig,
    pub notifications: NotificationConfig,
}

impl Settings {
    pub fn count(&self, chain: Chain) -> usize {
        self.watchlist.iter().filter(|w| w.chain == chain).count()
    }

    /// Whether the Etherscan key looks unset.
    pub fn missing_api_key(&self) -> bool {
        let key = self.etherscan_api_key.trim();
        key.is_empty() || key == PLACEHOLDER_API_KEY
    }
}

impl Config {
    /// Load config from a TOML file. Any problem is fatal to startup.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = contents.parse()?;
        tracing::info!("Config loaded from {}", path.display());
        Ok(config)
    }

    /// Check addresses and numbers, then freeze into [`Settings`].
    pub fn into_settings(self) -> Result<Settings, ConfigError> {
        if self.polling.interval_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                key: "polling.interval_seconds",
                reason: "must be greater than zero".into(),
            });
        }
        if self.polling.request_timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                key: "polling.request_timeout_seconds",
                reason: "must be greater than zero".into(),
            });
        }
        if self.logging.alert_log_file.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "logging.alert_log_file",
                reason: "must not be empty".into(),
            });
        }

        let mut watchlist = Vec::with_capacity(self.watchlist.btc.len() + self.watchlist.eth.len());
        for wallet in self.watchlist.btc {
            validate_btc_address(&wallet.address, "watchlist.btc")?;
            watchlist.push(WatchedAddress::new(Chain::Utxo, wallet.address, wallet.label));
        }
        for wallet in self.watchlist.eth {
            validate_eth_address(&wallet.address, "watchlist.eth")?;
            watchlist.push(WatchedAddress::new(Chain::Account, wallet.address, wallet.label));
        }

        for entry in &self.flagged_contracts {
            validate_eth_address(&entry.address, "flagged_contracts")?;
        }
        let flagged = FlaggedSet::from_entries(
            self.flagged_contracts
                .into_iter()
                .map(|entry| (entry.address, entry.name)),
        );

        Ok(Settings {
            etherscan_api_key: self.api_keys.etherscan,
            watchlist,
            thresholds: Thresholds {
                utxo_outflow_sats: self.thresholds.btc_outflow_sats,
                account_outflow_wei: self.thresholds.eth_outflow_wei,
            },
            flagged,
            interval: Duration::from_secs(self.polling.interval_seconds),
            request_timeout: Duration::from_secs(self.polling.request_timeout_seconds),
            alert_log: PathBuf::from(self.logging.alert_log_file),
            providers: self.providers,
            notifications: self.notifications,
        })
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(contents: &str) -> Result<Self, Self::Err> {
        let table: toml::Table = toml::from_str(contents)?;
        let missing: Vec<String> = REQUIRED_SECTIONS
            .iter()
            .filter(|key| !table.contains_key(**key))
            .map(|key| key.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::MissingSections(missing));
        }
        Ok(toml::Value::Table(table).try_into()?)
    }
}

fn validate_btc_address(address: &str, section: &'static str) -> Result<(), ConfigError> {
    address
        .parse::<bitcoin::Address<bitcoin::address::NetworkUnchecked>>()
        .map(|_| ())
        .map_err(|e| ConfigError::InvalidAddress {
            chain: Chain::Utxo,
            section,
            address: address.to_string(),
            reason: e.to_string(),
        })
}

fn validate_eth_address(address: &str, section: &'static str) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidAddress {
        chain: Chain::Account,
        section,
        address: address.to_string(),
        reason: reason.to_string(),
    };
    let hex = address
        .strip_prefix("0x")
        .or_else(|| address.strip_prefix("0X"))
        .ok_or_else(|| invalid("missing 0x prefix"))?;
    if hex.len() != 40 {
        return Err(invalid("expected 40 hex digits"));
    }
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid("non-hex character"));
    }
    Ok(())
}
