pub mod rules;

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::core::{AlertRecord, NormalizedTx, WatchedAddress};
use rules::Rule;

/// Outflow thresholds in base units. Comparisons are `>=`, so 0 alerts on every outflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub utxo_outflow_sats: u64,
    pub account_outflow_wei: u128,
}

/// Known high-risk contract addresses, keyed lower-case.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlaggedSet {
    entries: HashMap<String, Option<String>>,
}

impl FlaggedSet {
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, Option<String>)>,
        S: AsRef<str>,
    {
        let entries = entries
            .into_iter()
            .map(|(address, name)| (address.as_ref().to_lowercase(), name))
            .collect();
        Self { entries }
    }

    pub fn contains(&self, address: &str) -> bool {
        self.entries.contains_key(&address.to_lowercase())
    }

    /// Configured display name for a flagged address.
    pub fn name(&self, address: &str) -> Option<&str> {
        self.entries
            .get(&address.to_lowercase())
            .and_then(|name| name.as_deref())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Read-only policy handed to every rule.
#[derive(Debug, Clone)]
pub struct Policy {
    pub thresholds: Thresholds,
    pub flagged: FlaggedSet,
}

/// The rule engine runs every rule against a transaction and collects what fires.
pub struct RuleEngine {
    policy: Policy,
    rules: Vec<Box<dyn Rule + Send + Sync>>,
}

impl RuleEngine {
    pub fn new(policy: Policy) -> Self {
        Self {
            policy,
            rules: rules::default_rules(),
        }
    }

    /// Evaluate `tx` for `target`. Rules are independent; 0, 1 or 2 records come back.
    pub fn evaluate(&self, tx: &NormalizedTx, target: &WatchedAddress) -> Vec<AlertRecord> {
        self.evaluate_at(tx, target, Utc::now())
    }

    pub fn evaluate_at(
        &self,
        tx: &NormalizedTx,
        target: &WatchedAddress,
        at: DateTime<Utc>,
    ) -> Vec<AlertRecord> {
        self.rules
            .iter()
            .filter_map(|rule| {
                let record = rule.evaluate(tx, target, &self.policy, at)?;
                tracing::debug!(rule = rule.name(), tx = %tx.tx_id, "rule fired");
                Some(record)
            })
            .collect()
    }
}
