use chrono::{DateTime, Utc};

use crate::core::tx::{format_btc, format_eth};
use crate::core::{AlertRecord, Chain, NormalizedTx, Severity, WatchedAddress};
use crate::signals::Policy;

/// An alert rule. Each rule is a pure predicate over one transaction and
/// knows nothing about the other rules.
pub trait Rule {
    fn name(&self) -> &str;
    fn evaluate(
        &self,
        tx: &NormalizedTx,
        target: &WatchedAddress,
        policy: &Policy,
        at: DateTime<Utc>,
    ) -> Option<AlertRecord>;
}

/// All rules, in the order their records are appended.
pub fn default_rules() -> Vec<Box<dyn Rule + Send + Sync>> {
    vec![Box::new(OutflowRule), Box::new(FlaggedContractRule)]
}

/// Large spend from the watched address.
///
/// UTXO: `value` is already scoped to the address's own inputs.
/// Account: the sender must be the watched address.
pub struct OutflowRule;

impl Rule for OutflowRule {
    fn name(&self) -> &str {
        "outflow"
    }

    fn evaluate(
        &self,
        tx: &NormalizedTx,
        target: &WatchedAddress,
        policy: &Policy,
        at: DateTime<Utc>,
    ) -> Option<AlertRecord> {
        match tx.chain {
            Chain::Utxo => {
                if tx.value < u128::from(policy.thresholds.utxo_outflow_sats) {
                    return None;
                }
                let message = format!(
                    "Large BTC outflow from {}: {} BTC",
                    target.label,
                    format_btc(tx.value)
                );
                let mut record = AlertRecord::new(at, target, &tx.tx_id, Severity::High, message);
                record.value_sats = Some(tx.value);
                Some(record)
            }
            Chain::Account => {
                let from = tx.from_address.as_deref()?;
                if !target.matches(from) || tx.value < policy.thresholds.account_outflow_wei {
                    return None;
                }
                let to = tx.to_address.as_deref().unwrap_or_default();
                let message = format!(
                    "Large ETH outflow from {}: {} ETH to {}",
                    target.label,
                    format_eth(tx.value),
                    to
                );
                let mut record = AlertRecord::new(at, target, &tx.tx_id, Severity::High, message);
                record.value_wei = Some(tx.value);
                Some(record)
            }
        }
    }
}

/// Any transaction to a flagged contract, whatever its value or direction.
pub struct FlaggedContractRule;

impl Rule for FlaggedContractRule {
    fn name(&self) -> &str {
        "flagged_contract"
    }

    fn evaluate(
        &self,
        tx: &NormalizedTx,
        target: &WatchedAddress,
        policy: &Policy,
        at: DateTime<Utc>,
    ) -> Option<AlertRecord> {
        let to = tx.to_address.as_deref()?.to_lowercase();
        if !policy.flagged.contains(&to) {
            return None;
        }
        let message = match policy.flagged.name(&to) {
            Some(name) => format!("Interaction with flagged contract: {to} ({name})"),
            None => format!("Interaction with flagged contract: {to}"),
        };
        let mut record = AlertRecord::new(at, target, &tx.tx_id, Severity::Critical, message);
        record.flagged_contract = Some(to);
        Some(record)
    }
}
