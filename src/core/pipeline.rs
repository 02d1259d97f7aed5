use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::Settings;
use crate::core::{Chain, WatchedAddress, now_utc};
use crate::db::SharedAlertLog;
use crate::notifications::Notifier;
use crate::rpc::ChainAdapter;
use crate::signals::{Policy, RuleEngine};

/// Counters for one pass over the watchlist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub checked: usize,
    pub fetch_failures: usize,
    pub alerts: usize,
    pub persist_failures: usize,
}

/// Polls every watched address at a fixed interval and feeds the rule engine.
pub struct Scheduler {
    watchlist: Vec<WatchedAddress>,
    interval: Duration,
    engine: RuleEngine,
    adapters: HashMap<Chain, Arc<dyn ChainAdapter>>,
    sink: SharedAlertLog,
    notifier: Option<Notifier>,
}

impl Scheduler {
    pub fn new(
        settings: &Settings,
        adapters: Vec<Arc<dyn ChainAdapter>>,
        sink: SharedAlertLog,
        notifier: Option<Notifier>,
    ) -> Self {
        Self {
            watchlist: settings.watchlist.clone(),
            interval: settings.interval,
            engine: RuleEngine::new(Policy {
                thresholds: settings.thresholds,
                flagged: settings.flagged.clone(),
            }),
            adapters: adapters.into_iter().map(|a| (a.chain(), a)).collect(),
            sink,
            notifier,
        }
    }

    /// One pass over the watchlist, in listed order. A failing address is
    /// logged and skipped; nothing here aborts the pass.
    pub async fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();

        for target in &self.watchlist {
            report.checked += 1;
            let Some(adapter) = self.adapters.get(&target.chain) else {
                warn!("No {} adapter configured, skipping {}", target.chain, target.label);
                report.fetch_failures += 1;
                continue;
            };

            let tx = match adapter.fetch_latest(target).await {
                Ok(Some(tx)) => tx,
                Ok(None) => {
                    debug!("No transactions to inspect for {} ({})", target.label, target.address);
                    continue;
                }
                Err(e) => {
                    warn!(
                        "{} fetch failed for {} ({}): {e}",
                        target.chain, target.label, target.address
                    );
                    report.fetch_failures += 1;
                    continue;
                }
            };
            debug!(tx = %tx.tx_id, value = %tx.value, raw = ?tx.raw, "latest tx for {}", target.label);

            for record in self.engine.evaluate(&tx, target) {
                report.alerts += 1;
                if let Err(e) = self.sink.append(&record) {
                    report.persist_failures += 1;
                    let json = serde_json::to_string(&record).unwrap_or_else(|_| record.message.clone());
                    error!("Alert NOT persisted ({e}): {json}");
                }
                if let Some(notifier) = &self.notifier {
                    notifier.notify(&record);
                }
            }
        }

        report
    }

    /// Poll until `shutdown` flips to true or its sender goes away.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            info!("[{}] Running checks...", now_utc());
            let report = self.run_cycle().await;
            info!(
                "[{}] Checks complete: {} addresses, {} alerts ({} not persisted), {} fetch failures. Sleeping {}s...",
                now_utc(),
                report.checked,
                report.alerts,
                report.persist_failures,
                report.fetch_failures,
                self.interval.as_secs()
            );

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("Poll loop stopped");
    }
}
