mod config;
mod core;
mod db;
mod notifications;
mod rpc;
mod signals;

use std::process::ExitCode;
use std::sync::Arc;

use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::core::pipeline::Scheduler;
use crate::core::{Chain, now_utc};
use crate::db::SharedAlertLog;
use crate::notifications::Notifier;
use crate::rpc::{BlockstreamClient, ChainAdapter, EtherscanClient};

const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    let filter = match "wallet_sentinel=info".parse() {
        Ok(directive) => EnvFilter::from_default_env().add_directive(directive),
        Err(_) => EnvFilter::from_default_env(),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("Wallet Sentinel started at {}", now_utc());

    let config_path =
        std::env::var("WALLET_SENTINEL_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
    let settings = match Config::load(&config_path).and_then(Config::into_settings) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!("[FATAL] {e}");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(
        "Monitoring {} BTC | {} ETH addresses",
        settings.count(Chain::Utxo),
        settings.count(Chain::Account)
    );
    if settings.flagged.is_empty() {
        tracing::warn!("No flagged contracts configured; mixer interaction checks are inactive");
    } else {
        tracing::info!("Flagged contracts: {}", settings.flagged.len());
    }
    tracing::info!(
        "Poll interval: {}s | Alert log: {}",
        settings.interval.as_secs(),
        settings.alert_log.display()
    );
    if settings.missing_api_key() {
        tracing::warn!("Etherscan API key not set; ETH monitoring will fail.");
        tracing::warn!("Add your key to {config_path} under [api_keys] etherscan");
    }

    let http = match rpc::build_client(settings.request_timeout) {
        Ok(client) => client,
        Err(e) => {
            tracing::error!("[FATAL] failed to build HTTP client: {e}");
            return ExitCode::FAILURE;
        }
    };
    let adapters: Vec<Arc<dyn ChainAdapter>> = vec![
        Arc::new(BlockstreamClient::new(
            http.clone(),
            settings.providers.blockstream_url.clone(),
        )),
        Arc::new(EtherscanClient::new(
            http,
            settings.providers.etherscan_url.clone(),
            settings.etherscan_api_key.clone(),
        )),
    ];

    let sink = SharedAlertLog::open(&settings.alert_log);
    match sink.load() {
        Ok(existing) => tracing::info!("{} alerts already recorded", existing.len()),
        Err(e) => tracing::warn!("Existing alert log entries could not be read as alerts: {e}"),
    }
    let notifier = settings
        .notifications
        .enabled
        .then(|| Notifier::new(&settings.notifications));
    let scheduler = Scheduler::new(&settings, adapters, sink, notifier);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Ctrl-C received, stopping after the current cycle");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                tracing::warn!("Cannot listen for Ctrl-C ({e}); stop the process externally");
                // Keep the sender alive so the poll loop keeps its interval.
                std::future::pending::<()>().await;
            }
        }
    });

    scheduler.run(shutdown_rx).await;
    ExitCode::SUCCESS
}
