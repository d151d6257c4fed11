use clap::Parser;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use spikewatch::adapters::{MarketDataGateway, MonitorStore};
use spikewatch::cli::Cli;
use spikewatch::config::AppConfig;
use spikewatch::error::{Result, SpikewatchError};
use spikewatch::retry::retry;
use spikewatch::services::{MonitorService, Notifier, PriceChecker};
use spikewatch::{OpinionClient, PostgresStore, TelegramNotifier};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load_from(&cli.config_dir)?;
    init_logging(&config.logging.level);

    if let Err(errors) = config.validate() {
        for e in &errors {
            error!("Invalid configuration: {}", e);
        }
        return Err(SpikewatchError::Validation(errors.join("; ")));
    }

    info!("Starting spikewatch");

    // The store is the one dependency worth waiting for at startup; a
    // cold database gets a bounded number of chances before we abort.
    let db_cfg = config.database.clone();
    let store = retry(&db_cfg.connect_retry_policy(), "database connection", || {
        let db_cfg = db_cfg.clone();
        async move { PostgresStore::connect(&db_cfg).await }
    })
    .await?;

    store.migrate().await?;

    let gateway: Arc<dyn MarketDataGateway> = Arc::new(OpinionClient::new(&config.api)?);
    let messenger = Arc::new(TelegramNotifier::new(&config.telegram)?);
    let monitor_store: Arc<dyn MonitorStore> = Arc::new(store);

    let notifier = Notifier::new(Arc::clone(&monitor_store), messenger);
    let checker = PriceChecker::new(gateway, Arc::clone(&monitor_store), notifier, &config.monitor);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut monitor = MonitorService::new(monitor_store, checker, &config.monitor, shutdown_rx);

    if cli.once {
        monitor.run_once().await?;
        info!("Single monitoring cycle completed");
        return Ok(());
    }

    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        if shutdown_tx.send(true).is_err() {
            warn!("Monitor already stopped before shutdown signal");
        }
    });

    monitor.run_forever().await;

    info!("spikewatch stopped");
    Ok(())
}

fn init_logging(level: &str) {
    let level = if level.is_empty() { "info" } else { level };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{level},spikewatch={level},sqlx=warn"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
