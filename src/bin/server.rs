//! DCA engine server — headless process running the Live Event Loop plus
//! the four periodic Reconciliation Workers. No UI, no HTTP listener;
//! observability is structured logs to stdout.

use anyhow::Result;
use dca_engine::application::reconciliation::{
    ConsistencyChecker, CooldownReleaser, PositionSynchronizer, StaleOrderCanceller,
};
use dca_engine::application::supervisor::ProcessSupervisor;
use dca_engine::application::EventLoop;
use dca_engine::config::Config;
use dca_engine::domain::ports::{NotificationSink, NullNotificationSink};
use dca_engine::domain::repositories::CycleStore;
use dca_engine::infrastructure::alpaca::AlpacaBrokerGateway;
use dca_engine::infrastructure::notification::WebhookNotificationSink;
use dca_engine::infrastructure::persistence::{Database, SqliteCycleStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, Level};
use tracing_subscriber::prelude::*;

const RECONCILIATION_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    info!("DCA engine server {} starting...", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    info!(paper_trading = config.alpaca.is_paper_trading(), "configuration loaded");

    let database = Database::new(&config.store.database_url, config.store.max_connections).await?;
    let store: Arc<dyn CycleStore> = Arc::new(SqliteCycleStore::new(database));

    let symbols: Vec<String> = store.list_enabled_assets().await?.into_iter().map(|a| a.symbol).collect();
    if symbols.is_empty() {
        info!("no enabled assets configured; the event loop will idle with no quote subscriptions");
    }

    let broker = Arc::new(AlpacaBrokerGateway::new(
        config.alpaca.api_key.clone(),
        config.alpaca.secret_key.clone(),
        config.alpaca.base_url.clone(),
        config.alpaca.ws_url.clone(),
    ));

    let notifier: Arc<dyn NotificationSink> = match &config.notification.webhook_url {
        Some(url) => Arc::new(WebhookNotificationSink::new(url.clone())),
        None => Arc::new(NullNotificationSink),
    };

    let pid_file = std::env::var("DCA_PID_FILE").unwrap_or_else(|_| "/tmp/dca-engine.pid".to_string());
    let maintenance_sentinel = std::env::var("DCA_MAINTENANCE_SENTINEL").unwrap_or_else(|_| "/tmp/dca-engine.maintenance".to_string());
    let supervisor = ProcessSupervisor::new(pid_file, maintenance_sentinel);
    supervisor.write_pid_file(std::process::id())?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    spawn_reconciliation_workers(broker.clone(), store.clone(), config.operational.clone(), shutdown_tx.subscribe());

    let event_loop = Arc::new(EventLoop::new(broker, store, notifier, config.operational.clone()));
    let loop_handle = tokio::spawn(event_loop.run(symbols, shutdown_rx));

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for shutdown signal: {e}");
            return;
        }
        info!("shutdown signal received, stopping the event loop");
        let _ = shutdown_tx.send(true);
    });

    match tokio::time::timeout(Duration::from_secs(10), loop_handle).await {
        Ok(Ok(Ok(()))) => info!("event loop exited cleanly"),
        Ok(Ok(Err(e))) => error!("event loop exited with error: {e}"),
        Ok(Err(e)) => error!("event loop task panicked: {e}"),
        Err(_) => error!("event loop did not exit within the 10s force-exit timeout"),
    }

    Ok(())
}

fn spawn_reconciliation_workers(
    broker: Arc<AlpacaBrokerGateway>,
    store: Arc<dyn CycleStore>,
    operational: dca_engine::config::OperationalConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        let stale_order_canceller = StaleOrderCanceller::new(
            broker.clone(),
            store.clone(),
            operational.stale_order_threshold_minutes * 60,
            operational.stuck_market_sell_timeout_seconds,
            operational.dry_run_mode,
        );
        let consistency_checker = ConsistencyChecker::new(broker.clone(), store.clone(), 5, operational.dry_run_mode);
        let cooldown_releaser = CooldownReleaser::new(store.clone(), operational.dry_run_mode);
        let position_synchronizer = PositionSynchronizer::new(broker, store, operational.dry_run_mode);

        let mut ticker = tokio::time::interval(RECONCILIATION_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = stale_order_canceller.run().await {
                        error!("stale order canceller failed: {e}");
                    }
                    if let Err(e) = consistency_checker.run().await {
                        error!("consistency checker failed: {e}");
                    }
                    if let Err(e) = cooldown_releaser.run().await {
                        error!("cooldown releaser failed: {e}");
                    }
                    if let Err(e) = position_synchronizer.run().await {
                        error!("position synchronizer failed: {e}");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() { break; }
                }
            }
        }
    });
}
