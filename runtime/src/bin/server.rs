//! Slotbook server process.
//!
//! Connects the `PostgreSQL` store, runs migrations, exposes Prometheus metrics
//! and drives the match scheduler until Ctrl+C or SIGTERM.

use slotbook_core::environment::SystemClock;
use slotbook_postgres::PostgresStore;
use slotbook_runtime::adapters::{LogNotifier, ManualPayoutGateway, SignedCheckoutGateway};
use slotbook_runtime::metrics::MetricsServer;
use slotbook_runtime::shutdown::shutdown_signal;
use slotbook_runtime::{Config, EngineSettings, SchedulerConfig, Slotbook, SlotbookEnvironment};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env file is fine; the variables may come from the process.
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,slotbook=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Slotbook server");

    let config = Config::from_env()?;
    info!(
        max_connections = config.database.max_connections,
        scheduler_interval_secs = config.scheduler.interval_secs,
        currency = %config.wallet.currency,
        "Configuration loaded"
    );

    // Database
    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(config.database.connect_timeout))
        .connect(&config.database.url)
        .await?;
    let store = Arc::new(PostgresStore::new(pool));
    store.migrate().await?;
    info!("Database ready");

    // Metrics
    let mut metrics_server = MetricsServer::new(config.metrics.addr()?);
    metrics_server.start()?;

    // Engine
    let env = SlotbookEnvironment::with_store(
        store,
        Arc::new(SystemClock),
        SignedCheckoutGateway::shared(config.wallet.checkout_key_secret.clone()),
        Arc::new(ManualPayoutGateway),
        Arc::new(LogNotifier),
    );
    let engine = Slotbook::new(env, EngineSettings::from_config(&config));

    let scheduler = engine.scheduler(SchedulerConfig {
        interval: config.scheduler.interval(),
    });
    scheduler.start();
    info!("Slotbook server running");

    shutdown_signal().await;

    info!("Stopping match scheduler...");
    let timeout = Duration::from_secs(config.shutdown_timeout);
    if tokio::time::timeout(timeout, scheduler.stop()).await.is_err() {
        warn!(timeout_secs = config.shutdown_timeout, "Scheduler did not stop in time");
    }

    info!("Slotbook server stopped");
    Ok(())
}
