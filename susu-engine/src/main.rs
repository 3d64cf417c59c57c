//! Engine entry point
//!
//! Loads configuration from the environment, runs migrations, wires the
//! components, and runs the worker loop until SIGINT or SIGTERM.
use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use susu_engine::gateway::{MockGateway, PaymentGateway};
use susu_engine::notify::notifier_from_config;
use susu_engine::Engine;
use susu_shared::config::Config;
use susu_shared::db::migrations::{ensure_database_exists, run_migrations};
use susu_shared::db::pool::{create_pool, PoolConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Arc::new(Config::from_env().context("failed to load configuration")?);

    info!(version = susu_shared::VERSION, "Starting susu engine");

    ensure_database_exists(&config.database.url)
        .await
        .context("failed to ensure database exists")?;

    let pool = create_pool(PoolConfig {
        url: config.database.url.clone(),
        max_connections: config.database.max_connections,
        ..Default::default()
    })
    .await
    .context("failed to create database pool")?;

    run_migrations(&pool)
        .await
        .context("failed to run migrations")?;

    // TODO: swap in the production gateway once the provider account is
    // provisioned; the mock accepts everything.
    let gateway: Arc<dyn PaymentGateway> = Arc::new(MockGateway::new());
    let notifier = Arc::from(notifier_from_config(&config.notify));

    info!(gateway = gateway.name(), "Gateway configured");

    let engine = Engine::new(pool, gateway, notifier, config.clone());
    let worker = engine.into_worker(config);

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();

    tokio::spawn(async move {
        if let Err(err) = wait_for_shutdown().await {
            error!(error = %err, "Signal handler failed");
        }
        info!("Shutdown signal received");
        signal_token.cancel();
    });

    worker.run(shutdown).await
}

async fn wait_for_shutdown() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        Ok(())
    }
}
