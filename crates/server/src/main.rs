mod api;
mod bootstrap;
mod health;
#[cfg(test)]
mod test_support;
mod webhooks;
mod worker;

use std::time::Duration;

use anyhow::{Context, Result};
use haggle_core::config::{AppConfig, LoadOptions};
use tracing_subscriber::EnvFilter;

fn init_logging(config: &AppConfig) {
    use haggle_core::config::LogFormat::*;

    // RUST_LOG wins over the configured level.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));
    let builder = tracing_subscriber::fmt().with_target(false).with_env_filter(filter);

    match config.logging.format {
        Compact => builder.compact().init(),
        Pretty => builder.pretty().init(),
        Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Config first so logging honours it before anything else runs.
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);

    let worker = if app.config.provisioning.enabled {
        Some(tokio::spawn(app.worker.run(app.worker_wakeups)))
    } else {
        tracing::info!(
            event_name = "system.server.provisioning_disabled",
            correlation_id = "bootstrap",
            "provisioning worker not started"
        );
        None
    };

    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;
    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        "haggle-server listening"
    );

    let router = api::router(app.state.clone());
    axum::serve(listener, router).with_graceful_shutdown(wait_for_shutdown()).await?;

    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        grace_secs = grace.as_secs(),
        "haggle-server stopping"
    );

    // Dropping the last wakeup sender lets the worker finish its current drain and exit.
    drop(app.state);
    if let Some(worker) = worker {
        if tokio::time::timeout(grace, worker).await.is_err() {
            tracing::warn!(
                event_name = "system.server.worker_timeout",
                correlation_id = "shutdown",
                "provisioning worker did not stop within the grace period"
            );
        }
    }

    app.db_pool.close().await;
    Ok(())
}

async fn wait_for_shutdown() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(
            event_name = "system.server.signal_error",
            correlation_id = "shutdown",
            error = %error,
            "failed to listen for shutdown signal"
        );
    }
}
