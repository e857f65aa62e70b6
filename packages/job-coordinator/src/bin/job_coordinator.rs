//! Job coordinator process.
//!
//! Connects to Redis and NATS, then runs the dispatch loop and the response
//! consumer until SIGINT/SIGTERM.

use std::sync::Arc;

use anyhow::{Context, Result};
use job_coordinator::adapters::{nats, NatsQueuePublisher, NatsQueueSubscriber, RedisStateStore};
use job_coordinator::{Config, Coordinator, DispatchLoop, ResponseConsumer, ServiceHost};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,job_coordinator=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    tracing::info!("Starting job coordinator");

    let config = Config::load().context("Failed to load configuration")?;
    tracing::info!(
        interval_secs = config.interval_secs,
        job_types = ?config.job_types,
        response_subject = %config.response_subject,
        retention_secs = config.retention_secs,
        pending_ttl_secs = config.pending_ttl_secs,
        "Configuration loaded"
    );

    // Adapter connections are fatal at startup
    let store = RedisStateStore::connect(&config.store_url)
        .await
        .context("Failed to connect to state store")?;
    let client = nats::connect(&config.queue_url)
        .await
        .context("Failed to connect to queue broker")?;
    let subscriber = NatsQueueSubscriber::subscribe(&client, &config.response_subject)
        .await
        .context("Failed to subscribe to job responses")?;

    let coordinator = Arc::new(Coordinator::new(
        Arc::new(NatsQueuePublisher::new(client)),
        Arc::new(store),
    ));

    let handle = ServiceHost::new(coordinator.clone())
        .with_service(ResponseConsumer::new(
            coordinator.clone(),
            Box::new(subscriber),
        ))
        .with_service(DispatchLoop::new(coordinator, config.dispatch()))
        .start();

    let failed = tokio::select! {
        signal = shutdown_signal() => {
            signal?;
            tracing::info!("Received shutdown signal");
            false
        }
        _ = handle.cancelled() => {
            tracing::error!("A service stopped unexpectedly");
            true
        }
    };

    tracing::info!("Shutting down job coordinator");
    handle.shutdown().await;
    tracing::info!("Job coordinator stopped");

    if failed {
        anyhow::bail!("job coordinator stopped after a service failure");
    }
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("Failed to listen for SIGINT")?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")
}
