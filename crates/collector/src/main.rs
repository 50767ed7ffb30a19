//! influxdb-docker-collector
//!
//! Streams stats of the labelled containers on one Docker host, keeps one
//! sample every `--interval` updates and writes it to InfluxDB.

use anyhow::{Context, Result};
use clap::Parser;
use collector_lib::{
    health::{components, HealthRegistry},
    observability::StructuredLogger,
    Collector, DockerClient, InfluxClient, SinkWriter,
};
use docker_collector::{
    api,
    cli::{Cli, LogFormat},
    config::CollectorConfig,
};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const COLLECTOR_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = CollectorConfig::load(cli)?;
    info!(host = %config.host, "Collector configured");

    let health_registry = HealthRegistry::new();
    health_registry.register(components::COLLECTOR).await;
    health_registry.register(components::SINK).await;

    let logger = StructuredLogger::new(&config.host);

    let docker = DockerClient::new(&config.endpoint, config.cert_dir.as_deref())
        .with_context(|| format!("Invalid Docker endpoint {}", config.endpoint))?;
    docker
        .ping()
        .await
        .with_context(|| format!("Cannot reach Docker at {}", config.endpoint))?;

    let store = InfluxClient::new(
        &config.store_url,
        config.username.clone(),
        config.password.clone(),
    )?;
    if config.database.is_empty() {
        warn!("No InfluxDB database configured, writes will be rejected");
    }

    let (sample_tx, sample_rx) = mpsc::channel(config.channel_capacity);

    let writer = SinkWriter::new(Arc::new(store), config.database.clone(), logger.clone())
        .with_health(health_registry.clone());
    let writer_task = tokio::spawn(writer.run(sample_rx));

    let mut collector = Collector::new(
        Arc::new(docker),
        config.identity.clone(),
        config.interval,
        sample_tx,
        logger.clone(),
    )?
    .with_health(health_registry.clone());
    if let Some(period) = config.rescan_interval {
        collector = collector.with_rescan_interval(period);
    }

    if let Some(port) = config.api_port {
        let app_state = Arc::new(api::AppState::new(health_registry.clone()));
        tokio::spawn(async move {
            if let Err(e) = api::serve(port, app_state).await {
                warn!(error = %e, "API server stopped");
            }
        });
    }

    logger.log_startup(
        COLLECTOR_VERSION,
        &config.endpoint,
        &config.database,
        config.interval,
    );

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let mut collector_task = tokio::spawn(collector.run(config.concurrency, shutdown_rx));

    let outcome = tokio::select! {
        result = &mut collector_task => result,
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for shutdown signal")?;
            logger.log_shutdown("SIGINT received");
            let _ = shutdown_tx.send(());
            collector_task.await
        }
    };
    outcome
        .context("Collector task panicked")?
        .context("Collector stopped")?;

    // the writer finishes once every sample sender is gone
    writer_task.await.context("Sink writer task panicked")?;
    info!("Shutting down");

    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Text => registry.with(fmt::layer()).init(),
    }
}
