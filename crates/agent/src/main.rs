//! Netwatch Agent - network latency monitoring agent
//!
//! Probes a fixed list of hosts on an interval, writes latency statistics to
//! InfluxDB and a local JSON archive, and flags anomalous targets.

use agent_lib::{
    anomaly::AnomalyDetector,
    monitor::MonitorLoopBuilder,
    observability::{AgentMetrics, StructuredLogger},
    probe::IcmpProber,
    sink::{InfluxWriter, JsonArchive},
};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting netwatch-agent");

    // Load configuration; missing credentials stop the agent here
    let config = config::AgentConfig::load().context("Invalid agent configuration")?;
    info!(
        node_name = %config.node_name,
        influx_url = %config.influx_url,
        bucket = %config.influx_bucket,
        targets = config.targets.len(),
        "Agent configured"
    );

    let metrics = AgentMetrics::new();
    let logger = StructuredLogger::new(&config.node_name);

    let sink = InfluxWriter::new(&config.influx_config())
        .context("Failed to create InfluxDB writer")?;
    let archive = JsonArchive::new(&config.archive_path);
    let prober = IcmpProber::new(config.probe_timeout());

    let monitor = MonitorLoopBuilder::new()
        .targets(config.targets.clone())
        .prober(Arc::new(prober))
        .sink(Arc::new(sink))
        .archive(Arc::new(archive))
        .detector(AnomalyDetector::new(config.forest_config()))
        .logger(logger.clone())
        .config(config.monitor_config())
        .build()
        .context("Failed to build monitoring loop")?;

    logger.log_startup(AGENT_VERSION, &config.targets, config.interval_secs);

    // Start the monitoring loop
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let monitor_handle = tokio::spawn(monitor.run(shutdown_rx));

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    logger.log_shutdown("SIGINT received");
    let _ = shutdown_tx.send(());

    let cycles = monitor_handle
        .await
        .context("Monitoring loop terminated abnormally")?;

    info!(cycles = cycles, metrics = %metrics.render_text(), "Shutting down");

    Ok(())
}
