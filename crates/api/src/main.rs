//! Sensor Gateway - Main Entry Point

use anyhow::Context;
use api::config::AppConfig;
use api::{ingest, init_logging, run_server, AppState};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::{error, info, warn};
use write_cache::{build_storage, BuiltStorage};

/// Persist sensor records read from stdin through a durable write-behind cache
#[derive(Debug, Parser)]
#[command(name = "sensor-gateway", version)]
struct Args {
    /// Configuration file (yaml, toml or json)
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Do not start the HTTP status server
    #[arg(long)]
    no_http: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = AppConfig::load(&args.config)
        .with_context(|| format!("loading configuration from {}", args.config))?;
    init_logging(&config.logging)?;

    info!("=== Sensor Gateway v{} ===", env!("CARGO_PKG_VERSION"));

    let metrics = PrometheusBuilder::new()
        .install_recorder()
        .context("installing metrics recorder")?;

    let Some(BuiltStorage { mut backend, cache_stats }) = build_storage(&config.storage).await? else {
        warn!("storage_type is none, nothing to do");
        return Ok(());
    };

    let server = if config.server.enabled && !args.no_http {
        let state = Arc::new(AppState::new(backend.name(), cache_stats, Some(metrics)));
        let addr = config.server.bind_addr.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = run_server(&addr, state).await {
                error!("Status server failed: {}", e);
            }
        }))
    } else {
        None
    };

    let stdin = BufReader::new(tokio::io::stdin());
    tokio::select! {
        result = ingest::run(stdin, backend.as_mut()) => match result {
            Ok(summary) => info!(
                "Input closed: {} saved, {} failed, {} malformed",
                summary.saved, summary.failed, summary.malformed
            ),
            Err(e) => error!("Reading input failed: {}", e),
        },
        _ = tokio::signal::ctrl_c() => info!("Interrupt received, shutting down"),
    }

    backend.close().await.context("closing storage")?;

    if let Some(server) = server {
        server.abort();
    }
    info!("Sensor gateway stopped");
    Ok(())
}
