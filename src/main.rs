//! Request governor.
//!
//! Serves the governance status surface and hosts the limiters, breakers and
//! retry executor that the rest of the service is wired through.
//!
//! # Architecture Overview
//!
//! ```text
//!     Request ──▶ rate limiter (per traffic class) ──▶ handler
//!                                                       │
//!                                                       ▼
//!                             circuit breaker (per downstream) ──▶ retry executor ──▶ downstream
//!
//!     limiter / breaker / retry ──▶ events ──▶ audit log
//!                               ──▶ metrics ──▶ Prometheus
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;

use request_governor::config::{self, GovernorConfig};
use request_governor::lifecycle::{wait_for_signal, Shutdown};
use request_governor::observability::{events, logging, metrics, EventSink};
use request_governor::{Governance, HttpServer};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "governor")]
#[command(about = "Request governance: rate limiting, circuit breaking and retries", long_about = None)]
struct Args {
    /// Path to a TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listener bind address.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => config::load_config(path)?,
        None => GovernorConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.listener.bind_address = bind;
    }

    logging::init(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "governor starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        config_file = ?args.config,
        cleanup_interval_secs = config.cleanup.interval_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    let (sink, receiver) = EventSink::channel();
    shutdown.track(tokio::spawn(events::run_event_logger(receiver, shutdown.subscribe())));

    let governance = Arc::new(Governance::from_config(&config, sink));
    governance.start_background(&shutdown);

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let server = HttpServer::new(&config, governance);
    let mut server_task = tokio::spawn(server.run(listener, shutdown.subscribe()));

    let finished = tokio::select! {
        _ = wait_for_signal() => None,
        result = &mut server_task => Some(result),
    };
    shutdown.trigger();

    let result = match finished {
        Some(result) => result,
        None => server_task.await,
    };
    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "HTTP server failed"),
        Err(e) => tracing::error!(error = %e, "HTTP server task panicked"),
    }
    if !shutdown.drain(DRAIN_TIMEOUT).await {
        tracing::warn!("Some background tasks did not stop in time");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
