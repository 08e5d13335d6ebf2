//! LineWatch - dual-line connectivity monitor.
//!
//! Probes the primary and secondary uplinks of each configured site with
//! ICMP echo, isolates failing lines behind circuit breakers, keeps a log of
//! every result and serves live status and statistics as JSON.

mod breaker;
mod config;
mod db;
mod metrics;
mod probe;
mod scheduler;
mod site;
mod state;
mod stats;
mod web;

use breaker::{spawn_transition_listener, BreakerRegistry};
use config::ServerConfig;
use metrics::MetricsRegistry;
use probe::{IcmpProber, ProbeExecutor};
use scheduler::{ResultPipeline, Scheduler};
use state::MonitorState;
use web::{AppState, Server};

use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const RESULT_QUEUE_SIZE: usize = 1000;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("linewatch=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting LineWatch on port {}...", cfg.http_port);

    let sites = config::load_sites(&cfg.sites_path)?;
    tracing::info!("Loaded {} sites from {}", sites.len(), cfg.sites_path);

    // Initialize storage
    let backend = cfg.storage_backend()?;
    let store = db::open_store(&backend)?;
    tracing::info!("Log store initialized: {:?}", backend);

    let metrics = Arc::new(MetricsRegistry::new());
    let (breakers, transitions) = BreakerRegistry::new(cfg.breaker_threshold, cfg.breaker_reset);
    let breakers = Arc::new(breakers);
    let listener = spawn_transition_listener(transitions, metrics.clone());

    let monitor = Arc::new(MonitorState::new(sites, store.clone(), metrics));
    let executor = Arc::new(ProbeExecutor::new(
        Arc::new(IcmpProber::new()),
        cfg.probe_options(),
        breakers.clone(),
    ));

    let (results_tx, results_rx) = mpsc::channel(RESULT_QUEUE_SIZE);
    let (shutdown_tx, _) = broadcast::channel(1);
    let (pipeline_stop_tx, pipeline_stop_rx) = broadcast::channel(1);

    let pipeline = tokio::spawn(ResultPipeline::new(monitor.clone()).run(results_rx, pipeline_stop_rx));

    // Start scheduler
    let scheduler = Arc::new(Scheduler::new(
        monitor.clone(),
        executor,
        results_tx,
        cfg.default_interval,
        shutdown_tx.clone(),
    ));
    let site_loops = scheduler.start();

    // Start web server
    let server = Server::new(
        cfg.http_port,
        AppState {
            monitor,
            scheduler,
            breakers,
        },
    );
    server.start(shutdown_signal()).await?;

    tracing::info!("Shutting down...");
    let _ = shutdown_tx.send(());
    // Site loops return once their running probes have queued results
    for handle in site_loops {
        if let Err(e) = handle.await {
            tracing::error!("Site loop task failed: {}", e);
        }
    }
    let _ = pipeline_stop_tx.send(());
    if let Err(e) = pipeline.await {
        tracing::error!("Result pipeline task failed: {}", e);
    }
    listener.abort();

    store.close()?;
    tracing::info!("Log store closed");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
