//! pingwatch - network reachability monitor
//!
//! Pings a fixed set of targets, stores every sample in SQLite, rolls samples up
//! into hourly patterns and serves the results over a small JSON API.

mod config;
mod db;
mod probe;
mod report;
mod scheduler;
mod web;

use config::ServerConfig;
use db::Store;
use probe::PingProber;
use scheduler::Monitor;
use web::Server;

use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("pingwatch=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    cfg.validate()?;
    tracing::info!("Starting pingwatch on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    // Start sampling
    let prober = Arc::new(PingProber::with_program(cfg.ping_program.clone()));
    let mut monitor = Monitor::new(cfg.monitor_config(), store.clone(), prober);
    monitor.start();

    // Start web server
    let report_dir = cfg.report_dir.clone();
    let server = Server::new(cfg, store.clone());
    let web = tokio::spawn(async move {
        if let Err(e) = server.start().await {
            tracing::error!("Web server stopped: {}", e);
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");

    web.abort();
    monitor.stop();
    monitor.wait().await;

    if let Some(dir) = report_dir {
        if let Err(e) = report::write_text_report(&store, Path::new(&dir), 24) {
            tracing::error!("Failed to write shutdown report: {}", e);
        }
    }

    Ok(())
}
