mod api;
mod cluster;
mod config;
mod cycle;
mod db;
mod dispatch;
mod error;
mod fetcher;
mod filter;
mod relevance;
mod retention;
mod retry;
mod signals;
mod tiering;
mod types;

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::api::{router, ApiState, HealthState, LatencyStats};
use crate::cluster::ClusteringEngine;
use crate::config::Config;
use crate::cycle::CheckCycle;
use crate::db::Store;
use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::fetcher::{ExchangeConnector, KalshiConnector, PolymarketConnector};
use crate::relevance::RelevanceCache;
use crate::retention::{RetentionManager, RetentionScheduler};
use crate::signals::SignalReader;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let pool = db::connect(&cfg.db_path).await?;
    let store = Store::new(pool);

    // --- Shared state ---
    let health = Arc::new(HealthState::new());
    let latency = Arc::new(LatencyStats::new());
    let cache = Arc::new(RelevanceCache::new(store.clone()));
    let classifier = relevance::classifier::from_config(&cfg)?;

    // --- Check cycle (first run immediately, then every CHECK_INTERVAL_MINUTES) ---
    let connectors: Vec<Arc<dyn ExchangeConnector>> = vec![
        Arc::new(KalshiConnector::new(cfg.kalshi.clone())?),
        Arc::new(PolymarketConnector::new(cfg.polymarket.clone())?),
    ];
    let cycle = CheckCycle::new(
        connectors,
        cfg.retry.clone(),
        cfg.absolute_min_volume,
        ClusteringEngine::new(Arc::clone(&cache), classifier),
        SignalReader::new(store.clone()),
        cfg.thresholds.clone(),
        Dispatcher::new(store.clone(), cfg.alert_cooldown_hours),
        Arc::clone(&health),
        Arc::clone(&latency),
    );
    let every = cfg.check_interval;
    info!(
        "Check cycle every {}m, volume floor ${:.0}",
        every.as_secs() / 60,
        cfg.absolute_min_volume,
    );
    tokio::spawn(async move { cycle.run(every).await });

    // --- Retention (daily at CLEANUP_TIME UTC) ---
    let manager = RetentionManager::new(store.clone(), Arc::clone(&cache), cfg.retention.clone());
    let scheduler = RetentionScheduler::new(manager, cfg.cleanup_time, Arc::clone(&health));
    tokio::spawn(async move { scheduler.run().await });

    // --- HTTP API server ---
    let app = router(ApiState { store, health, latency });
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
