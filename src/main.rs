// =============================================================================
// arb-radar — Main Entry Point
// =============================================================================
//
// Cross-venue arbitrage scanner: streams order books from every configured
// venue, scans for profitable two-leg executions net of taker fees on a fixed
// cadence, and serves the results over REST and a WebSocket push stream.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod broker;
mod config;
mod market_data;
mod scanner;
mod service;
mod types;
mod venues;

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::broker::OpportunityBroker;
use crate::config::Config;
use crate::market_data::SnapshotStore;
use crate::service::ScannerService;
use crate::venues::VenueAdapter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("arb-radar starting up");

    let config_path =
        std::env::var("ARB_RADAR_CONFIG").unwrap_or_else(|_| "scanner_config.json".into());
    let mut config = Config::load(&config_path).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        Config::default()
    });
    config.apply_env_overrides();

    info!(
        venues = ?config.venues,
        symbols = ?config.symbols,
        min_profit_pct = config.min_profit_pct,
        interval_secs = config.scanner_interval_seconds,
        "configured"
    );
    let config = Arc::new(config);

    // ── 2. Build shared state ────────────────────────────────────────────
    let store = Arc::new(SnapshotStore::new(&config.venues));
    let broker = Arc::new(OpportunityBroker::new());

    let adapters: HashMap<String, Arc<dyn VenueAdapter>> = config
        .venues
        .iter()
        .filter_map(|venue| venues::adapter_for(venue).map(|a| (venue.clone(), a)))
        .collect();

    let service = Arc::new(ScannerService::new(
        config.clone(),
        store.clone(),
        broker.clone(),
        adapters,
    ));

    // ── 3. Start the data plane ──────────────────────────────────────────
    service.start();

    // ── 4. Start the API server ──────────────────────────────────────────
    let state = Arc::new(AppState::new(
        config.clone(),
        store,
        broker,
        service.clone(),
    ));
    let bind_addr = config.bind_addr.clone();

    tokio::spawn(async move {
        let app = api::rest::router(state);
        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .expect("Failed to bind API server");
        info!(addr = %bind_addr, "API server listening");
        axum::serve(listener, app)
            .await
            .expect("API server failed");
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 5. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping gracefully");

    service.stop().await;

    info!("arb-radar shut down complete.");
    Ok(())
}
