// =============================================================================
// Scanner Service — lifecycle of the sessions and the scan loop
// =============================================================================
//
// Owns the tasks that make up the data plane: one session supervisor per
// configured venue plus the scan engine. `start` spawns them against a fresh
// shutdown channel; `stop` flips the channel, waits for every task to drain,
// tells the broker to wind its subscribers down and resets the snapshot
// store. Both are idempotent.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::broker::OpportunityBroker;
use crate::config::Config;
use crate::market_data::{SnapshotStore, VenueSession};
use crate::scanner::ScanEngine;
use crate::venues::VenueAdapter;

struct RunningTasks {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

pub struct ScannerService {
    config: Arc<Config>,
    store: Arc<SnapshotStore>,
    broker: Arc<OpportunityBroker>,
    adapters: HashMap<String, Arc<dyn VenueAdapter>>,
    running: AtomicBool,
    tasks: Mutex<Option<RunningTasks>>,
}

impl ScannerService {
    pub fn new(
        config: Arc<Config>,
        store: Arc<SnapshotStore>,
        broker: Arc<OpportunityBroker>,
        adapters: HashMap<String, Arc<dyn VenueAdapter>>,
    ) -> Self {
        Self {
            config,
            store,
            broker,
            adapters,
            running: AtomicBool::new(false),
            tasks: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawn one session supervisor per configured venue and the scan engine.
    /// A second call while running is a no-op.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();
        if tasks.is_some() {
            info!("service already running");
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut handles = Vec::with_capacity(self.config.venues.len() + 1);

        for venue in &self.config.venues {
            let session = VenueSession::new(
                venue.clone(),
                self.config.symbols.clone(),
                self.config.order_book_depth,
                self.adapters.get(venue).cloned(),
                self.store.clone(),
            );
            handles.push(tokio::spawn(session.run(shutdown_rx.clone())));
        }
        info!(venues = self.config.venues.len(), "venue sessions launched");

        let engine = ScanEngine::new(
            self.config.clone(),
            self.store.clone(),
            self.broker.clone(),
        );
        handles.push(tokio::spawn(engine.run(shutdown_rx)));

        *tasks = Some(RunningTasks {
            shutdown_tx,
            handles,
        });
        self.running.store(true, Ordering::SeqCst);
        info!("service started");
    }

    /// Signal every task to stop, wait for them, then release subscribers and
    /// clear the snapshot state.
    pub async fn stop(&self) {
        let running = self.tasks.lock().take();
        let Some(running) = running else {
            info!("service not running");
            return;
        };
        self.running.store(false, Ordering::SeqCst);

        running.shutdown_tx.send(true).ok();
        for handle in running.handles {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "task ended abnormally during shutdown");
                }
            }
        }

        self.broker.shutdown();
        self.store.reset_for_shutdown();
        info!("service stopped");
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::BrokerMessage;
    use crate::types::{OrderBook, PricePoint, VenueStatus};
    use crate::venues::testing::MockVenue;
    use std::time::Duration;

    fn book(venue: &str, symbol: &str, bids: &[(f64, f64)], asks: &[(f64, f64)]) -> OrderBook {
        OrderBook {
            venue: venue.into(),
            symbol: symbol.into(),
            bids: bids.iter().map(|&(p, v)| PricePoint::new(p, v)).collect(),
            asks: asks.iter().map(|&(p, v)| PricePoint::new(p, v)).collect(),
            timestamp_ms: None,
        }
    }

    fn test_config() -> Config {
        let mut cfg = Config::default();
        cfg.venues = vec!["east".into(), "west".into()];
        cfg.symbols = vec!["X/USDT".into()];
        cfg.scanner_interval_seconds = 0.5;
        cfg.taker_fee_pct = [("east".to_string(), 0.1), ("west".to_string(), 0.1)]
            .into_iter()
            .collect();
        cfg.desired_trade_volume_base = [("X/USDT".to_string(), 1.0)].into_iter().collect();
        cfg
    }

    async fn wait_for<F: Fn() -> bool>(cond: F, what: &str) {
        for _ in 0..300 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {what}");
    }

    /// Full pipeline: two mock venues feed books, the scanner finds the
    /// spread, a subscriber sees it, and stop() winds everything down.
    #[tokio::test(start_paused = true)]
    async fn end_to_end_scan_and_shutdown() {
        let config = Arc::new(test_config());
        let store = Arc::new(SnapshotStore::new(&config.venues));
        let broker = Arc::new(OpportunityBroker::new());

        let east = MockVenue::new("east", &["X/USDT"]);
        let west = MockVenue::new("west", &["X/USDT"]);
        let adapters: HashMap<String, Arc<dyn VenueAdapter>> = [
            ("east".to_string(), east.clone() as Arc<dyn VenueAdapter>),
            ("west".to_string(), west.clone() as Arc<dyn VenueAdapter>),
        ]
        .into_iter()
        .collect();

        let service = Arc::new(ScannerService::new(
            config.clone(),
            store.clone(),
            broker.clone(),
            adapters,
        ));

        service.start();
        assert!(service.is_running());
        // Starting twice is harmless.
        service.start();

        wait_for(
            || {
                store.status_of("east") == Some(VenueStatus::Connected)
                    && store.status_of("west") == Some(VenueStatus::Connected)
            },
            "both venues connected",
        )
        .await;

        east.feed(
            "X/USDT",
            Ok(book("east", "X/USDT", &[(99.5, 1.0)], &[(100.0, 0.5)])),
        );
        west.feed(
            "X/USDT",
            Ok(book("west", "X/USDT", &[(102.0, 0.4)], &[(102.5, 1.0)])),
        );

        let (_id, mut rx) = broker.subscribe();
        let mut found = false;
        for _ in 0..10 {
            match rx.recv().await {
                Some(BrokerMessage::Payload(text)) if text.contains("XUSDT-east-west") => {
                    found = true;
                    break;
                }
                Some(_) => continue,
                None => break,
            }
        }
        assert!(found, "published opportunity never reached the subscriber");

        service.stop().await;
        assert!(!service.is_running());
        assert_eq!(store.status_of("east"), Some(VenueStatus::Disconnected));
        assert_eq!(store.status_of("west"), Some(VenueStatus::Disconnected));
        assert!(store.live_view().is_empty());

        // Subscribers see the shutdown sentinel, or channel closure if their
        // queue was full when it was sent — either ends the consumer loop.
        let clean_end = loop {
            match rx.recv().await {
                Some(BrokerMessage::Shutdown) | None => break true,
                Some(BrokerMessage::Payload(_)) => continue,
            }
        };
        assert!(clean_end);

        // Stopping twice is harmless too.
        service.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_venue_goes_terminal_without_blocking_stop() {
        let mut cfg = test_config();
        cfg.venues = vec!["ghost".into()];
        let config = Arc::new(cfg);
        let store = Arc::new(SnapshotStore::new(&config.venues));
        let broker = Arc::new(OpportunityBroker::new());

        let service = ScannerService::new(
            config.clone(),
            store.clone(),
            broker.clone(),
            HashMap::new(),
        );
        service.start();

        wait_for(
            || store.status_of("ghost") == Some(VenueStatus::Unsupported),
            "ghost venue marked unsupported",
        )
        .await;

        service.stop().await;
        // Terminal status survives the shutdown reset.
        assert_eq!(store.status_of("ghost"), Some(VenueStatus::Unsupported));
    }
}
