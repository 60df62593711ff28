// =============================================================================
// Scan Engine — periodic pairwise search over the live book snapshot
// =============================================================================
//
// Every tick the engine copies the live view out of the snapshot store (one
// short lock acquisition inside the store, no lock held while computing),
// regroups it by symbol, and runs the ladder walk for every ordered venue
// pair of every symbol quoted on at least two venues. Qualifying results are
// sorted by net profit and handed to the broker, empty lists included, so
// subscribers always see the current truth.
//
// Ticks are paced from the start of the previous tick: the engine sleeps
// `interval - elapsed`, clamped at zero, so an overrunning scan re-ticks
// immediately without accumulating catch-up ticks.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::Duration;
use tracing::{debug, info, warn};

use crate::broker::OpportunityBroker;
use crate::config::Config;
use crate::market_data::store::{BookView, SnapshotStore};
use crate::scanner::ladder::{walk_ladders, EPS};
use crate::types::{opportunity_id, Opportunity};

pub struct ScanEngine {
    config: Arc<Config>,
    store: Arc<SnapshotStore>,
    broker: Arc<OpportunityBroker>,
}

impl ScanEngine {
    pub fn new(
        config: Arc<Config>,
        store: Arc<SnapshotStore>,
        broker: Arc<OpportunityBroker>,
    ) -> Self {
        Self {
            config,
            store,
            broker,
        }
    }

    /// Run scan ticks until the shutdown signal fires. Cancellation is only
    /// observed between ticks, so a publish is never left half done.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let interval = Duration::from_secs_f64(self.config.scanner_interval_seconds);
        let mut warnings = ScanWarnings::default();
        let mut skipped: u64 = 0;

        info!(
            interval_secs = self.config.scanner_interval_seconds,
            min_profit_pct = self.config.min_profit_pct,
            "scanner started"
        );

        loop {
            if *shutdown.borrow() {
                info!("scanner stopped");
                return;
            }

            let started = Instant::now();
            let view = self.store.live_view();

            if !has_common_symbol(&view) {
                skipped += 1;
                if skipped % 10 == 0 {
                    info!(
                        skipped,
                        "scan skipped, no symbol is live on two or more venues"
                    );
                }
                self.broker.publish(Vec::new());
            } else {
                if skipped > 0 {
                    info!(skipped, "enough data again, scanning resumes");
                    skipped = 0;
                }

                let timestamp = Utc::now().timestamp_millis();
                let opportunities = scan_view(&view, &self.config, &mut warnings, timestamp);
                let elapsed_ms = started.elapsed().as_millis();
                if opportunities.is_empty() {
                    debug!(elapsed_ms, "scan complete, no opportunities");
                } else {
                    info!(
                        count = opportunities.len(),
                        best_net_pct = opportunities[0].net_profit_pct,
                        best_id = %opportunities[0].id,
                        elapsed_ms,
                        "scan complete"
                    );
                }
                self.broker.publish(opportunities);
            }

            let wait = interval.saturating_sub(started.elapsed());
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.changed() => {
                    info!("scanner stopped");
                    return;
                }
            }
        }
    }
}

/// Once-per-run warning latches for configuration gaps.
#[derive(Default)]
pub(crate) struct ScanWarnings {
    symbols_without_cap: HashSet<String>,
    venues_without_fee: HashSet<String>,
}

impl ScanWarnings {
    fn note_missing_cap(&mut self, symbol: &str) {
        if self.symbols_without_cap.insert(symbol.to_string()) {
            warn!(symbol = %symbol, "no usable trade volume cap configured, symbol not scanned");
        }
    }

    fn fee_for(&mut self, config: &Config, venue: &str) -> Option<f64> {
        let fee = config.taker_fee_for(venue);
        if fee.is_none() && self.venues_without_fee.insert(venue.to_string()) {
            warn!(venue = %venue, "no taker fee configured, venue excluded from evaluation");
        }
        fee
    }
}

/// True when at least one symbol has a book on two or more live venues.
pub(crate) fn has_common_symbol(view: &BookView) -> bool {
    let mut seen: HashMap<&str, usize> = HashMap::new();
    for books in view.values() {
        for symbol in books.keys() {
            let count = seen.entry(symbol.as_str()).or_insert(0);
            *count += 1;
            if *count >= 2 {
                return true;
            }
        }
    }
    false
}

/// Evaluate every ordered venue pair for every multi-venue symbol in `view`.
///
/// Symbols are visited in configured order and venues in configured venue
/// order, so candidate insertion order — and therefore tie ordering after the
/// stable sort — is deterministic.
pub(crate) fn scan_view(
    view: &BookView,
    config: &Config,
    warnings: &mut ScanWarnings,
    timestamp: i64,
) -> Vec<Opportunity> {
    let mut out = Vec::new();

    for symbol in &config.symbols {
        let quoting: Vec<(&String, &Arc<crate::types::OrderBook>)> = config
            .venues
            .iter()
            .filter_map(|venue| {
                view.get(venue)
                    .and_then(|books| books.get(symbol))
                    .map(|book| (venue, book))
            })
            .collect();
        if quoting.len() < 2 {
            continue;
        }

        let Some(cap) = config.volume_cap_for(symbol) else {
            warnings.note_missing_cap(symbol);
            continue;
        };

        for (i, &(buy_venue, buy_book)) in quoting.iter().enumerate() {
            for (j, &(sell_venue, sell_book)) in quoting.iter().enumerate() {
                if i == j {
                    continue;
                }
                let Some(buy_fee) = warnings.fee_for(config, buy_venue) else {
                    continue;
                };
                let Some(sell_fee) = warnings.fee_for(config, sell_venue) else {
                    continue;
                };

                let Some(outcome) = walk_ladders(
                    &buy_book.asks,
                    &sell_book.bids,
                    config.min_profit_pct,
                    cap,
                    buy_fee,
                    sell_fee,
                ) else {
                    continue;
                };

                let net_profit_quote = if outcome.cost_quote > EPS {
                    (outcome.net_profit_pct / 100.0) * outcome.cost_quote
                } else {
                    0.0
                };

                out.push(Opportunity {
                    id: opportunity_id(symbol, buy_venue, sell_venue),
                    symbol: symbol.clone(),
                    buy_exchange: buy_venue.clone(),
                    sell_exchange: sell_venue.clone(),
                    executable_volume_base: outcome.volume_base,
                    buy_price: outcome.avg_buy_price,
                    sell_price: outcome.avg_sell_price,
                    potential_profit_pct: outcome.gross_profit_pct,
                    fees_paid_quote: outcome.fees_quote,
                    net_profit_pct: outcome.net_profit_pct,
                    net_profit_quote,
                    buy_network: None,
                    sell_network: None,
                    timestamp,
                });
            }
        }
    }

    // Stable sort: equal nets keep their insertion order.
    out.sort_by(|a, b| {
        b.net_profit_pct
            .partial_cmp(&a.net_profit_pct)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    out
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OrderBook, PricePoint, VenueStatus};

    fn levels(raw: &[(f64, f64)]) -> Vec<PricePoint> {
        raw.iter().map(|&(p, v)| PricePoint::new(p, v)).collect()
    }

    fn book(venue: &str, symbol: &str, bids: &[(f64, f64)], asks: &[(f64, f64)]) -> Arc<OrderBook> {
        Arc::new(OrderBook {
            venue: venue.into(),
            symbol: symbol.into(),
            bids: levels(bids),
            asks: levels(asks),
            timestamp_ms: None,
        })
    }

    fn config() -> Config {
        let mut cfg = Config::default();
        cfg.venues = vec!["alpha".into(), "beta".into(), "gamma".into()];
        cfg.symbols = vec!["X/USDT".into(), "Y/USDT".into()];
        cfg.min_profit_pct = 0.01;
        cfg.taker_fee_pct = [("alpha".to_string(), 0.1), ("beta".to_string(), 0.1), ("gamma".to_string(), 0.1)]
            .into_iter()
            .collect();
        cfg.desired_trade_volume_base =
            [("X/USDT".to_string(), 1.0), ("Y/USDT".to_string(), 1.0)]
                .into_iter()
                .collect();
        cfg
    }

    /// Venue alpha is cheap, venue beta pays up: one direction qualifies and
    /// the reverse does not.
    fn spread_view() -> BookView {
        let mut view = BookView::new();
        view.insert(
            "alpha".into(),
            [(
                "X/USDT".to_string(),
                book("alpha", "X/USDT", &[(99.5, 1.0)], &[(100.0, 0.5), (101.0, 1.0)]),
            )]
            .into_iter()
            .collect(),
        );
        view.insert(
            "beta".into(),
            [(
                "X/USDT".to_string(),
                book("beta", "X/USDT", &[(102.0, 0.4), (101.5, 1.0)], &[(102.5, 1.0)]),
            )]
            .into_iter()
            .collect(),
        );
        view
    }

    #[test]
    fn finds_the_profitable_direction_only() {
        let cfg = config();
        let mut warnings = ScanWarnings::default();
        let opps = scan_view(&spread_view(), &cfg, &mut warnings, 1);

        assert_eq!(opps.len(), 1);
        let opp = &opps[0];
        assert_eq!(opp.id, "XUSDT-alpha-beta");
        assert_eq!(opp.buy_exchange, "alpha");
        assert_eq!(opp.sell_exchange, "beta");
        assert!((opp.executable_volume_base - 0.4).abs() < 1e-12);
        assert!((opp.buy_price - 100.0).abs() < 1e-12);
        assert!((opp.sell_price - 102.0).abs() < 1e-12);
        assert!((opp.net_profit_pct - 1.798).abs() < 1e-3);
        assert!((opp.net_profit_quote - (opp.net_profit_pct / 100.0) * 40.0).abs() < 1e-9);
        assert_eq!(opp.timestamp, 1);
    }

    #[test]
    fn direction_flips_with_the_books() {
        let cfg = config();
        let mut view = BookView::new();
        // Now beta is the cheap side.
        view.insert(
            "alpha".into(),
            [(
                "X/USDT".to_string(),
                book("alpha", "X/USDT", &[(102.0, 0.4)], &[(102.5, 1.0)]),
            )]
            .into_iter()
            .collect(),
        );
        view.insert(
            "beta".into(),
            [(
                "X/USDT".to_string(),
                book("beta", "X/USDT", &[(99.5, 1.0)], &[(100.0, 0.5)]),
            )]
            .into_iter()
            .collect(),
        );

        let mut warnings = ScanWarnings::default();
        let opps = scan_view(&view, &cfg, &mut warnings, 1);
        assert_eq!(opps.len(), 1);
        assert_eq!(opps[0].buy_exchange, "beta");
        assert_eq!(opps[0].sell_exchange, "alpha");
    }

    #[test]
    fn matched_markets_publish_nothing() {
        let cfg = config();
        let mut view = BookView::new();
        for venue in ["alpha", "beta", "gamma"] {
            view.insert(
                venue.to_string(),
                [(
                    "X/USDT".to_string(),
                    book(venue, "X/USDT", &[(100.0, 1.0)], &[(100.5, 1.0)]),
                )]
                .into_iter()
                .collect(),
            );
        }
        let mut warnings = ScanWarnings::default();
        assert!(scan_view(&view, &cfg, &mut warnings, 1).is_empty());
    }

    #[test]
    fn symbol_on_one_venue_is_skipped() {
        let cfg = config();
        let mut view = spread_view();
        view.remove("beta");
        let mut warnings = ScanWarnings::default();
        assert!(scan_view(&view, &cfg, &mut warnings, 1).is_empty());
        assert!(!has_common_symbol(&view));
    }

    #[test]
    fn missing_fee_excludes_every_pair_with_that_venue() {
        let mut cfg = config();
        cfg.taker_fee_pct.remove("beta");
        let mut warnings = ScanWarnings::default();
        assert!(scan_view(&spread_view(), &cfg, &mut warnings, 1).is_empty());
        assert!(warnings.venues_without_fee.contains("beta"));
        // The latch only fires once per venue.
        scan_view(&spread_view(), &cfg, &mut warnings, 2);
        assert_eq!(warnings.venues_without_fee.len(), 1);
    }

    #[test]
    fn missing_volume_cap_suppresses_the_symbol() {
        let mut cfg = config();
        cfg.desired_trade_volume_base.remove("X/USDT");
        let mut warnings = ScanWarnings::default();
        assert!(scan_view(&spread_view(), &cfg, &mut warnings, 1).is_empty());
        assert!(warnings.symbols_without_cap.contains("X/USDT"));
    }

    #[test]
    fn sorted_by_net_desc_with_stable_ties() {
        let cfg = config();
        let mut view = spread_view();
        // Y/USDT gets the exact same books as X/USDT on both venues, so the
        // two opportunities tie on net profit; X/USDT is configured first and
        // must stay first.
        for venue in ["alpha", "beta"] {
            let x = view.get_mut(venue).unwrap()["X/USDT"].clone();
            let y = Arc::new(OrderBook {
                symbol: "Y/USDT".to_string(),
                ..(*x).clone()
            });
            view.get_mut(venue).unwrap().insert("Y/USDT".to_string(), y);
        }

        let mut warnings = ScanWarnings::default();
        let opps = scan_view(&view, &cfg, &mut warnings, 1);
        assert_eq!(opps.len(), 2);
        assert_eq!(opps[0].symbol, "X/USDT");
        assert_eq!(opps[1].symbol, "Y/USDT");
        assert!((opps[0].net_profit_pct - opps[1].net_profit_pct).abs() < 1e-12);
    }

    #[test]
    fn republish_is_idempotent_for_an_unchanged_view() {
        let cfg = config();
        let view = spread_view();
        let mut warnings = ScanWarnings::default();
        let first = scan_view(&view, &cfg, &mut warnings, 7);
        let second = scan_view(&view, &cfg, &mut warnings, 7);
        assert_eq!(first, second);
    }

    #[tokio::test(start_paused = true)]
    async fn engine_publishes_each_tick_and_reacts_to_venue_loss() {
        use crate::broker::BrokerMessage;

        let cfg = Arc::new({
            let mut c = config();
            c.scanner_interval_seconds = 1.0;
            c
        });
        let store = Arc::new(SnapshotStore::new(&cfg.venues));
        let broker = Arc::new(OpportunityBroker::new());

        store.set_status("alpha", VenueStatus::Connected);
        store.set_status("beta", VenueStatus::Connected);
        for (venue, books) in spread_view() {
            for (symbol, book) in books {
                store.put_book(&venue, &symbol, (*book).clone());
            }
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let engine = ScanEngine::new(cfg, store.clone(), broker.clone());
        let handle = tokio::spawn(engine.run(shutdown_rx));

        let (_id, mut rx) = broker.subscribe();
        // Connect-time message, then the next published tick.
        rx.recv().await.unwrap();
        let mut saw_opportunity = false;
        for _ in 0..10 {
            if let Some(BrokerMessage::Payload(text)) = rx.recv().await {
                let parsed: Vec<Opportunity> = serde_json::from_str(&text).unwrap();
                if parsed.len() == 1 && parsed[0].buy_exchange == "alpha" {
                    saw_opportunity = true;
                    break;
                }
            }
        }
        assert!(saw_opportunity);

        // Alpha drops out between ticks; the next publishes are empty.
        store.set_status("alpha", VenueStatus::Error);
        let mut saw_empty = false;
        for _ in 0..25 {
            if let Some(BrokerMessage::Payload(text)) = rx.recv().await {
                if text == "[]" {
                    saw_empty = true;
                    break;
                }
            }
        }
        assert!(saw_empty);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
