// =============================================================================
// Snapshot Store — the single source of truth for venue books and statuses
// =============================================================================
//
// One mutex guards both maps. Writers (per-symbol watchers, session
// supervisors) and readers (scanner, status endpoint) all go through it.
// Critical sections are pure map operations — no I/O, no awaiting — so the
// lock is a plain parking_lot mutex rather than an async one.
//
// Books are stored behind `Arc` and replaced wholesale on every update, so
// `live_view` can hand the scanner a coherent copy of the maps while sharing
// the ladders themselves by reference.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::types::{OrderBook, VenueStatus};

/// Books for all live venues: venue id → symbol → latest book.
pub type BookView = HashMap<String, HashMap<String, Arc<OrderBook>>>;

struct StoreInner {
    /// A venue has an entry here only while its session is connected. The row
    /// is created on the transition to `Connected` and removed whenever the
    /// venue leaves the `Connected`/`Connecting` pair.
    books: BookView,
    statuses: HashMap<String, VenueStatus>,
}

pub struct SnapshotStore {
    inner: Mutex<StoreInner>,
}

impl SnapshotStore {
    /// Create a store with every configured venue starting `disconnected`.
    pub fn new(venues: &[String]) -> Self {
        let statuses = venues
            .iter()
            .map(|v| (v.clone(), VenueStatus::Disconnected))
            .collect();
        Self {
            inner: Mutex::new(StoreInner {
                books: HashMap::new(),
                statuses,
            }),
        }
    }

    /// Replace the stored book for `(venue, symbol)`.
    ///
    /// Returns `false` without storing when the venue's books row is gone
    /// (session already torn down) or when the book is crossed at top of
    /// book — crossed snapshots are stale and are dropped with a warning.
    pub fn put_book(&self, venue: &str, symbol: &str, book: OrderBook) -> bool {
        if book.is_crossed() {
            warn!(
                venue = %venue,
                symbol = %symbol,
                best_bid = ?book.best_bid(),
                best_ask = ?book.best_ask(),
                "dropping crossed book"
            );
            return false;
        }

        let mut inner = self.inner.lock();
        match inner.books.get_mut(venue) {
            Some(by_symbol) => {
                by_symbol.insert(symbol.to_string(), Arc::new(book));
                true
            }
            None => {
                debug!(venue = %venue, symbol = %symbol, "venue row gone, book update ignored");
                false
            }
        }
    }

    /// Remove the book for `(venue, symbol)` — per-symbol permanent failure.
    pub fn drop_book(&self, venue: &str, symbol: &str) {
        let mut inner = self.inner.lock();
        if let Some(by_symbol) = inner.books.get_mut(venue) {
            by_symbol.remove(symbol);
        }
    }

    /// Update a venue's status.
    ///
    /// The books row follows the status: it is created when the venue becomes
    /// `Connected` and removed on any transition out of the live pair.
    /// Terminal statuses keep their status row so the failure stays visible,
    /// but never hold books.
    pub fn set_status(&self, venue: &str, status: VenueStatus) {
        let mut inner = self.inner.lock();
        inner.statuses.insert(venue.to_string(), status);
        if status == VenueStatus::Connected {
            inner.books.entry(venue.to_string()).or_default();
        } else if !status.is_live() {
            inner.books.remove(venue);
        }
    }

    pub fn status_of(&self, venue: &str) -> Option<VenueStatus> {
        self.inner.lock().statuses.get(venue).copied()
    }

    /// Copy of the full status map.
    pub fn statuses(&self) -> HashMap<String, VenueStatus> {
        self.inner.lock().statuses.clone()
    }

    /// Snapshot of all books for venues that are currently live. The outer
    /// maps are copied; the books themselves are shared by `Arc` since they
    /// are immutable.
    pub fn live_view(&self) -> BookView {
        let inner = self.inner.lock();
        inner
            .books
            .iter()
            .filter(|(venue, _)| {
                inner
                    .statuses
                    .get(*venue)
                    .is_some_and(VenueStatus::is_live)
            })
            .map(|(venue, by_symbol)| (venue.clone(), by_symbol.clone()))
            .collect()
    }

    /// Clear all books and reset every non-terminal venue to `disconnected`.
    /// Terminal statuses are configuration facts and survive a restart of the
    /// service within the same process.
    pub fn reset_for_shutdown(&self) {
        let mut inner = self.inner.lock();
        inner.books.clear();
        for status in inner.statuses.values_mut() {
            if !status.is_terminal() {
                *status = VenueStatus::Disconnected;
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PricePoint;

    fn venues() -> Vec<String> {
        vec!["binance".to_string(), "okx".to_string()]
    }

    fn book(venue: &str, symbol: &str, bid: f64, ask: f64) -> OrderBook {
        OrderBook {
            venue: venue.into(),
            symbol: symbol.into(),
            bids: vec![PricePoint::new(bid, 1.0)],
            asks: vec![PricePoint::new(ask, 1.0)],
            timestamp_ms: None,
        }
    }

    #[test]
    fn starts_disconnected_with_no_books() {
        let store = SnapshotStore::new(&venues());
        assert_eq!(store.status_of("binance"), Some(VenueStatus::Disconnected));
        assert_eq!(store.status_of("okx"), Some(VenueStatus::Disconnected));
        assert!(store.live_view().is_empty());
    }

    #[test]
    fn put_rejected_until_connected() {
        let store = SnapshotStore::new(&venues());
        assert!(!store.put_book("binance", "BTC/USDT", book("binance", "BTC/USDT", 99.0, 100.0)));

        store.set_status("binance", VenueStatus::Connected);
        assert!(store.put_book("binance", "BTC/USDT", book("binance", "BTC/USDT", 99.0, 100.0)));

        let view = store.live_view();
        assert_eq!(view["binance"]["BTC/USDT"].best_bid(), Some(99.0));
    }

    #[test]
    fn crossed_book_dropped_on_insert() {
        let store = SnapshotStore::new(&venues());
        store.set_status("binance", VenueStatus::Connected);
        assert!(!store.put_book("binance", "BTC/USDT", book("binance", "BTC/USDT", 101.0, 100.0)));
        assert!(store.live_view()["binance"].is_empty());
    }

    #[test]
    fn update_replaces_prior_book() {
        let store = SnapshotStore::new(&venues());
        store.set_status("binance", VenueStatus::Connected);
        store.put_book("binance", "BTC/USDT", book("binance", "BTC/USDT", 99.0, 100.0));
        store.put_book("binance", "BTC/USDT", book("binance", "BTC/USDT", 98.0, 99.5));
        let view = store.live_view();
        assert_eq!(view["binance"]["BTC/USDT"].best_bid(), Some(98.0));
    }

    #[test]
    fn error_transition_clears_books() {
        let store = SnapshotStore::new(&venues());
        store.set_status("binance", VenueStatus::Connected);
        store.put_book("binance", "BTC/USDT", book("binance", "BTC/USDT", 99.0, 100.0));

        store.set_status("binance", VenueStatus::Error);
        assert!(store.live_view().is_empty());
        // And further writes are rejected until reconnect.
        assert!(!store.put_book("binance", "BTC/USDT", book("binance", "BTC/USDT", 99.0, 100.0)));
    }

    #[test]
    fn terminal_status_keeps_row_without_books() {
        let store = SnapshotStore::new(&venues());
        store.set_status("binance", VenueStatus::Connected);
        store.put_book("binance", "BTC/USDT", book("binance", "BTC/USDT", 99.0, 100.0));
        store.set_status("binance", VenueStatus::AuthError);

        assert_eq!(store.status_of("binance"), Some(VenueStatus::AuthError));
        assert!(store.live_view().is_empty());
    }

    #[test]
    fn live_view_excludes_non_live_venues() {
        let store = SnapshotStore::new(&venues());
        store.set_status("binance", VenueStatus::Connected);
        store.set_status("okx", VenueStatus::Connected);
        store.put_book("binance", "BTC/USDT", book("binance", "BTC/USDT", 99.0, 100.0));
        store.put_book("okx", "BTC/USDT", book("okx", "BTC/USDT", 99.2, 100.2));

        store.set_status("okx", VenueStatus::Error);
        let view = store.live_view();
        assert!(view.contains_key("binance"));
        assert!(!view.contains_key("okx"));
    }

    #[test]
    fn drop_book_removes_single_symbol() {
        let store = SnapshotStore::new(&venues());
        store.set_status("binance", VenueStatus::Connected);
        store.put_book("binance", "BTC/USDT", book("binance", "BTC/USDT", 99.0, 100.0));
        store.put_book("binance", "ETH/USDT", book("binance", "ETH/USDT", 9.0, 10.0));

        store.drop_book("binance", "BTC/USDT");
        let view = store.live_view();
        assert!(!view["binance"].contains_key("BTC/USDT"));
        assert!(view["binance"].contains_key("ETH/USDT"));
    }

    #[test]
    fn shutdown_resets_non_terminal_statuses_only() {
        let store = SnapshotStore::new(&venues());
        store.set_status("binance", VenueStatus::Connected);
        store.set_status("okx", VenueStatus::NoPairs);
        store.put_book("binance", "BTC/USDT", book("binance", "BTC/USDT", 99.0, 100.0));

        store.reset_for_shutdown();
        assert_eq!(store.status_of("binance"), Some(VenueStatus::Disconnected));
        assert_eq!(store.status_of("okx"), Some(VenueStatus::NoPairs));
        assert!(store.live_view().is_empty());
    }
}
