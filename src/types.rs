// =============================================================================
// Shared types used across the arb-radar scanner
// =============================================================================

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Price levels and order books
// ---------------------------------------------------------------------------

/// A single resting price level: price and available volume in base currency.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub price: f64,
    pub volume: f64,
}

impl PricePoint {
    pub fn new(price: f64, volume: f64) -> Self {
        Self { price, volume }
    }

    /// A level is usable only when both fields are finite and strictly positive.
    pub fn is_valid(&self) -> bool {
        self.price.is_finite() && self.price > 0.0 && self.volume.is_finite() && self.volume > 0.0
    }
}

/// Why an incoming book update was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BookRejection {
    #[error("level with non-finite or non-positive price/volume")]
    BadLevel,
    #[error("bids not strictly descending by price")]
    BidsOutOfOrder,
    #[error("asks not strictly ascending by price")]
    AsksOutOfOrder,
    #[error("best bid at or above best ask")]
    Crossed,
}

/// Normalized order book for one (venue, symbol).
///
/// `bids` are sorted by price descending, `asks` ascending; either side may be
/// empty. Instances are never mutated in place — every update from a venue
/// replaces the whole book, so readers may share them by `Arc`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBook {
    pub venue: String,
    pub symbol: String,
    pub bids: Vec<PricePoint>,
    pub asks: Vec<PricePoint>,
    pub timestamp_ms: Option<i64>,
}

impl OrderBook {
    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|l| l.price)
    }

    /// True when the top of book is crossed (stale or inconsistent data).
    pub fn is_crossed(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => bid >= ask,
            _ => false,
        }
    }

    /// Check every structural invariant: valid levels, strict ordering on both
    /// ladders, and an uncrossed top of book.
    pub fn validate(&self) -> Result<(), BookRejection> {
        for level in self.bids.iter().chain(self.asks.iter()) {
            if !level.is_valid() {
                return Err(BookRejection::BadLevel);
            }
        }
        if self.bids.windows(2).any(|w| w[0].price <= w[1].price) {
            return Err(BookRejection::BidsOutOfOrder);
        }
        if self.asks.windows(2).any(|w| w[0].price >= w[1].price) {
            return Err(BookRejection::AsksOutOfOrder);
        }
        if self.is_crossed() {
            return Err(BookRejection::Crossed);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Venue connection status
// ---------------------------------------------------------------------------

/// Connection lifecycle of a venue session.
///
/// `AuthError`, `Unsupported` and `NoPairs` are terminal: the supervisor for
/// that venue has exited permanently and will not reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VenueStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
    AuthError,
    Unsupported,
    NoPairs,
}

impl VenueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
            Self::AuthError => "auth_error",
            Self::Unsupported => "unsupported",
            Self::NoPairs => "no_pairs",
        }
    }

    /// Terminal statuses are never retried.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::AuthError | Self::Unsupported | Self::NoPairs)
    }

    /// Only live venues contribute books to the scanner's view.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Connected | Self::Connecting)
    }
}

impl std::fmt::Display for VenueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Arbitrage opportunities
// ---------------------------------------------------------------------------

/// A profitable two-leg execution found by the scanner: buy `symbol` on
/// `buy_exchange`, sell it on `sell_exchange`, netting `net_profit_pct` after
/// taker fees on both legs.
///
/// `buy_network` / `sell_network` are reserved for transfer-cost modelling and
/// are always `null` in this version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: String,
    pub symbol: String,
    pub buy_exchange: String,
    pub sell_exchange: String,
    pub executable_volume_base: f64,
    pub buy_price: f64,
    pub sell_price: f64,
    pub potential_profit_pct: f64,
    pub fees_paid_quote: f64,
    pub net_profit_pct: f64,
    pub net_profit_quote: f64,
    pub buy_network: Option<String>,
    pub sell_network: Option<String>,
    pub timestamp: i64,
}

/// Stable identifier for a (symbol, buy venue, sell venue) triple, e.g.
/// `BTCUSDT-binance-okx` for `BTC/USDT` bought on Binance and sold on OKX.
pub fn opportunity_id(symbol: &str, buy_venue: &str, sell_venue: &str) -> String {
    format!(
        "{}-{}-{}",
        symbol.replace('/', ""),
        buy_venue.to_lowercase(),
        sell_venue.to_lowercase()
    )
}

// =============================================================================
// Tests
// =============================================================================
