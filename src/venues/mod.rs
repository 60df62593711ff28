// =============================================================================
// Venue Adapters — per-exchange wire protocol behind a uniform trait
// =============================================================================

pub mod binance;
pub mod okx;

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::Stream;

use crate::types::OrderBook;

/// What a venue can do, discovered before subscribing.
#[derive(Debug, Clone, Copy)]
pub struct VenueCapabilities {
    pub supports_order_book_stream: bool,
    pub auth_required: bool,
}

/// Adapter-level failure taxonomy. The session supervisor matches on this to
/// decide between terminal exit, per-symbol drop, and reconnect-with-backoff.
#[derive(Debug, thiserror::Error)]
pub enum VenueError {
    /// Credentials rejected. Terminal for the venue.
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// The venue cannot stream order books. Terminal for the venue.
    #[error("streaming order books not supported")]
    Unsupported,

    /// The venue reported this symbol unknown or inactive. Permanent for the
    /// symbol, survivable for the session.
    #[error("symbol {0} rejected by venue")]
    BadSymbol(String),

    #[error("transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The venue sent something we could not make sense of at the session
    /// level (bad handshake, unexpected close, malformed control message).
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// A live order book subscription: each item is either the next full book
/// snapshot or a stream-fatal error. Per-update parse glitches are logged and
/// skipped inside the adapter — only errors that end the subscription surface
/// here.
pub type BookStream = Pin<Box<dyn Stream<Item = Result<OrderBook, VenueError>> + Send>>;

/// Uniform interface over one exchange's public market data.
#[async_trait]
pub trait VenueAdapter: Send + Sync {
    fn venue_id(&self) -> &str;

    /// Capability discovery, performed once per session before subscribing.
    async fn capabilities(&self) -> Result<VenueCapabilities, VenueError>;

    /// Market metadata: the set of actively trading symbols, normalized to
    /// `BASE/QUOTE` form.
    async fn active_symbols(&self) -> Result<HashSet<String>, VenueError>;

    /// Open a streaming order book subscription for one symbol. `depth` is a
    /// request; venues clamp it to what their stream supports.
    async fn subscribe_order_books(
        &self,
        symbol: &str,
        depth: usize,
    ) -> Result<BookStream, VenueError>;
}

/// Look up the adapter for a configured venue id. A venue without an adapter
/// is reported as `unsupported` by its supervisor.
pub fn adapter_for(venue_id: &str) -> Option<Arc<dyn VenueAdapter>> {
    match venue_id {
        "binance" => Some(Arc::new(binance::BinanceAdapter::new())),
        "okx" => Some(Arc::new(okx::OkxAdapter::new())),
        _ => None,
    }
}
