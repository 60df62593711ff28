// =============================================================================
// Binance Spot Adapter — public REST metadata + partial-depth WebSocket
// =============================================================================
//
// Discovery goes through `GET /api/v3/exchangeInfo`; the stream is the
// `@depth<N>@100ms` partial book feed, which pushes a full top-N snapshot
// every 100 ms. No credentials are involved — everything here is public
// market data.
// =============================================================================

use std::collections::HashSet;

use async_stream::stream;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite};
use tracing::{debug, info, warn};

use super::{BookStream, VenueAdapter, VenueCapabilities, VenueError};
use crate::types::{OrderBook, PricePoint};

const REST_BASE: &str = "https://api.binance.com";
const WS_BASE: &str = "wss://stream.binance.com:9443/ws";

/// Binance's "invalid symbol" error code, seen when a symbol is delisted
/// mid-subscription.
const CODE_INVALID_SYMBOL: i64 = -1121;

pub struct BinanceAdapter {
    http: reqwest::Client,
}

impl BinanceAdapter {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    /// `BTC/USDT` → `btcusdt` (stream names are lowercase and unseparated).
    fn stream_symbol(symbol: &str) -> String {
        symbol.replace('/', "").to_lowercase()
    }
}

impl Default for BinanceAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl VenueAdapter for BinanceAdapter {
    fn venue_id(&self) -> &str {
        "binance"
    }

    async fn capabilities(&self) -> Result<VenueCapabilities, VenueError> {
        Ok(VenueCapabilities {
            supports_order_book_stream: true,
            auth_required: false,
        })
    }

    async fn active_symbols(&self) -> Result<HashSet<String>, VenueError> {
        let url = format!("{REST_BASE}/api/v3/exchangeInfo");
        let root: serde_json::Value = self.http.get(&url).send().await?.json().await?;

        let symbols = root["symbols"]
            .as_array()
            .ok_or_else(|| VenueError::Protocol("exchangeInfo missing symbols array".into()))?;

        let mut active = HashSet::new();
        for entry in symbols {
            if entry["status"].as_str() != Some("TRADING") {
                continue;
            }
            let (Some(base), Some(quote)) =
                (entry["baseAsset"].as_str(), entry["quoteAsset"].as_str())
            else {
                continue;
            };
            active.insert(format!("{base}/{quote}"));
        }

        info!(count = active.len(), "binance market metadata loaded");
        Ok(active)
    }

    async fn subscribe_order_books(
        &self,
        symbol: &str,
        depth: usize,
    ) -> Result<BookStream, VenueError> {
        // The partial-depth stream only comes in 5/10/20 level flavours.
        let levels = match depth {
            0..=5 => 5,
            6..=10 => 10,
            _ => 20,
        };
        let stream_name = Self::stream_symbol(symbol);
        let url = format!("{WS_BASE}/{stream_name}@depth{levels}@100ms");
        info!(url = %url, symbol = %symbol, "connecting to binance depth stream");

        let (mut ws_stream, _response) = connect_async(&url).await?;
        let symbol = symbol.to_string();

        Ok(Box::pin(stream! {
            loop {
                match ws_stream.next().await {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        match parse_depth_message(&symbol, &text) {
                            Ok(ParsedMessage::Book(book)) => yield Ok(book),
                            Ok(ParsedMessage::VenueError { code, msg }) => {
                                if code == CODE_INVALID_SYMBOL {
                                    yield Err(VenueError::BadSymbol(symbol.clone()));
                                } else {
                                    yield Err(VenueError::Protocol(format!(
                                        "binance error {code}: {msg}"
                                    )));
                                }
                                break;
                            }
                            Err(e) => {
                                warn!(symbol = %symbol, error = %e, "skipping unparseable depth message");
                            }
                        }
                    }
                    Some(Ok(tungstenite::Message::Ping(data))) => {
                        debug!(symbol = %symbol, "depth stream ping");
                        ws_stream.send(tungstenite::Message::Pong(data)).await.ok();
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        yield Err(VenueError::Protocol(format!(
                            "depth stream closed by venue: {frame:?}"
                        )));
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        yield Err(VenueError::Transport(e));
                        break;
                    }
                    None => break,
                }
            }
        }))
    }
}

enum ParsedMessage {
    Book(OrderBook),
    VenueError { code: i64, msg: String },
}

/// Parse one partial-depth snapshot into a full bid/ask ladder.
///
/// Expected shape:
/// ```json
/// {
///   "lastUpdateId": 12345,
///   "bids": [["37000.00", "1.5"], ...],
///   "asks": [["37001.00", "1.2"], ...]
/// }
/// ```
fn parse_depth_message(symbol: &str, text: &str) -> anyhow::Result<ParsedMessage> {
    let root: serde_json::Value = serde_json::from_str(text)?;

    // In-band error object, e.g. {"code": -1121, "msg": "Invalid symbol."}
    if let Some(code) = root["code"].as_i64() {
        let msg = root["msg"].as_str().unwrap_or("").to_string();
        return Ok(ParsedMessage::VenueError { code, msg });
    }

    let bids = parse_ladder(&root["bids"]).ok_or_else(|| anyhow::anyhow!("missing field bids"))?;
    let asks = parse_ladder(&root["asks"]).ok_or_else(|| anyhow::anyhow!("missing field asks"))?;

    Ok(ParsedMessage::Book(OrderBook {
        venue: "binance".to_string(),
        symbol: symbol.to_string(),
        bids,
        asks,
        timestamp_ms: Some(Utc::now().timestamp_millis()),
    }))
}

/// Parse a `[["price", "qty"], ...]` array, dropping zero-quantity levels.
fn parse_ladder(value: &serde_json::Value) -> Option<Vec<PricePoint>> {
    let levels = value.as_array()?;
    let mut ladder = Vec::with_capacity(levels.len());
    for level in levels {
        let price: f64 = level.get(0)?.as_str()?.parse().ok()?;
        let volume: f64 = level.get(1)?.as_str()?.parse().ok()?;
        if volume > 0.0 {
            ladder.push(PricePoint::new(price, volume));
        }
    }
    Some(ladder)
}
