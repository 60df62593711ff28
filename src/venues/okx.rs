// =============================================================================
// OKX Spot Adapter — public REST instruments + books5 WebSocket channel
// =============================================================================
//
// Discovery uses `GET /api/v5/public/instruments?instType=SPOT`. The stream
// is the `books5` channel, which pushes a full 5-level snapshot on every
// change. The subscription is requested with an explicit frame after the
// socket opens, and the first event frame acks or rejects it.
// =============================================================================

use std::collections::HashSet;

use async_stream::stream;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite};
use tracing::{debug, info, warn};

use super::{BookStream, VenueAdapter, VenueCapabilities, VenueError};
use crate::types::{OrderBook, PricePoint};

const REST_BASE: &str = "https://www.okx.com";
const WS_URL: &str = "wss://ws.okx.com:8443/ws/v5/public";

pub struct OkxAdapter {
    http: reqwest::Client,
}

impl OkxAdapter {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    /// `BTC/USDT` → `BTC-USDT` (OKX instrument ids use a dash).
    fn inst_id(symbol: &str) -> String {
        symbol.replace('/', "-")
    }
}

impl Default for OkxAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl VenueAdapter for OkxAdapter {
    fn venue_id(&self) -> &str {
        "okx"
    }

    async fn capabilities(&self) -> Result<VenueCapabilities, VenueError> {
        Ok(VenueCapabilities {
            supports_order_book_stream: true,
            auth_required: false,
        })
    }

    async fn active_symbols(&self) -> Result<HashSet<String>, VenueError> {
        let url = format!("{REST_BASE}/api/v5/public/instruments?instType=SPOT");
        let root: serde_json::Value = self.http.get(&url).send().await?.json().await?;

        if root["code"].as_str() != Some("0") {
            return Err(VenueError::Protocol(format!(
                "instruments request failed: code={} msg={}",
                root["code"], root["msg"]
            )));
        }

        let data = root["data"]
            .as_array()
            .ok_or_else(|| VenueError::Protocol("instruments missing data array".into()))?;

        let mut active = HashSet::new();
        for inst in data {
            if inst["state"].as_str() != Some("live") {
                continue;
            }
            let (Some(base), Some(quote)) = (inst["baseCcy"].as_str(), inst["quoteCcy"].as_str())
            else {
                continue;
            };
            active.insert(format!("{base}/{quote}"));
        }

        info!(count = active.len(), "okx market metadata loaded");
        Ok(active)
    }

    async fn subscribe_order_books(
        &self,
        symbol: &str,
        _depth: usize,
    ) -> Result<BookStream, VenueError> {
        let inst_id = Self::inst_id(symbol);
        info!(url = WS_URL, inst_id = %inst_id, "connecting to okx books5 stream");

        let (mut ws_stream, _response) = connect_async(WS_URL).await?;

        let subscribe = serde_json::json!({
            "op": "subscribe",
            "args": [{ "channel": "books5", "instId": inst_id }],
        });
        ws_stream
            .send(tungstenite::Message::Text(subscribe.to_string()))
            .await?;

        let symbol = symbol.to_string();

        Ok(Box::pin(stream! {
            loop {
                match ws_stream.next().await {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        match parse_books5_message(&symbol, &text) {
                            Ok(ParsedMessage::Book(book)) => yield Ok(book),
                            Ok(ParsedMessage::Ack) => {
                                debug!(symbol = %symbol, "okx subscription acknowledged");
                            }
                            Ok(ParsedMessage::VenueError { code, msg }) => {
                                // Rejections that name the instrument mean the
                                // symbol itself is unusable; anything else is a
                                // protocol-level failure.
                                if msg.contains("instId") || msg.contains("doesn't exist") {
                                    yield Err(VenueError::BadSymbol(symbol.clone()));
                                } else {
                                    yield Err(VenueError::Protocol(format!(
                                        "okx error {code}: {msg}"
                                    )));
                                }
                                break;
                            }
                            Err(e) => {
                                warn!(symbol = %symbol, error = %e, "skipping unparseable books5 message");
                            }
                        }
                    }
                    Some(Ok(tungstenite::Message::Ping(data))) => {
                        debug!(symbol = %symbol, "books5 stream ping");
                        ws_stream.send(tungstenite::Message::Pong(data)).await.ok();
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        yield Err(VenueError::Protocol(format!(
                            "books5 stream closed by venue: {frame:?}"
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
    Ack,
    VenueError { code: String, msg: String },
}

/// Parse one `books5` frame.
///
/// Data frames look like:
/// ```json
/// {
///   "arg": { "channel": "books5", "instId": "BTC-USDT" },
///   "data": [{
///     "asks": [["41006.8", "0.6", "0", "1"], ...],
///     "bids": [["41006.3", "0.3", "0", "2"], ...],
///     "ts": "1629966436396"
///   }]
/// }
/// ```
/// Event frames carry `"event": "subscribe"` (ack) or `"event": "error"`.
fn parse_books5_message(symbol: &str, text: &str) -> anyhow::Result<ParsedMessage> {
    let root: serde_json::Value = serde_json::from_str(text)?;

    match root["event"].as_str() {
        Some("subscribe") => return Ok(ParsedMessage::Ack),
        Some("error") => {
            return Ok(ParsedMessage::VenueError {
                code: root["code"].as_str().unwrap_or("").to_string(),
                msg: root["msg"].as_str().unwrap_or("").to_string(),
            });
        }
        _ => {}
    }

    let entry = root["data"]
        .as_array()
        .and_then(|d| d.first())
        .ok_or_else(|| anyhow::anyhow!("missing data array"))?;

    let bids = parse_ladder(&entry["bids"]).ok_or_else(|| anyhow::anyhow!("missing field bids"))?;
    let asks = parse_ladder(&entry["asks"]).ok_or_else(|| anyhow::anyhow!("missing field asks"))?;
    let timestamp_ms = entry["ts"].as_str().and_then(|ts| ts.parse::<i64>().ok());

    Ok(ParsedMessage::Book(OrderBook {
        venue: "okx".to_string(),
        symbol: symbol.to_string(),
        bids,
        asks,
        timestamp_ms,
    }))
}

/// Parse a `[["price", "size", ...], ...]` array, dropping zero-size levels.
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
