// =============================================================================
// WebSocket Handler — push stream of published opportunity lists
// =============================================================================
//
// Clients connect to `/ws` and receive:
//   1. An immediate message containing the current opportunity list.
//   2. One message per scan tick thereafter.
//
// Each message is a single text frame holding a JSON array. The consumer loop
// runs until the broker sends the shutdown sentinel, the broker closes the
// queue, or the client goes away; in every case the subscriber is removed
// from the registry on the way out.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use crate::app_state::AppState;
use crate::broker::BrokerMessage;

/// Axum handler for the WebSocket upgrade request.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

/// Manage a single subscriber connection: forward broker messages out, answer
/// Ping frames, and tear down cleanly on either side closing.
async fn handle_ws_connection(socket: WebSocket, state: Arc<AppState>) {
    let (subscriber_id, mut feed) = state.broker.subscribe();
    info!(subscriber = %subscriber_id, "opportunity stream client connected");

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            // ── Outbound: broker → client ───────────────────────────────
            queued = feed.recv() => match queued {
                Some(BrokerMessage::Payload(text)) => {
                    if let Err(e) = sender.send(Message::Text(text)).await {
                        debug!(subscriber = %subscriber_id, error = %e, "send failed, disconnecting");
                        break;
                    }
                }
                // Sentinel on service stop; a closed queue means the same.
                Some(BrokerMessage::Shutdown) | None => {
                    info!(subscriber = %subscriber_id, "stream shutting down");
                    break;
                }
            },

            // ── Inbound: client frames ──────────────────────────────────
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Ping(data))) => {
                    if sender.send(Message::Pong(data)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    info!(subscriber = %subscriber_id, "client disconnected");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(subscriber = %subscriber_id, error = %e, "receive error, disconnecting");
                    break;
                }
            },
        }
    }

    state.broker.unsubscribe(subscriber_id);
    sender.send(Message::Close(None)).await.ok();
}
