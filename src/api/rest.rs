// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// The read-only surface of the scanner:
//
//   GET /api/v1/opportunities   latest published list, most profitable first
//   GET /status                 service flag + per-venue connection status
//   GET /api/v1/monitored_pairs configured venue → symbol mapping
//   GET /api/v1/health          liveness probe
//   GET /ws                     push stream (see ws.rs)
//
// CORS is configured permissively for development; tighten the allowed
// origins in production.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::State,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use tower_http::cors::{Any, CorsLayer};

use crate::app_state::AppState;

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/opportunities", get(opportunities))
        .route("/status", get(status))
        .route("/api/v1/monitored_pairs", get(monitored_pairs))
        .route("/ws", get(crate::api::ws::ws_handler))
        .layer(cors)
        .with_state(state)
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "uptime_s": state.start_time.elapsed().as_secs(),
        "server_time": chrono::Utc::now().timestamp_millis(),
    }))
}

/// The latest scan results. Already filtered by the profit threshold and
/// sorted by net profit descending at publish time.
async fn opportunities(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.broker.latest())
}

async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "running",
        "service_running": state.service.is_running(),
        "exchange_statuses": state.store.statuses(),
    }))
}

/// Static venue → symbols mapping straight from configuration.
async fn monitored_pairs(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let monitored: HashMap<String, Vec<String>> = state
        .config
        .venues
        .iter()
        .map(|venue| (venue.clone(), state.config.symbols.clone()))
        .collect();
    Json(monitored)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::OpportunityBroker;
    use crate::config::Config;
    use crate::market_data::SnapshotStore;
    use crate::service::ScannerService;
    use crate::types::VenueStatus;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::util::ServiceExt;

    fn test_state() -> Arc<AppState> {
        let config = Arc::new(Config::default());
        let store = Arc::new(SnapshotStore::new(&config.venues));
        let broker = Arc::new(OpportunityBroker::new());
        let service = Arc::new(ScannerService::new(
            config.clone(),
            store.clone(),
            broker.clone(),
            HashMap::new(),
        ));
        Arc::new(AppState::new(config, store, broker, service))
    }

    async fn get_json(state: Arc<AppState>, uri: &str) -> serde_json::Value {
        let response = router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn opportunities_starts_as_empty_array() {
        let body = get_json(test_state(), "/api/v1/opportunities").await;
        assert_eq!(body, serde_json::json!([]));
    }

    #[tokio::test]
    async fn status_reports_service_flag_and_venue_statuses() {
        let state = test_state();
        state.store.set_status("binance", VenueStatus::Connected);
        state.store.set_status("okx", VenueStatus::AuthError);

        let body = get_json(state, "/status").await;
        assert_eq!(body["status"], "running");
        assert_eq!(body["service_running"], false);
        assert_eq!(body["exchange_statuses"]["binance"], "connected");
        assert_eq!(body["exchange_statuses"]["okx"], "auth_error");
    }

    #[tokio::test]
    async fn monitored_pairs_mirrors_configuration() {
        let state = test_state();
        let body = get_json(state.clone(), "/api/v1/monitored_pairs").await;
        for venue in &state.config.venues {
            let listed: Vec<String> = body[venue]
                .as_array()
                .unwrap()
                .iter()
                .map(|v| v.as_str().unwrap().to_string())
                .collect();
            assert_eq!(&listed, &state.config.symbols);
        }
    }

    #[tokio::test]
    async fn health_is_public_and_ok() {
        let body = get_json(test_state(), "/api/v1/health").await;
        assert_eq!(body["status"], "ok");
        assert!(body["server_time"].as_i64().unwrap() > 0);
    }
}
