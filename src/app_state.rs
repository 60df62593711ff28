// =============================================================================
// Central Application State — arb-radar
// =============================================================================
//
// Thin hub tying the subsystems together for the API layer. The subsystems
// manage their own interior mutability (the store and broker behind their own
// locks, the service behind atomics); AppState itself is immutable and shared
// as `Arc<AppState>`.
// =============================================================================

use std::sync::Arc;
use std::time::Instant;

use crate::broker::OpportunityBroker;
use crate::config::Config;
use crate::market_data::SnapshotStore;
use crate::service::ScannerService;

pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<SnapshotStore>,
    pub broker: Arc<OpportunityBroker>,
    pub service: Arc<ScannerService>,
    /// When the process came up. Used for uptime reporting.
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        store: Arc<SnapshotStore>,
        broker: Arc<OpportunityBroker>,
        service: Arc<ScannerService>,
    ) -> Self {
        Self {
            config,
            store,
            broker,
            service,
            start_time: Instant::now(),
        }
    }
}
