// =============================================================================
// Venue Session Supervisor — one task per venue, one watcher per symbol
// =============================================================================
//
// Lifecycle per venue:
//
//   connecting → discovery → connected → (watchers run) → error → backoff →
//   connecting → ...
//                 ↘ auth_error | unsupported | no_pairs   (terminal, no retry)
//
// Discovery asks the adapter for capabilities and market metadata, filters
// the configured symbols down to what the venue actually lists, then spawns
// one book watcher per surviving symbol. The first watcher failure tears the
// whole session down: remaining watchers are aborted, the venue's books are
// cleared, and the supervisor sleeps an exponential backoff (1 s doubling to
// 60 s, reset on the next successful connect) before reconnecting.
//
// Failure taxonomy:
//   - Auth / Unsupported / no usable symbols → terminal status, exit forever.
//   - BadSymbol mid-stream → that symbol's book is dropped and its watcher
//     exits; the session keeps running on the remaining symbols.
//   - Everything else (transport, protocol, http) → transient, reconnect.
// =============================================================================

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::market_data::store::SnapshotStore;
use crate::types::VenueStatus;
use crate::venues::{BookStream, VenueAdapter, VenueError};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// How a single session attempt ended.
enum SessionEnd {
    /// The shutdown signal fired.
    Shutdown,
    /// Permanent configuration failure; the supervisor exits with this status.
    Terminal(VenueStatus),
    /// Something recoverable broke; reconnect after backoff.
    Transient(VenueError),
}

/// Supervisor for one venue's streaming session.
pub struct VenueSession {
    venue: String,
    symbols: Vec<String>,
    depth: usize,
    adapter: Option<Arc<dyn VenueAdapter>>,
    store: Arc<SnapshotStore>,
}

impl VenueSession {
    pub fn new(
        venue: String,
        symbols: Vec<String>,
        depth: usize,
        adapter: Option<Arc<dyn VenueAdapter>>,
        store: Arc<SnapshotStore>,
    ) -> Self {
        Self {
            venue,
            symbols,
            depth,
            adapter,
            store,
        }
    }

    /// Run until a terminal status is reached or the shutdown signal fires.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let Some(adapter) = self.adapter.clone() else {
            warn!(venue = %self.venue, "no adapter for configured venue");
            self.store.set_status(&self.venue, VenueStatus::Unsupported);
            return;
        };

        let mut backoff = INITIAL_BACKOFF;

        loop {
            if *shutdown.borrow() {
                self.mark_disconnected();
                return;
            }

            self.store.set_status(&self.venue, VenueStatus::Connecting);

            match self.run_once(&adapter, &mut shutdown, &mut backoff).await {
                SessionEnd::Shutdown => {
                    self.mark_disconnected();
                    return;
                }
                SessionEnd::Terminal(status) => {
                    warn!(venue = %self.venue, status = %status, "venue session ended permanently");
                    self.store.set_status(&self.venue, status);
                    return;
                }
                SessionEnd::Transient(err) => {
                    warn!(
                        venue = %self.venue,
                        error = %err,
                        backoff_secs = backoff.as_secs(),
                        "venue session failed, reconnecting after backoff"
                    );
                    // Clears this venue's books as a side effect.
                    self.store.set_status(&self.venue, VenueStatus::Error);

                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = shutdown.changed() => {
                            self.mark_disconnected();
                            return;
                        }
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }

    /// One connect → discover → subscribe → supervise cycle.
    async fn run_once(
        &self,
        adapter: &Arc<dyn VenueAdapter>,
        shutdown: &mut watch::Receiver<bool>,
        backoff: &mut Duration,
    ) -> SessionEnd {
        // ── Discovery ───────────────────────────────────────────────────
        let caps = match or_shutdown(shutdown, adapter.capabilities()).await {
            None => return SessionEnd::Shutdown,
            Some(Err(e)) => return classify(e),
            Some(Ok(caps)) => caps,
        };
        if !caps.supports_order_book_stream {
            return SessionEnd::Terminal(VenueStatus::Unsupported);
        }
        if caps.auth_required {
            // This service carries no credentials; a venue that demands them
            // can never be subscribed.
            return SessionEnd::Terminal(VenueStatus::AuthError);
        }

        let listed = match or_shutdown(shutdown, adapter.active_symbols()).await {
            None => return SessionEnd::Shutdown,
            Some(Err(e)) => return classify(e),
            Some(Ok(listed)) => listed,
        };

        let tracked: Vec<String> = self
            .symbols
            .iter()
            .filter(|s| listed.contains(*s))
            .cloned()
            .collect();
        if tracked.is_empty() {
            return SessionEnd::Terminal(VenueStatus::NoPairs);
        }
        info!(
            venue = %self.venue,
            tracked = ?tracked,
            "discovery complete, subscribing"
        );

        // ── Subscriptions ───────────────────────────────────────────────
        let mut watchers: JoinSet<Result<(), VenueError>> = JoinSet::new();

        for symbol in tracked {
            let sub = match or_shutdown(
                shutdown,
                adapter.subscribe_order_books(&symbol, self.depth),
            )
            .await
            {
                None => {
                    watchers.shutdown().await;
                    return SessionEnd::Shutdown;
                }
                Some(sub) => sub,
            };

            match sub {
                Ok(stream) => {
                    let venue = self.venue.clone();
                    let store = self.store.clone();
                    watchers.spawn(watch_books(venue, symbol, stream, store));
                }
                Err(VenueError::BadSymbol(s)) => {
                    warn!(venue = %self.venue, symbol = %s, "symbol rejected at subscribe, skipping");
                }
                Err(e) => {
                    watchers.shutdown().await;
                    return classify(e);
                }
            }
        }

        if watchers.is_empty() {
            return SessionEnd::Terminal(VenueStatus::NoPairs);
        }

        // Creates the venue's books row; watchers can write from here on.
        self.store.set_status(&self.venue, VenueStatus::Connected);
        *backoff = INITIAL_BACKOFF;
        info!(venue = %self.venue, watchers = watchers.len(), "venue session connected");

        // ── Supervision ─────────────────────────────────────────────────
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    watchers.shutdown().await;
                    return SessionEnd::Shutdown;
                }
                joined = watchers.join_next() => match joined {
                    // Every watcher has exited on its own (all symbols were
                    // invalidated mid-session). Recycle the session.
                    None => {
                        return SessionEnd::Transient(VenueError::Protocol(
                            "all symbol watchers exited".into(),
                        ));
                    }
                    // Per-symbol permanent failure already handled inside the
                    // watcher; the session keeps going.
                    Some(Ok(Ok(()))) => continue,
                    Some(Ok(Err(e))) => {
                        watchers.shutdown().await;
                        return classify(e);
                    }
                    Some(Err(join_err)) => {
                        if join_err.is_cancelled() {
                            continue;
                        }
                        error!(venue = %self.venue, error = %join_err, "book watcher panicked");
                        watchers.shutdown().await;
                        return SessionEnd::Transient(VenueError::Protocol(
                            "book watcher panicked".into(),
                        ));
                    }
                },
            }
        }
    }

    fn mark_disconnected(&self) {
        if !self
            .store
            .status_of(&self.venue)
            .is_some_and(|s| s.is_terminal())
        {
            self.store.set_status(&self.venue, VenueStatus::Disconnected);
        }
        info!(venue = %self.venue, "venue session stopped");
    }
}

/// Drive one (venue, symbol) subscription: validate each incoming book and
/// write it to the store.
///
/// Returns `Ok(())` when the symbol was permanently invalidated (the book has
/// been dropped and the session should keep going) and `Err` on anything that
/// should tear the session down.
async fn watch_books(
    venue: String,
    symbol: String,
    mut stream: BookStream,
    store: Arc<SnapshotStore>,
) -> Result<(), VenueError> {
    use futures_util::StreamExt;

    loop {
        match stream.next().await {
            Some(Ok(book)) => {
                if let Err(reason) = book.validate() {
                    warn!(venue = %venue, symbol = %symbol, %reason, "dropping invalid book update");
                    continue;
                }
                // A false return means the session row is already gone; the
                // supervisor is recycling us and the update is moot.
                store.put_book(&venue, &symbol, book);
            }
            Some(Err(VenueError::BadSymbol(s))) => {
                warn!(venue = %venue, symbol = %s, "symbol invalidated mid-stream, dropping");
                store.drop_book(&venue, &symbol);
                return Ok(());
            }
            Some(Err(e)) => return Err(e),
            None => {
                return Err(VenueError::Protocol(format!(
                    "order book stream for {symbol} ended"
                )));
            }
        }
    }
}

/// Terminal vs transient mapping for adapter errors.
fn classify(err: VenueError) -> SessionEnd {
    match err {
        VenueError::Auth(_) => SessionEnd::Terminal(VenueStatus::AuthError),
        VenueError::Unsupported => SessionEnd::Terminal(VenueStatus::Unsupported),
        other => SessionEnd::Transient(other),
    }
}

/// Await `fut`, bailing out with `None` if the shutdown signal fires first.
async fn or_shutdown<T>(
    shutdown: &mut watch::Receiver<bool>,
    fut: impl Future<Output = T>,
) -> Option<T> {
    tokio::select! {
        _ = shutdown.changed() => None,
        out = fut => Some(out),
    }
}
