// =============================================================================
// Instrument State — one simulated trading pair
// =============================================================================
//
// Every mutable field of a pair lives behind a single parking_lot RwLock.
// Readers copy what they need out of the guard before releasing it; nothing
// hands out references into the ring or the subscriber map.
//
// The lock is never held across an `.await`. Subscriber sends are
// non-blocking (see `Subscriber::send`), so the fan-out may deliver while
// holding the lock without stalling the simulator.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockUpgradableReadGuard, RwLockWriteGuard};
use tokio::sync::watch;
use tracing::info;
use uuid::Uuid;

use crate::error::CoreError;
use crate::market_data::candle::{Candle, CandleHistory};
use crate::types::{LiveUpdate, PairSummary};

// ---------------------------------------------------------------------------
// Subscriber endpoints
// ---------------------------------------------------------------------------

/// Opaque handle identifying one subscriber endpoint.
pub type SubscriberId = Uuid;

/// An output endpoint for live updates.
///
/// The instrument only tracks membership. Connection lifecycle belongs to
/// whoever created the endpoint.
pub trait Subscriber: Send + Sync {
    fn id(&self) -> SubscriberId;

    /// Queue `payload` for delivery. Must not block. An error means the
    /// endpoint is dead or hopelessly behind and will be dropped.
    fn send(&self, payload: &str) -> Result<(), CoreError>;

    /// Tell the endpoint's owner to shut the connection down.
    fn close(&self);
}

// ---------------------------------------------------------------------------
// Lock-protected market state
// ---------------------------------------------------------------------------

pub struct MarketState {
    pub last_price: f64,
    pub price_change: f64,
    pub history: CandleHistory,
    /// Open candle for the bucket in progress. `None` until the simulator
    /// initialises it.
    pub current: Option<Candle>,
    pub subscribers: HashMap<SubscriberId, Arc<dyn Subscriber>>,
}

impl MarketState {
    /// Recompute `price_change` against the oldest retained candle.
    pub fn refresh_price_change(&mut self) {
        if let Some(first) = self.history.first() {
            if first.open > 0.0 {
                self.price_change = (self.last_price / first.open - 1.0) * 100.0;
            }
        }
    }

    /// The candle shown to clients: the open candle, else the newest closed
    /// one, else a flat placeholder at the last price.
    pub fn live_candle(&self) -> Candle {
        self.current
            .or_else(|| self.history.last().copied())
            .unwrap_or_else(|| Candle::flat(0, self.last_price, 0.0))
    }
}

// ---------------------------------------------------------------------------
// InstrumentState
// ---------------------------------------------------------------------------

pub struct InstrumentState {
    symbol: String,
    state: RwLock<MarketState>,
    stop_tx: watch::Sender<bool>,
}

impl InstrumentState {
    pub fn new(symbol: impl Into<String>, seed_price: f64, history_len: usize) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            symbol: symbol.into(),
            state: RwLock::new(MarketState {
                last_price: seed_price,
                price_change: 0.0,
                history: CandleHistory::new(history_len),
                current: None,
                subscribers: HashMap::new(),
            }),
            stop_tx,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    // ── Lock access ─────────────────────────────────────────────────────

    pub fn read(&self) -> RwLockReadGuard<'_, MarketState> {
        self.state.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, MarketState> {
        self.state.write()
    }

    /// Shared access that can later be upgraded to exclusive without
    /// letting a writer in between.
    pub fn upgradable_read(&self) -> RwLockUpgradableReadGuard<'_, MarketState> {
        self.state.upgradable_read()
    }

    // ── Snapshots ───────────────────────────────────────────────────────

    pub fn history(&self) -> Vec<Candle> {
        self.state.read().history.to_vec()
    }

    pub fn summary(&self) -> PairSummary {
        let state = self.state.read();
        PairSummary {
            symbol: self.symbol.clone(),
            last_price: state.last_price,
            price_change: state.price_change,
        }
    }

    pub fn live_update(&self) -> LiveUpdate {
        build_live_update(&self.symbol, &self.state.read())
    }

    #[cfg(test)]
    pub fn last_price(&self) -> f64 {
        self.state.read().last_price
    }

    // ── Subscribers ─────────────────────────────────────────────────────

    /// Add `subscriber`. Re-adding an id already present keeps one
    /// membership.
    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber>) {
        let mut state = self.state.write();
        state.subscribers.insert(subscriber.id(), subscriber);
        info!(symbol = %self.symbol, total_subscribers = state.subscribers.len(), "added subscriber");
    }

    /// Remove `id`. Removing a non-member is a no-op.
    pub fn unsubscribe(&self, id: SubscriberId) {
        let mut state = self.state.write();
        if state.subscribers.remove(&id).is_some() {
            info!(symbol = %self.symbol, remaining_subscribers = state.subscribers.len(), "removed subscriber");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.read().subscribers.len()
    }

    /// Close and forget every subscriber.
    pub fn close_subscribers(&self) {
        let drained: Vec<_> = self.state.write().subscribers.drain().map(|(_, s)| s).collect();
        for subscriber in drained {
            subscriber.close();
        }
    }

    // ── Cancellation ────────────────────────────────────────────────────

    pub fn stop_signal(&self) -> watch::Receiver<bool> {
        self.stop_tx.subscribe()
    }

    /// Ask the simulator to exit at its next tick boundary.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop_tx.borrow()
    }
}

pub fn build_live_update(symbol: &str, state: &MarketState) -> LiveUpdate {
    LiveUpdate {
        symbol: symbol.to_string(),
        last_price: state.last_price,
        price_change: state.price_change,
        last_candle: state.live_candle(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
