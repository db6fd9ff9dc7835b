// =============================================================================
// Broadcast Fan-out — push the current pair summary to every subscriber
// =============================================================================
//
// The payload is serialised once under a shared (upgradable) read lock and
// offered to each subscriber. Sends are non-blocking, so a slow endpoint
// costs nothing beyond its failed `try_send`. Endpoints that fail are closed
// and removed after upgrading the same guard, which keeps the removal
// serialised with concurrent subscribe/unsubscribe calls.
// =============================================================================

use parking_lot::RwLockUpgradableReadGuard;
use tracing::{debug, error, warn};

use crate::market_data::instrument::{build_live_update, InstrumentState, SubscriberId};

/// Outcome of one fan-out pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FanOutReport {
    pub delivered: usize,
    pub dropped: usize,
}

/// Deliver the instrument's live update to all subscribers, pruning the ones
/// that fail.
pub fn fan_out(instrument: &InstrumentState) -> FanOutReport {
    let state = instrument.upgradable_read();
    if state.subscribers.is_empty() {
        return FanOutReport::default();
    }

    let update = build_live_update(instrument.symbol(), &state);
    let payload = match serde_json::to_string(&update) {
        Ok(json) => json,
        Err(e) => {
            error!(symbol = %instrument.symbol(), error = %e, "failed to serialise live update");
            return FanOutReport::default();
        }
    };

    let mut report = FanOutReport::default();
    let mut failed: Vec<SubscriberId> = Vec::new();
    for (id, subscriber) in state.subscribers.iter() {
        match subscriber.send(&payload) {
            Ok(()) => report.delivered += 1,
            Err(e) => {
                warn!(symbol = %instrument.symbol(), subscriber = %id, error = %e, "error sending update to subscriber");
                failed.push(*id);
            }
        }
    }

    if failed.is_empty() {
        return report;
    }

    let mut state = RwLockUpgradableReadGuard::upgrade(state);
    for id in failed {
        if let Some(subscriber) = state.subscribers.remove(&id) {
            subscriber.close();
            report.dropped += 1;
        }
    }
    debug!(
        symbol = %instrument.symbol(),
        dropped = report.dropped,
        remaining = state.subscribers.len(),
        "pruned dead subscribers"
    );

    report
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
