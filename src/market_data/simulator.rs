// =============================================================================
// Price/Candle Simulator — one long-lived task per trading pair
// =============================================================================
//
// Two timers drive the pair:
//   - price tick (500 ms): random-walk the last price by up to ±0.2%, fold it
//     into the open candle, recompute the percent change, broadcast.
//   - candle check (1 s): when the live bucket has moved past the open
//     candle, close it into history and open a flat one at the last price,
//     broadcast.
//
// Both timers and the stop signal are polled from a single `select!`, so ticks
// for one pair never interleave. Each tick is one critical section on the
// pair's lock; the lock is released before any `.await`.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLockUpgradableReadGuard;
use rand::RngCore;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::market_data::bootstrap::generate_history;
use crate::market_data::broadcast::fan_out;
use crate::market_data::candle::{bucket_start, Candle};
use crate::market_data::entropy::Entropy;
use crate::market_data::instrument::InstrumentState;
use crate::runtime_config::SimConfig;

/// Largest fractional move per price tick (±0.2%).
const PRICE_STEP: f64 = 0.002;
/// Volume of a candle opened with no history to copy from.
const DEFAULT_VOLUME: f64 = 50.0;
/// Upper bound of per-tick and per-rollover volume jitter.
const SMALL_VOLUME: f64 = 20.0;

/// Timing knobs, lifted out of [`SimConfig`].
#[derive(Debug, Clone, Copy)]
pub struct SimulatorSettings {
    pub price_tick: Duration,
    pub candle_check: Duration,
    pub history_bucket_ms: i64,
    pub live_bucket_ms: i64,
}

impl From<&SimConfig> for SimulatorSettings {
    fn from(config: &SimConfig) -> Self {
        Self {
            price_tick: Duration::from_millis(config.price_tick_ms),
            candle_check: Duration::from_millis(config.candle_check_ms),
            history_bucket_ms: config.history_interval_secs as i64 * 1000,
            live_bucket_ms: config.live_interval_secs as i64 * 1000,
        }
    }
}

pub struct Simulator<R> {
    instrument: Arc<InstrumentState>,
    settings: SimulatorSettings,
    entropy: Entropy<R>,
}

impl<R: RngCore> Simulator<R> {
    pub fn new(
        instrument: Arc<InstrumentState>,
        settings: SimulatorSettings,
        entropy: Entropy<R>,
    ) -> Self {
        Self {
            instrument,
            settings,
            entropy,
        }
    }

    /// Make sure the pair has history and an open candle.
    ///
    /// The open candle starts as a copy of the newest closed candle; with no
    /// history at all it is a flat candle at the last price in the current
    /// live bucket.
    pub fn setup(&mut self, now_ms: i64) {
        let needs_history = self.instrument.read().history.is_empty();
        if needs_history {
            info!(symbol = %self.instrument.symbol(), "generating initial candle data in simulator");
            generate_history(
                &self.instrument,
                now_ms,
                self.settings.history_bucket_ms,
                &mut self.entropy,
            );
        }

        let mut state = self.instrument.write();
        if state.current.is_none() {
            let seeded = state.history.last().copied().unwrap_or_else(|| {
                Candle::flat(
                    bucket_start(now_ms, self.settings.live_bucket_ms),
                    state.last_price,
                    DEFAULT_VOLUME,
                )
            });
            state.last_price = seeded.close;
            state.current = Some(seeded);
        }
    }

    /// Random-walk the price and fold it into the open candle.
    pub fn price_tick(&mut self, now_ms: i64) {
        let step = self.entropy.between(-PRICE_STEP, PRICE_STEP);
        let volume = self.entropy.unit() * SMALL_VOLUME;

        let mut state = self.instrument.write();
        let price = state.last_price * (1.0 + step);
        state.last_price = price;

        let live_bucket = bucket_start(now_ms, self.settings.live_bucket_ms);
        let candle = state
            .current
            .get_or_insert_with(|| Candle::flat(live_bucket, price, DEFAULT_VOLUME));
        candle.absorb(price);
        candle.volume += volume;
        debug_assert!(candle.is_well_formed(), "tick broke candle envelope: {candle:?}");

        state.refresh_price_change();
    }

    /// Roll the open candle over if the live bucket has advanced past it.
    /// Returns `true` when a rollover happened.
    pub fn candle_check(&mut self, now_ms: i64) -> bool {
        let bucket = bucket_start(now_ms, self.settings.live_bucket_ms);

        let state = self.instrument.upgradable_read();
        let current = match state.current {
            Some(c) if bucket <= c.time => return false,
            other => other,
        };

        let seed_volume = DEFAULT_VOLUME + self.entropy.unit() * SMALL_VOLUME;
        let mut state = RwLockUpgradableReadGuard::upgrade(state);

        if let Some(closed) = current {
            if state.history.push(closed) {
                info!(
                    symbol = %self.instrument.symbol(),
                    time = closed.time,
                    history = state.history.len(),
                    "created new candle for pair"
                );
            } else {
                debug!(symbol = %self.instrument.symbol(), time = closed.time, "open candle not newer than history, skipped");
            }
        }

        let price = state.last_price;
        state.current = Some(Candle::flat(bucket, price, seed_volume));
        true
    }

    /// Drive the pair until its stop signal fires.
    pub async fn run(mut self) {
        let mut stop = self.instrument.stop_signal();
        if self.instrument.is_stopped() {
            return;
        }

        self.setup(Utc::now().timestamp_millis());

        let start = Instant::now();
        let mut price_timer = interval_at(start + self.settings.price_tick, self.settings.price_tick);
        let mut candle_timer =
            interval_at(start + self.settings.candle_check, self.settings.candle_check);
        price_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        candle_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(symbol = %self.instrument.symbol(), "simulator started");

        loop {
            tokio::select! {
                biased;

                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }

                _ = price_timer.tick() => {
                    self.price_tick(Utc::now().timestamp_millis());
                    fan_out(&self.instrument);
                }

                _ = candle_timer.tick() => {
                    if self.candle_check(Utc::now().timestamp_millis()) {
                        fan_out(&self.instrument);
                    }
                }
            }
        }

        info!(symbol = %self.instrument.symbol(), "simulator stopped");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
