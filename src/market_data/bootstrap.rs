// =============================================================================
// Candle History Bootstrap — synthetic past for a freshly created pair
// =============================================================================
//
// Produces `history_len` candles ending at the most recent completed bucket
// boundary. The base price starts at 95% of the seed and random-walks by up
// to ±2% per bucket; each candle is jittered around the base.
// =============================================================================

use rand::RngCore;
use tracing::{debug, info};

use crate::market_data::candle::{bucket_start, Candle};
use crate::market_data::entropy::Entropy;
use crate::market_data::instrument::InstrumentState;

const BASE_PRICE_FACTOR: f64 = 0.95;
const WALK_STEP: f64 = 0.02;
const OPEN_CLOSE_BASE: f64 = 0.995;
const OPEN_CLOSE_RANGE: f64 = 0.01;
const HIGH_RANGE: f64 = 0.005;
const LOW_BASE: f64 = 0.995;
const LOW_RANGE: f64 = 0.005;
const MIN_VOLUME: f64 = 50.0;
const MAX_VOLUME: f64 = 200.0;

/// Build `count` candles of `bucket_ms` width whose last bucket ends at the
/// bucket boundary at or before `now_ms`.
pub fn synthesize<R: RngCore>(
    seed_price: f64,
    now_ms: i64,
    bucket_ms: i64,
    count: usize,
    entropy: &mut Entropy<R>,
) -> Vec<Candle> {
    let boundary = bucket_start(now_ms, bucket_ms);
    let start = boundary - count as i64 * bucket_ms;
    let mut base = seed_price * BASE_PRICE_FACTOR;
    let mut candles = Vec::with_capacity(count);

    for i in 0..count {
        base += base * entropy.between(-WALK_STEP, WALK_STEP);

        let open = base * (OPEN_CLOSE_BASE + entropy.unit() * OPEN_CLOSE_RANGE);
        let close = base * (OPEN_CLOSE_BASE + entropy.unit() * OPEN_CLOSE_RANGE);
        let high = open.max(close) * (1.0 + entropy.unit() * HIGH_RANGE);
        let low = open.min(close) * (LOW_BASE - entropy.unit() * LOW_RANGE);
        let volume = entropy.between(MIN_VOLUME, MAX_VOLUME);

        let mut candle = Candle {
            time: start + i as i64 * bucket_ms,
            open,
            high,
            low,
            close,
            volume,
        };
        if clamp_envelope(&mut candle) {
            debug!(time = candle.time, "clamped generated candle envelope");
        }
        debug_assert!(candle.is_well_formed());
        candles.push(candle);
    }

    candles
}

/// Force `low <= min(open, close)` and `high >= max(open, close)`.
///
/// The low multiplier is at most 0.995 so positive prices satisfy this
/// already; the clamp makes the guarantee explicit rather than incidental.
/// Returns `true` if anything changed.
pub fn clamp_envelope(candle: &mut Candle) -> bool {
    let floor = candle.open.min(candle.close);
    let ceiling = candle.open.max(candle.close);
    let mut clamped = false;
    if candle.low > floor {
        candle.low = floor;
        clamped = true;
    }
    if candle.high < ceiling {
        candle.high = ceiling;
        clamped = true;
    }
    clamped
}

/// Replace `instrument`'s history with a synthetic one and move its last price
/// to the final close. The open candle is reset; the simulator re-seeds it.
///
/// Holds the instrument's write lock for the whole generation.
pub fn generate_history<R: RngCore>(
    instrument: &InstrumentState,
    now_ms: i64,
    bucket_ms: i64,
    entropy: &mut Entropy<R>,
) -> usize {
    let mut state = instrument.write();
    let count = state.history.capacity();
    let candles = synthesize(state.last_price, now_ms, bucket_ms, count, entropy);

    if let Some(last) = candles.last() {
        state.last_price = last.close;
    }
    state.history.replace(candles);
    state.current = None;
    state.refresh_price_change();

    let generated = state.history.len();
    drop(state);

    info!(symbol = %instrument.symbol(), count = generated, "generated candles");
    generated
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    const FIVE_MIN_MS: i64 = 300_000;
    const DAY_MS: i64 = 24 * 60 * 60 * 1000;
    const NOW_MS: i64 = 1_700_000_123_456;

    #[test]
    fn btc_history_spans_last_day() {
        let instrument = InstrumentState::new("BTCUSDT", 95_000.0, 288);
        let mut entropy = Entropy::seeded(1);
        let count = generate_history(&instrument, NOW_MS, FIVE_MIN_MS, &mut entropy);
        assert_eq!(count, 288);

        let history = instrument.history();
        assert_eq!(history.len(), 288);

        let boundary = bucket_start(NOW_MS, FIVE_MIN_MS);
        assert_eq!(history[0].time, boundary - DAY_MS);
        assert_eq!(history[287].time, boundary - FIVE_MIN_MS);
        for pair in history.windows(2) {
            assert_eq!(pair[1].time - pair[0].time, FIVE_MIN_MS);
        }

        assert_eq!(instrument.last_price(), history[287].close);
    }

    #[test]
    fn generation_resets_open_candle() {
        let instrument = InstrumentState::new("ETHUSDT", 3500.0, 288);
        instrument.write().current = Some(Candle::flat(0, 1.0, 1.0));
        generate_history(&instrument, NOW_MS, FIVE_MIN_MS, &mut Entropy::seeded(2));
        assert!(instrument.read().current.is_none());
    }

    #[test]
    fn price_change_baseline_is_first_open() {
        let instrument = InstrumentState::new("SOLUSDT", 180.0, 288);
        generate_history(&instrument, NOW_MS, FIVE_MIN_MS, &mut Entropy::seeded(3));
        let state = instrument.read();
        let first_open = state.history.first().map(|c| c.open).unwrap();
        let expected = (state.last_price / first_open - 1.0) * 100.0;
        assert!((state.price_change - expected).abs() < 1e-9);
    }

    #[test]
    fn clamp_fixes_inverted_envelope() {
        let mut candle = Candle {
            time: 0,
            open: 10.0,
            high: 9.0,
            low: 11.0,
            close: 10.5,
            volume: 1.0,
        };
        assert!(clamp_envelope(&mut candle));
        assert_eq!(candle.low, 10.0);
        assert_eq!(candle.high, 10.5);
        assert!(!clamp_envelope(&mut candle));
    }

    proptest! {
        #[test]
        fn generated_candles_respect_envelope(
            seed in any::<u64>(),
            price in 0.0001f64..500_000.0,
        ) {
            let mut entropy = Entropy::seeded(seed);
            let candles = synthesize(price, NOW_MS, FIVE_MIN_MS, 288, &mut entropy);
            prop_assert_eq!(candles.len(), 288);
            for candle in &candles {
                prop_assert!(candle.is_well_formed(), "bad candle: {:?}", candle);
                prop_assert!(candle.low > 0.0);
                prop_assert!((50.0..200.0).contains(&candle.volume));
            }
        }
    }
}
