use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// A single OHLCV candle. `time` is the bucket start in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// A candle whose open, high, low and close all sit at `price`.
    pub fn flat(time: i64, price: f64, volume: f64) -> Self {
        Self {
            time,
            open: price,
            high: price,
            low: price,
            close: price,
            volume,
        }
    }

    /// Fold a new trade price into the candle: widen the envelope and move
    /// the close.
    pub fn absorb(&mut self, price: f64) {
        if price > self.high {
            self.high = price;
        }
        if price < self.low {
            self.low = price;
        }
        self.close = price;
    }

    /// `low <= min(open, close)` and `high >= max(open, close)`.
    pub fn is_well_formed(&self) -> bool {
        self.low <= self.open.min(self.close) && self.high >= self.open.max(self.close)
    }
}

/// Floor `ts_ms` to the start of its `bucket_ms`-wide bucket.
pub fn bucket_start(ts_ms: i64, bucket_ms: i64) -> i64 {
    ts_ms - ts_ms.rem_euclid(bucket_ms)
}

// ---------------------------------------------------------------------------
// CandleHistory -- bounded ring of closed candles
// ---------------------------------------------------------------------------

/// Closed candles, oldest-first, capped at `capacity`. Timestamps are strictly
/// increasing; a push that would break that ordering is refused.
#[derive(Debug, Clone)]
pub struct CandleHistory {
    ring: VecDeque<Candle>,
    capacity: usize,
}

impl CandleHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Append a closed candle and trim the oldest entries back to capacity.
    ///
    /// Returns `false` (and leaves the ring untouched) when the candle is not
    /// newer than the current last entry.
    pub fn push(&mut self, candle: Candle) -> bool {
        if let Some(last) = self.ring.back() {
            if candle.time <= last.time {
                return false;
            }
        }
        self.ring.push_back(candle);
        while self.ring.len() > self.capacity {
            self.ring.pop_front();
        }
        true
    }

    /// Replace the whole ring. Only the newest `capacity` candles are kept.
    pub fn replace(&mut self, candles: Vec<Candle>) {
        let skip = candles.len().saturating_sub(self.capacity);
        self.ring = candles.into_iter().skip(skip).collect();
    }

    pub fn first(&self) -> Option<&Candle> {
        self.ring.front()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.ring.back()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Owned copy of every candle, oldest-first.
    pub fn to_vec(&self) -> Vec<Candle> {
        self.ring.iter().copied().collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
