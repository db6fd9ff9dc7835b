// =============================================================================
// Runtime Configuration — simulator and server settings
// =============================================================================
//
// Loaded once at startup from a JSON file. All fields carry `#[serde(default)]`
// so a partial (or empty) file still produces a complete configuration, and a
// missing file falls back to the defaults below.
//
// Environment overrides (applied after the file):
//   CANDLE_SIM_BIND_ADDR   listen address, e.g. 127.0.0.1:9000
//   CANDLE_SIM_PAIRS       SYMBOL:PRICE list, e.g. BTCUSDT:95000,ETHUSDT:3500
//   CANDLE_SIM_SEED        u64 seed for a reproducible simulation
// =============================================================================

use std::collections::HashSet;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_pairs() -> Vec<PairSeed> {
    [
        ("BTCUSDT", 95_000.0),
        ("ETHUSDT", 3_500.0),
        ("SOLUSDT", 180.0),
        ("BNBUSDT", 600.0),
        ("XRPUSDT", 0.55),
    ]
    .into_iter()
    .map(|(symbol, seed_price)| PairSeed {
        symbol: symbol.to_string(),
        seed_price,
    })
    .collect()
}

fn default_history_len() -> usize {
    288
}

fn default_history_interval_secs() -> u64 {
    300
}

fn default_live_interval_secs() -> u64 {
    10
}

fn default_price_tick_ms() -> u64 {
    500
}

fn default_candle_check_ms() -> u64 {
    1_000
}

fn default_subscriber_buffer() -> usize {
    64
}

fn default_shutdown_grace_secs() -> u64 {
    5
}

// =============================================================================
// PairSeed
// =============================================================================

/// A trading pair created at startup and the price it starts from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairSeed {
    pub symbol: String,
    pub seed_price: f64,
}

impl PairSeed {
    /// Parse `SYMBOL:PRICE`.
    fn parse(raw: &str) -> Result<Self> {
        let (symbol, price) = raw
            .split_once(':')
            .with_context(|| format!("pair '{raw}' is not SYMBOL:PRICE"))?;
        let seed_price: f64 = price
            .trim()
            .parse()
            .with_context(|| format!("invalid seed price in '{raw}'"))?;
        Ok(Self {
            symbol: symbol.trim().to_uppercase(),
            seed_price,
        })
    }
}

// =============================================================================
// SimConfig
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    /// Address the HTTP/WebSocket server binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Pairs to simulate, in listing order.
    #[serde(default = "default_pairs")]
    pub pairs: Vec<PairSeed>,

    /// Closed candles retained per pair (288 five-minute candles = 24 h).
    #[serde(default = "default_history_len")]
    pub history_len: usize,

    /// Bucket width of the bootstrapped history.
    #[serde(default = "default_history_interval_secs")]
    pub history_interval_secs: u64,

    /// Bucket width of candles formed by the live simulation. Deliberately
    /// finer than the history so rollovers are visible in a demo.
    #[serde(default = "default_live_interval_secs")]
    pub live_interval_secs: u64,

    #[serde(default = "default_price_tick_ms")]
    pub price_tick_ms: u64,

    #[serde(default = "default_candle_check_ms")]
    pub candle_check_ms: u64,

    /// Pending pushes a WebSocket subscriber may queue before it is dropped.
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,

    /// Time allowed for simulators and connections to wind down on shutdown.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,

    /// Seed for a reproducible run. `None` draws from the OS.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            pairs: default_pairs(),
            history_len: default_history_len(),
            history_interval_secs: default_history_interval_secs(),
            live_interval_secs: default_live_interval_secs(),
            price_tick_ms: default_price_tick_ms(),
            candle_check_ms: default_candle_check_ms(),
            subscriber_buffer: default_subscriber_buffer(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            seed: None,
        }
    }
}

impl SimConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;

        info!(
            path = %path.display(),
            pairs = config.pairs.len(),
            "config loaded"
        );

        Ok(config)
    }

    /// Apply the `CANDLE_SIM_*` environment overrides that are set.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("CANDLE_SIM_BIND_ADDR") {
            if !addr.trim().is_empty() {
                self.bind_addr = addr.trim().to_string();
            }
        }
        if let Ok(raw) = std::env::var("CANDLE_SIM_PAIRS") {
            self.pairs = parse_pairs(&raw)?;
        }
        if let Ok(raw) = std::env::var("CANDLE_SIM_SEED") {
            let seed = raw
                .trim()
                .parse()
                .with_context(|| format!("invalid CANDLE_SIM_SEED '{raw}'"))?;
            self.seed = Some(seed);
        }
        Ok(())
    }

    /// Reject configurations the simulator cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.pairs.is_empty() {
            bail!("no trading pairs configured");
        }

        let mut seen = HashSet::new();
        for pair in &self.pairs {
            if pair.symbol.is_empty() {
                bail!("empty trading pair symbol");
            }
            if !seen.insert(pair.symbol.as_str()) {
                bail!("duplicate trading pair {}", pair.symbol);
            }
            if !pair.seed_price.is_finite() || pair.seed_price <= 0.0 {
                bail!("seed price for {} must be positive, got {}", pair.symbol, pair.seed_price);
            }
        }

        if self.history_len == 0 {
            bail!("history_len must be at least 1");
        }
        if self.history_interval_secs == 0 || self.live_interval_secs == 0 {
            bail!("candle intervals must be non-zero");
        }
        if self.price_tick_ms == 0 || self.candle_check_ms == 0 {
            bail!("tick periods must be non-zero");
        }
        if self.subscriber_buffer == 0 {
            bail!("subscriber_buffer must be at least 1");
        }
        Ok(())
    }
}

/// Parse a comma-separated `SYMBOL:PRICE` list, skipping blank entries.
pub fn parse_pairs(raw: &str) -> Result<Vec<PairSeed>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PairSeed::parse)
        .collect()
}
