// =============================================================================
// Wire payloads shared by the REST routes and the live channel
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::market_data::Candle;

/// One entry of `GET /api/pairs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairSummary {
    pub symbol: String,
    pub last_price: f64,
    /// Percent change against the oldest retained candle's open.
    pub price_change: f64,
}

/// Push sent to every subscriber of a symbol after each mutating tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveUpdate {
    pub symbol: String,
    pub last_price: f64,
    pub price_change: f64,
    pub last_candle: Candle,
}
