use serde::{Deserialize, Serialize};

/// A point-in-time snapshot of a symbol's quote, consumed (never produced)
/// by the engine. `bid`/`ask` default to `price` and volumes default to 0
/// when a producer omits them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingPair {
    pub symbol: String,
    pub price: f64,
    pub timestamp: f64,
    pub bid: f64,
    pub ask: f64,
    pub bid_volume: f64,
    pub ask_volume: f64,
}

impl TradingPair {
    pub fn new(symbol: impl Into<String>, price: f64, timestamp: f64) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            timestamp,
            bid: price,
            ask: price,
            bid_volume: 0.0,
            ask_volume: 0.0,
        }
    }
}
