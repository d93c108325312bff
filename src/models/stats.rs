use serde::{Deserialize, Serialize};

/// Trade counters for one `(side, base, quote)` bucket. `fee` is
/// denominated in the order's fee currency, which for this engine is always
/// the quote asset.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TradeStatBucket {
    pub count: u64,
    pub amount: f64,
    pub notional: f64,
    pub fee: f64,
}

/// A deposit or withdrawal account for one asset, valued in cash-asset
/// units at the time of the movement.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvestmentAccount {
    pub ref_symbol: String,
    pub asset_quantity: f64,
    pub ref_value: f64,
}
