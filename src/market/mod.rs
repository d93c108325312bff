use std::sync::Arc;

use crate::error::{EngineError, EngineResult};
use crate::models::TradingPair;
use crate::store::{keys, Store, StoreOp};

/// Read-mostly ticker feed. Grounded on `market.py`: a malformed ticker
/// blob is logged once and treated as absent rather than surfaced as an
/// error, so a bad write from an external producer never wedges a tick.
pub struct MarketStore<S: Store> {
    store: Arc<S>,
}

impl<S: Store> MarketStore<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn tickers(&self) -> EngineResult<Vec<String>> {
        let keys = self.store.scan_keys(keys::TICKER_PREFIX).await?;
        Ok(keys.into_iter().map(|k| k.trim_start_matches(keys::TICKER_PREFIX).to_string()).collect())
    }

    pub async fn fetch_ticker(&self, symbol: &str) -> EngineResult<Option<TradingPair>> {
        let key = keys::ticker(symbol);
        let fields = self.store.hash_get_all(&key).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        let map: std::collections::HashMap<String, String> = fields.into_iter().collect();

        let price = match map.get("price").and_then(|v| v.parse::<f64>().ok()) {
            Some(p) => p,
            None => {
                tracing::warn!(symbol, "malformed ticker: missing or invalid price, treating as absent");
                return Ok(None);
            }
        };
        let timestamp = map.get("timestamp").and_then(|v| v.parse::<f64>().ok()).unwrap_or(0.0);

        Ok(Some(TradingPair {
            symbol: symbol.to_string(),
            price,
            timestamp,
            bid: map.get("bid").and_then(|v| v.parse().ok()).unwrap_or(price),
            ask: map.get("ask").and_then(|v| v.parse().ok()).unwrap_or(price),
            bid_volume: map.get("bidVolume").and_then(|v| v.parse().ok()).unwrap_or(0.0),
            ask_volume: map.get("askVolume").and_then(|v| v.parse().ok()).unwrap_or(0.0),
        }))
    }

    pub async fn last_price(&self, symbol: &str) -> EngineResult<f64> {
        self.fetch_ticker(symbol)
            .await?
            .map(|p| p.price)
            .ok_or_else(|| EngineError::not_found(format!("ticker {symbol} not available")))
    }

    pub async fn set_last_price(&self, pair: &TradingPair) -> EngineResult<()> {
        if pair.symbol.is_empty() {
            return Err(EngineError::validation("trading pair must have a symbol"));
        }
        let key = keys::ticker(&pair.symbol);
        let field = |field: &str, value: String| StoreOp::HashSet { key: key.clone(), field: field.to_string(), value };
        let ops = vec![
            field("symbol", pair.symbol.clone()),
            field("price", pair.price.to_string()),
            field("timestamp", pair.timestamp.to_string()),
            field("bid", pair.bid.to_string()),
            field("ask", pair.ask.to_string()),
            field("bidVolume", pair.bid_volume.to_string()),
            field("askVolume", pair.ask_volume.to_string()),
        ];
        self.store.pipeline(ops).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn absent_ticker_returns_none() {
        let market = MarketStore::new(Arc::new(MemoryStore::new()));
        assert!(market.fetch_ticker("BTC/USDT").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn malformed_price_is_treated_as_absent() {
        let store = Arc::new(MemoryStore::new());
        store.hash_set("sym_BTC/USDT", "price", "not-a-number").await.unwrap();
        let market = MarketStore::new(store);
        assert!(market.fetch_ticker("BTC/USDT").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_then_fetch_round_trips() {
        let market = MarketStore::new(Arc::new(MemoryStore::new()));
        let pair = TradingPair::new("BTC/USDT", 50000.0, 1700000000.0);
        market.set_last_price(&pair).await.unwrap();
        let fetched = market.fetch_ticker("BTC/USDT").await.unwrap().unwrap();
        assert_eq!(fetched.price, 50000.0);
        assert_eq!(fetched.bid, 50000.0);
        assert_eq!(fetched.ask_volume, 0.0);
    }
}
