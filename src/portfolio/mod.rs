pub mod reservation;

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::EngineResult;
use crate::models::AssetBalance;
use crate::store::{keys, Store, StoreOp};

pub use reservation::ReservationError;

/// Per-asset `(free, used)` balances. Each asset is one field in the
/// `portfolio` hash, JSON-encoded, so a single get/set is one round-trip.
pub struct PortfolioStore<S: Store> {
    store: Arc<S>,
}

impl<S: Store> PortfolioStore<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn get(&self, asset: &str) -> EngineResult<AssetBalance> {
        match self.store.hash_get(keys::PORTFOLIO_HASH, asset).await? {
            Some(raw) => Ok(serde_json::from_str(&raw).map_err(crate::error::StoreError::from)?),
            None => Ok(AssetBalance::default()),
        }
    }

    pub async fn set(&self, asset: &str, balance: AssetBalance) -> EngineResult<()> {
        let raw = serde_json::to_string(&balance).map_err(crate::error::StoreError::from)?;
        self.store.hash_set(keys::PORTFOLIO_HASH, asset, &raw).await?;
        Ok(())
    }

    /// Writes several assets' balances in one pipelined batch, so a fill that
    /// touches both sides of a trade (base and quote) can't be observed with
    /// one side updated and the other not.
    pub async fn set_many(&self, updates: &[(&str, AssetBalance)]) -> EngineResult<()> {
        let mut ops = Vec::with_capacity(updates.len());
        for (asset, balance) in updates {
            let raw = serde_json::to_string(balance).map_err(crate::error::StoreError::from)?;
            ops.push(StoreOp::HashSet { key: keys::PORTFOLIO_HASH.to_string(), field: asset.to_string(), value: raw });
        }
        self.store.pipeline(ops).await?;
        Ok(())
    }

    pub async fn all(&self) -> EngineResult<HashMap<String, AssetBalance>> {
        let fields = self.store.hash_get_all(keys::PORTFOLIO_HASH).await?;
        let mut out = HashMap::with_capacity(fields.len());
        for (asset, raw) in fields {
            if let Ok(balance) = serde_json::from_str(&raw) {
                out.insert(asset, balance);
            }
        }
        Ok(out)
    }

    pub async fn clear(&self) -> EngineResult<()> {
        self.store.delete(keys::PORTFOLIO_HASH).await?;
        Ok(())
    }
}
