use thiserror::Error;

use crate::error::EngineResult;
use crate::store::Store;

use super::PortfolioStore;

#[derive(Debug, Error)]
#[error("insufficient funds: need {needed} {asset}, have {available} free")]
pub struct ReservationError {
    pub asset: String,
    pub needed: f64,
    pub available: f64,
}

impl<S: Store> PortfolioStore<S> {
    /// Move `qty` from `free` to `used`. Grounded on `_reserve` in
    /// `engine_actors.py`.
    pub async fn reserve(&self, asset: &str, qty: f64) -> EngineResult<Result<(), ReservationError>> {
        let mut bal = self.get(asset).await?;
        if bal.free < qty {
            return Ok(Err(ReservationError {
                asset: asset.to_string(),
                needed: qty,
                available: bal.free,
            }));
        }
        bal.free -= qty;
        bal.used += qty;
        self.set(asset, bal).await?;
        Ok(Ok(()))
    }

    /// Move `min(qty, used)` from `used` back to `free`, dust-clamping the
    /// remainder. Returns the amount actually released.
    pub async fn release(&self, asset: &str, qty: f64) -> EngineResult<f64> {
        let mut bal = self.get(asset).await?;
        let released = qty.min(bal.used);
        bal.used -= released;
        bal.free += released;
        bal.clamp_dust();
        self.set(asset, bal).await?;
        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AssetBalance;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn reserve_moves_free_to_used() {
        let pf = PortfolioStore::new(Arc::new(MemoryStore::new()));
        pf.set("USDT", AssetBalance::new(100.0, 0.0)).await.unwrap();
        pf.reserve("USDT", 40.0).await.unwrap().unwrap();
        let bal = pf.get("USDT").await.unwrap();
        assert_eq!(bal.free, 60.0);
        assert_eq!(bal.used, 40.0);
    }

    #[tokio::test]
    async fn reserve_fails_when_insufficient() {
        let pf = PortfolioStore::new(Arc::new(MemoryStore::new()));
        pf.set("USDT", AssetBalance::new(10.0, 0.0)).await.unwrap();
        let err = pf.reserve("USDT", 40.0).await.unwrap().unwrap_err();
        assert_eq!(err.available, 10.0);
    }

    #[tokio::test]
    async fn release_clamps_dust() {
        let pf = PortfolioStore::new(Arc::new(MemoryStore::new()));
        pf.set("USDT", AssetBalance::new(1_000_000.0, 1e-8)).await.unwrap();
        pf.release("USDT", 1e-9).await.unwrap();
        let bal = pf.get("USDT").await.unwrap();
        assert_eq!(bal.used, 0.0);
    }
}
