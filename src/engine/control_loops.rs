use std::sync::Arc;
use std::time::Duration;

use crate::config::EngineConfig;
use crate::market::MarketStore;
use crate::store::{keys, Store};

use super::dispatcher::DispatcherHandle;

/// `SET key val NX EX ttl`-style leader lock. A non-holder simply skips the
/// loop body for that tick; the holder refreshes before its TTL lapses.
/// Grounded on §4.9/§5's leader-election design note.
pub struct LeaderLock<S: Store> {
    store: Arc<S>,
    holder_id: String,
    ttl: Duration,
}

impl<S: Store> LeaderLock<S> {
    pub fn new(store: Arc<S>, holder_id: impl Into<String>, ttl: Duration) -> Self {
        Self { store, holder_id: holder_id.into(), ttl }
    }

    /// Best-effort acquire-or-refresh: claims the lock if unheld or already
    /// held by this instance. `MemoryStore`/`RedisStore` both expose this
    /// through the same hash-field primitive, trading strict atomicity for
    /// simplicity (acceptable per §5: the audit loop is the drift backstop).
    pub async fn try_acquire(&self) -> bool {
        let current = self.store.hash_get(keys::LEADER_LOCK, "holder").await.ok().flatten();
        let now = chrono::Utc::now().timestamp();
        let expiry: i64 = self
            .store
            .hash_get(keys::LEADER_LOCK, "expires_at")
            .await
            .ok()
            .flatten()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        let free_to_claim = current.as_deref() != Some(&self.holder_id) && expiry < now;
        let already_ours = current.as_deref() == Some(&self.holder_id);
        if !free_to_claim && !already_ours {
            return false;
        }
        let new_expiry = now + self.ttl.as_secs() as i64;
        let _ = self.store.hash_set(keys::LEADER_LOCK, "holder", &self.holder_id).await;
        let _ = self.store.hash_set(keys::LEADER_LOCK, "expires_at", &new_expiry.to_string()).await;
        true
    }
}

/// Tick loop: enumerate symbols, drive each through `process_price_tick`.
/// If one iteration overruns its period, the next sleep is skipped rather
/// than stacking delay.
pub async fn run_tick_loop<S: Store + 'static>(dispatcher: DispatcherHandle, market: Arc<MarketStore<S>>, lock: Arc<LeaderLock<S>>, config: EngineConfig) {
    let period = Duration::from_secs(config.tick_period.max(1));
    loop {
        let started = tokio::time::Instant::now();
        if lock.try_acquire().await {
            match market.tickers().await {
                Ok(symbols) => {
                    for symbol in symbols {
                        if let Err(e) = dispatcher.process_price_tick(&symbol).await {
                            tracing::warn!(symbol, error = %e, "tick processing failed");
                        }
                    }
                }
                Err(e) => tracing::warn!(error = %e, "failed to list tickers for tick loop"),
            }
        }
        let elapsed = started.elapsed();
        if elapsed < period {
            tokio::time::sleep(period - elapsed).await;
        }
    }
}

pub async fn run_prune_loop(dispatcher: DispatcherHandle, lock: Arc<LeaderLock<impl Store + 'static>>, config: EngineConfig) {
    let period = Duration::from_secs(config.prune_period.max(1));
    loop {
        if lock.try_acquire().await {
            match dispatcher.prune_orders_older_than(config.stale_age).await {
                Ok(n) if n > 0 => tracing::info!(pruned = n, "pruned stale closed orders"),
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "prune failed"),
            }
            match dispatcher.expire_orders_older_than(config.expire_age).await {
                Ok(n) if n > 0 => tracing::info!(expired = n, "expired stale open orders"),
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "expire failed"),
            }
        }
        tokio::time::sleep(period).await;
    }
}

pub async fn run_audit_loop(dispatcher: DispatcherHandle, lock: Arc<LeaderLock<impl Store + 'static>>, config: EngineConfig) {
    let period = Duration::from_secs(config.audit_period.max(1));
    loop {
        if lock.try_acquire().await {
            match dispatcher.check_consistency().await {
                Ok(mismatches) => {
                    for m in &mismatches {
                        tracing::error!(asset = %m.asset, expected = m.expected_used, actual = m.actual_used, "reservation consistency mismatch");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "consistency audit failed"),
            }
        }
        tokio::time::sleep(period).await;
    }
}
