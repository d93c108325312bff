use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mockexchange_engine::config::EngineConfig;
use mockexchange_engine::engine::control_loops::{run_audit_loop, run_prune_loop, run_tick_loop, LeaderLock};
use mockexchange_engine::engine::dispatcher;
use mockexchange_engine::market::MarketStore;
use mockexchange_engine::store::RedisStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mockexchange_engine=info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = EngineConfig::load()?;
    tracing::info!(cash_asset = %config.cash_asset, commission = config.commission, "starting mock exchange engine");

    let store = Arc::new(RedisStore::from_url(&config.store_url)?);
    let dispatcher = dispatcher::spawn(store.clone(), config.clone());
    let market = Arc::new(MarketStore::new(store.clone()));

    let holder_id = uuid::Uuid::new_v4().to_string();
    let lock_ttl = Duration::from_secs((config.tick_period.max(1) * 5).max(5));

    let tick_lock = Arc::new(LeaderLock::new(store.clone(), holder_id.clone(), lock_ttl));
    let prune_lock = Arc::new(LeaderLock::new(store.clone(), holder_id.clone(), lock_ttl));
    let audit_lock = Arc::new(LeaderLock::new(store, holder_id, lock_ttl));

    tokio::spawn(run_tick_loop(dispatcher.clone(), market, tick_lock, config.clone()));
    tokio::spawn(run_prune_loop(dispatcher.clone(), prune_lock, config.clone()));
    tokio::spawn(run_audit_loop(dispatcher, audit_lock, config));

    tracing::info!("engine running; awaiting shutdown signal");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received, exiting");
    Ok(())
}
