use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::error::EngineResult;
use crate::models::{AssetBalance, Order, OrderSide, OrderStatus, OrderType, TradeStatBucket, TradingPair};
use crate::store::Store;

use super::{AssetsSummary, ExecutionEngine};

/// A single public operation, boxed up with a reply channel so the
/// dispatcher loop can run it to completion before taking the next one off
/// the queue. Mirrors the teacher's orchestrator pattern of a background
/// task owning a channel, generalized from "one channel per concern" to
/// "one channel serializing every engine mutation".
enum Command {
    CreateOrder {
        symbol: String,
        side: OrderSide,
        kind: OrderType,
        amount: f64,
        limit_price: Option<f64>,
        reply: oneshot::Sender<EngineResult<Order>>,
    },
    CancelOrder {
        id: String,
        reply: oneshot::Sender<EngineResult<Order>>,
    },
    Settle {
        order_id: String,
    },
    ProcessTick {
        symbol: String,
        reply: oneshot::Sender<EngineResult<()>>,
    },
    DepositAsset {
        asset: String,
        amount: f64,
        reply: oneshot::Sender<EngineResult<()>>,
    },
    WithdrawAsset {
        asset: String,
        amount: f64,
        reply: oneshot::Sender<EngineResult<()>>,
    },
    SetBalance {
        asset: String,
        free: f64,
        used: f64,
        reply: oneshot::Sender<EngineResult<()>>,
    },
    SetTicker {
        symbol: String,
        price: f64,
        bid_volume: Option<f64>,
        ask_volume: Option<f64>,
        reply: oneshot::Sender<EngineResult<()>>,
    },
    PruneOlderThan {
        age_secs: u64,
        reply: oneshot::Sender<EngineResult<u64>>,
    },
    ExpireOlderThan {
        age_secs: u64,
        reply: oneshot::Sender<EngineResult<u64>>,
    },
    CheckConsistency {
        reply: oneshot::Sender<EngineResult<Vec<super::ConsistencyMismatch>>>,
    },
    Reset {
        reply: oneshot::Sender<EngineResult<()>>,
    },
    ListSymbols {
        reply: oneshot::Sender<EngineResult<Vec<String>>>,
    },
    FetchTicker {
        symbol: String,
        reply: oneshot::Sender<EngineResult<Option<TradingPair>>>,
    },
    FetchBalance {
        asset: Option<String>,
        reply: oneshot::Sender<EngineResult<HashMap<String, AssetBalance>>>,
    },
    ListAssets {
        reply: oneshot::Sender<EngineResult<Vec<String>>>,
    },
    CanExecute {
        symbol: String,
        side: OrderSide,
        amount: f64,
        price: Option<f64>,
        reply: oneshot::Sender<EngineResult<bool>>,
    },
    ListOrders {
        status_open_only: bool,
        status: Option<OrderStatus>,
        symbol: Option<String>,
        side: Option<OrderSide>,
        tail: Option<usize>,
        include_history: bool,
        reply: oneshot::Sender<EngineResult<Vec<Order>>>,
    },
    GetOrder {
        id: String,
        include_history: bool,
        reply: oneshot::Sender<EngineResult<Order>>,
    },
    SummaryCapital {
        reply: oneshot::Sender<EngineResult<(f64, f64, f64, f64)>>,
    },
    SummaryAssets {
        reply: oneshot::Sender<EngineResult<AssetsSummary>>,
    },
    TradeStats {
        side: Option<OrderSide>,
        assets: Option<Vec<String>>,
        reply: oneshot::Sender<EngineResult<HashMap<String, TradeStatBucket>>>,
    },
    Health {
        reply: oneshot::Sender<EngineResult<bool>>,
    },
}

/// A handle callers clone and hold; every method round-trips through the
/// single writer task owning the `ExecutionEngine`.
#[derive(Clone)]
pub struct DispatcherHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl DispatcherHandle {
    pub async fn create_order(&self, symbol: &str, side: OrderSide, kind: OrderType, amount: f64, limit_price: Option<f64>) -> EngineResult<Order> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Command::CreateOrder { symbol: symbol.to_string(), side, kind, amount, limit_price, reply });
        rx.await.expect("dispatcher task dropped before replying")
    }

    pub async fn cancel_order(&self, id: &str) -> EngineResult<Order> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Command::CancelOrder { id: id.to_string(), reply });
        rx.await.expect("dispatcher task dropped before replying")
    }

    pub async fn process_price_tick(&self, symbol: &str) -> EngineResult<()> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Command::ProcessTick { symbol: symbol.to_string(), reply });
        rx.await.expect("dispatcher task dropped before replying")
    }

    pub async fn deposit_asset(&self, asset: &str, amount: f64) -> EngineResult<()> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Command::DepositAsset { asset: asset.to_string(), amount, reply });
        rx.await.expect("dispatcher task dropped before replying")
    }

    pub async fn withdraw_asset(&self, asset: &str, amount: f64) -> EngineResult<()> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Command::WithdrawAsset { asset: asset.to_string(), amount, reply });
        rx.await.expect("dispatcher task dropped before replying")
    }

    pub async fn set_balance(&self, asset: &str, free: f64, used: f64) -> EngineResult<()> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Command::SetBalance { asset: asset.to_string(), free, used, reply });
        rx.await.expect("dispatcher task dropped before replying")
    }

    pub async fn set_ticker(&self, symbol: &str, price: f64, bid_volume: Option<f64>, ask_volume: Option<f64>) -> EngineResult<()> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Command::SetTicker { symbol: symbol.to_string(), price, bid_volume, ask_volume, reply });
        rx.await.expect("dispatcher task dropped before replying")
    }

    pub async fn prune_orders_older_than(&self, age_secs: u64) -> EngineResult<u64> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Command::PruneOlderThan { age_secs, reply });
        rx.await.expect("dispatcher task dropped before replying")
    }

    pub async fn expire_orders_older_than(&self, age_secs: u64) -> EngineResult<u64> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Command::ExpireOlderThan { age_secs, reply });
        rx.await.expect("dispatcher task dropped before replying")
    }

    pub async fn check_consistency(&self) -> EngineResult<Vec<super::ConsistencyMismatch>> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Command::CheckConsistency { reply });
        rx.await.expect("dispatcher task dropped before replying")
    }

    pub async fn reset(&self) -> EngineResult<()> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Command::Reset { reply });
        rx.await.expect("dispatcher task dropped before replying")
    }

    // Read-only operations route through the same queue as writers (see
    // the Open Question decision in DESIGN.md): a reader that ran ahead of
    // a writer it was FIFO-queued behind would observe a torn state.

    pub async fn list_symbols(&self) -> EngineResult<Vec<String>> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Command::ListSymbols { reply });
        rx.await.expect("dispatcher task dropped before replying")
    }

    pub async fn fetch_ticker(&self, symbol: &str) -> EngineResult<Option<TradingPair>> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Command::FetchTicker { symbol: symbol.to_string(), reply });
        rx.await.expect("dispatcher task dropped before replying")
    }

    pub async fn fetch_balance(&self, asset: Option<&str>) -> EngineResult<HashMap<String, AssetBalance>> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Command::FetchBalance { asset: asset.map(str::to_string), reply });
        rx.await.expect("dispatcher task dropped before replying")
    }

    pub async fn list_assets(&self) -> EngineResult<Vec<String>> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Command::ListAssets { reply });
        rx.await.expect("dispatcher task dropped before replying")
    }

    pub async fn can_execute(&self, symbol: &str, side: OrderSide, amount: f64, price: Option<f64>) -> EngineResult<bool> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Command::CanExecute { symbol: symbol.to_string(), side, amount, price, reply });
        rx.await.expect("dispatcher task dropped before replying")
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn list_orders(
        &self,
        status_open_only: bool,
        status: Option<OrderStatus>,
        symbol: Option<&str>,
        side: Option<OrderSide>,
        tail: Option<usize>,
        include_history: bool,
    ) -> EngineResult<Vec<Order>> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Command::ListOrders { status_open_only, status, symbol: symbol.map(str::to_string), side, tail, include_history, reply });
        rx.await.expect("dispatcher task dropped before replying")
    }

    pub async fn get_order(&self, id: &str, include_history: bool) -> EngineResult<Order> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Command::GetOrder { id: id.to_string(), include_history, reply });
        rx.await.expect("dispatcher task dropped before replying")
    }

    pub async fn summary_capital(&self) -> EngineResult<(f64, f64, f64, f64)> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Command::SummaryCapital { reply });
        rx.await.expect("dispatcher task dropped before replying")
    }

    pub async fn summary_assets(&self) -> EngineResult<AssetsSummary> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Command::SummaryAssets { reply });
        rx.await.expect("dispatcher task dropped before replying")
    }

    pub async fn trade_stats(&self, side: Option<OrderSide>, assets: Option<Vec<String>>) -> EngineResult<HashMap<String, TradeStatBucket>> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Command::TradeStats { side, assets, reply });
        rx.await.expect("dispatcher task dropped before replying")
    }

    pub async fn health(&self) -> EngineResult<bool> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Command::Health { reply });
        rx.await.expect("dispatcher task dropped before replying")
    }
}

/// Spawns the single-writer task and returns a cloneable handle to it. The
/// engine's own `settle_tx` re-enqueues onto the very same command channel,
/// so a scheduled market settle is just another command waiting its turn in
/// FIFO order behind anything submitted earlier.
pub fn spawn<S: Store + 'static>(store: Arc<S>, config: crate::config::EngineConfig) -> DispatcherHandle {
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<Command>();
    let (settle_tx, mut settle_rx) = mpsc::unbounded_channel::<String>();

    let engine = Arc::new(ExecutionEngine::new(store, config, settle_tx));

    // Re-inject settle callbacks as ordinary commands so they are
    // serialized through the same queue as client requests.
    {
        let cmd_tx = cmd_tx.clone();
        tokio::spawn(async move {
            while let Some(order_id) = settle_rx.recv().await {
                let _ = cmd_tx.send(Command::Settle { order_id });
            }
        });
    }

    tokio::spawn(async move {
        while let Some(cmd) = cmd_rx.recv().await {
            match cmd {
                Command::CreateOrder { symbol, side, kind, amount, limit_price, reply } => {
                    let _ = reply.send(engine.create_order(&symbol, side, kind, amount, limit_price).await);
                }
                Command::CancelOrder { id, reply } => {
                    let _ = reply.send(engine.cancel_order(&id).await);
                }
                Command::Settle { order_id } => {
                    if let Ok(order) = engine.orders.get(&order_id).await {
                        if order.is_open() {
                            if let Ok(Some(pair)) = engine.market.fetch_ticker(&order.symbol).await {
                                if let Err(e) = engine.process_single_order(&order_id, &pair).await {
                                    tracing::warn!(order_id, error = %e, "market settle failed");
                                }
                            }
                        }
                    }
                }
                Command::ProcessTick { symbol, reply } => {
                    let _ = reply.send(engine.process_price_tick(&symbol).await);
                }
                Command::DepositAsset { asset, amount, reply } => {
                    let _ = reply.send(engine.deposit_asset(&asset, amount).await);
                }
                Command::WithdrawAsset { asset, amount, reply } => {
                    let _ = reply.send(engine.withdraw_asset(&asset, amount).await);
                }
                Command::SetBalance { asset, free, used, reply } => {
                    let _ = reply.send(engine.set_balance(&asset, free, used).await);
                }
                Command::SetTicker { symbol, price, bid_volume, ask_volume, reply } => {
                    let _ = reply.send(engine.set_ticker(&symbol, price, bid_volume, ask_volume).await);
                }
                Command::PruneOlderThan { age_secs, reply } => {
                    let _ = reply.send(engine.prune_orders_older_than(age_secs).await);
                }
                Command::ExpireOlderThan { age_secs, reply } => {
                    let _ = reply.send(engine.expire_orders_older_than(age_secs).await);
                }
                Command::CheckConsistency { reply } => {
                    let _ = reply.send(engine.check_consistency().await);
                }
                Command::Reset { reply } => {
                    let _ = reply.send(engine.reset().await);
                }
                Command::ListSymbols { reply } => {
                    let _ = reply.send(engine.list_symbols().await);
                }
                Command::FetchTicker { symbol, reply } => {
                    let _ = reply.send(engine.fetch_ticker(&symbol).await);
                }
                Command::FetchBalance { asset, reply } => {
                    let _ = reply.send(engine.fetch_balance(asset.as_deref()).await);
                }
                Command::ListAssets { reply } => {
                    let _ = reply.send(engine.list_assets().await);
                }
                Command::CanExecute { symbol, side, amount, price, reply } => {
                    let _ = reply.send(engine.can_execute(&symbol, side, amount, price).await);
                }
                Command::ListOrders { status_open_only, status, symbol, side, tail, include_history, reply } => {
                    let _ = reply.send(engine.list_orders(status_open_only, status, symbol.as_deref(), side, tail, include_history).await);
                }
                Command::GetOrder { id, include_history, reply } => {
                    let _ = reply.send(engine.get_order(&id, include_history).await);
                }
                Command::SummaryCapital { reply } => {
                    let _ = reply.send(engine.get_summary_capital().await);
                }
                Command::SummaryAssets { reply } => {
                    let _ = reply.send(engine.get_summary_assets().await);
                }
                Command::TradeStats { side, assets, reply } => {
                    let _ = reply.send(engine.get_trade_stats(side, assets.as_deref()).await);
                }
                Command::Health { reply } => {
                    let _ = reply.send(engine.health().await);
                }
            }
        }
    });

    DispatcherHandle { tx: cmd_tx }
}
