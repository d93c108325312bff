//! End-to-end scenarios against `MemoryStore`, no live Redis needed.

use std::sync::Arc;

use tokio::sync::mpsc;

use mockexchange_engine::config::EngineConfig;
use mockexchange_engine::models::{OrderSide, OrderStatus, OrderType, TradingPair};
use mockexchange_engine::store::MemoryStore;
use mockexchange_engine::ExecutionEngine;

fn new_engine() -> ExecutionEngine<MemoryStore> {
    let (tx, _rx) = mpsc::unbounded_channel();
    ExecutionEngine::new(Arc::new(MemoryStore::new()), EngineConfig::default(), tx)
}

fn new_engine_with_config(config: EngineConfig) -> ExecutionEngine<MemoryStore> {
    let (tx, _rx) = mpsc::unbounded_channel();
    ExecutionEngine::new(Arc::new(MemoryStore::new()), config, tx)
}

async fn seed(engine: &ExecutionEngine<MemoryStore>, symbol: &str, price: f64) {
    engine.market.set_last_price(&TradingPair::new(symbol, price, 0.0)).await.unwrap();
}

/// S1 (trimmed): fund cash, market-buy across a handful of bases, settle
/// each by hand (standing in for the randomized delayed settle), expect
/// every order filled or rejected on genuine insufficiency, and zero
/// leftover `used(USDT)`.
#[tokio::test]
async fn s1_diversified_market_buys_leave_no_quote_reserved() {
    let engine = new_engine();
    engine.deposit_asset("USDT", 50_000.0).await.unwrap();

    let bases = ["BTC", "ETH", "SOL", "XRP"];
    let mut order_ids = Vec::new();
    for base in bases {
        let symbol = format!("{base}/USDT");
        seed(&engine, &symbol, 100.0).await;
        let amount = (50_000.0 / bases.len() as f64) / 100.0;
        let order = engine.create_order(&symbol, OrderSide::Buy, OrderType::Market, amount, None).await.unwrap();
        assert!(matches!(order.status, OrderStatus::New | OrderStatus::Rejected));
        order_ids.push((symbol, order.id));
    }

    for (symbol, id) in &order_ids {
        engine.set_ticker(symbol, 100.0, Some(1e9), Some(1e9)).await.unwrap();
        engine.process_single_order(id, &engine.market.fetch_ticker(symbol).await.unwrap().unwrap()).await.unwrap();
    }

    let bal = engine.portfolio.get("USDT").await.unwrap();
    assert_eq!(bal.used, 0.0);
}

/// S2 (trimmed): limit buy far below and limit sell far above market on a
/// handful of symbols, then cancel everything; every residual must clear.
#[tokio::test]
async fn s2_cancel_all_far_limits_zeroes_every_reservation() {
    let engine = new_engine();
    engine.deposit_asset("USDT", 100_000.0).await.unwrap();
    engine.deposit_asset("BTC", 100_000.0).await.unwrap();

    let symbols = ["BTC/USDT", "ETH/USDT", "SOL/USDT"];
    let mut ids = Vec::new();
    for symbol in symbols {
        seed(&engine, symbol, 100.0).await;
        let buy = engine.create_order(symbol, OrderSide::Buy, OrderType::Limit, 1.0, Some(0.000001)).await.unwrap();
        let sell = engine.create_order(symbol, OrderSide::Sell, OrderType::Limit, 1.0, Some(1_000_000.0)).await.unwrap();
        ids.push(buy.id);
        ids.push(sell.id);
    }

    for id in &ids {
        let order = engine.cancel_order(id).await.unwrap();
        assert!(matches!(order.status, OrderStatus::Canceled | OrderStatus::PartiallyCanceled));
    }

    for asset in ["USDT", "BTC"] {
        assert_eq!(engine.portfolio.get(asset).await.unwrap().used, 0.0);
    }
}

/// S4: shrinking the base reservation between creation and fill must reject
/// the order and release exactly what remains, not the full original amount.
#[tokio::test]
async fn s4_sell_side_base_shortage_tamper_rejects() {
    let engine = new_engine();
    seed(&engine, "BTC/USDT", 100.0).await;
    engine.deposit_asset("BTC", 5.0).await.unwrap();
    engine.deposit_asset("USDT", 100.0).await.unwrap();

    let order = engine.create_order("BTC/USDT", OrderSide::Sell, OrderType::Limit, 5.0, Some(200.0)).await.unwrap();
    engine.set_balance("BTC", 0.0, 4.95).await.unwrap();

    engine.set_ticker("BTC/USDT", 200.0, Some(1_000_000.0), Some(1_000_000.0)).await.unwrap();
    engine.process_single_order(&order.id, &engine.market.fetch_ticker("BTC/USDT").await.unwrap().unwrap()).await.unwrap();

    let refreshed = engine.orders.get(&order.id).await.unwrap();
    assert!(matches!(refreshed.status, OrderStatus::Rejected | OrderStatus::PartiallyRejected));
    let base = engine.portfolio.get("BTC").await.unwrap();
    assert_eq!(base.used, 0.0);
    assert!((base.free - 4.95).abs() < 1e-9);
    assert_eq!(engine.portfolio.get("USDT").await.unwrap().used, 0.0);
}

/// S5: same as S4 but the quote-side fee reservation is shrunk instead.
#[tokio::test]
async fn s5_sell_side_fee_shortage_tamper_rejects() {
    let config = EngineConfig { commission: 0.01, ..EngineConfig::default() };
    let engine = new_engine_with_config(config);
    seed(&engine, "BTC/USDT", 100.0).await;
    engine.deposit_asset("BTC", 5.0).await.unwrap();
    engine.deposit_asset("USDT", 100.0).await.unwrap();

    let order = engine.create_order("BTC/USDT", OrderSide::Sell, OrderType::Limit, 5.0, Some(200.0)).await.unwrap();
    engine.set_balance("USDT", 0.0, order.reserved_fee_left * 0.95).await.unwrap();

    engine.set_ticker("BTC/USDT", 200.0, Some(1_000_000.0), Some(1_000_000.0)).await.unwrap();
    engine.process_single_order(&order.id, &engine.market.fetch_ticker("BTC/USDT").await.unwrap().unwrap()).await.unwrap();

    let refreshed = engine.orders.get(&order.id).await.unwrap();
    assert!(matches!(refreshed.status, OrderStatus::Rejected | OrderStatus::PartiallyRejected));
    let base = engine.portfolio.get("BTC").await.unwrap();
    assert_eq!(base.used, 0.0);
    assert!((base.free - 5.0).abs() < 1e-9);
    assert_eq!(engine.portfolio.get("USDT").await.unwrap().used, 0.0);
}

/// S6: partial fill then full fill accumulates `actual_filled` and clears
/// reservations exactly once the remainder settles.
#[tokio::test]
async fn s6_partial_then_full_fill() {
    let engine = new_engine();
    seed(&engine, "BTC/USDT", 10.0).await;
    engine.deposit_asset("USDT", 1000.0).await.unwrap();

    let order = engine.create_order("BTC/USDT", OrderSide::Buy, OrderType::Limit, 10.0, Some(10.0)).await.unwrap();

    engine.set_ticker("BTC/USDT", 10.0, Some(3.0), Some(3.0)).await.unwrap();
    engine.process_price_tick("BTC/USDT").await.unwrap();
    let mid = engine.orders.get(&order.id).await.unwrap();
    assert_eq!(mid.status, OrderStatus::PartiallyFilled);

    engine.set_ticker("BTC/USDT", 10.0, Some(100.0), Some(100.0)).await.unwrap();
    engine.process_price_tick("BTC/USDT").await.unwrap();
    let done = engine.orders.get(&order.id).await.unwrap();
    assert_eq!(done.status, OrderStatus::Filled);
    assert!((done.actual_filled - 10.0).abs() < 1e-6);
    assert_eq!(engine.portfolio.get("USDT").await.unwrap().used, 0.0);
    assert!((done.price.unwrap() - done.actual_notion / done.actual_filled).abs() < 1e-9);
}

/// Boundary cases from §8.
#[tokio::test]
async fn boundary_cases() {
    let engine = new_engine();
    seed(&engine, "BTC/USDT", 100.0).await;

    let err = engine.create_order("BTC/USDT", OrderSide::Buy, OrderType::Market, 0.0, None).await.unwrap_err();
    assert!(matches!(err, mockexchange_engine::EngineError::Validation(_)));

    let err = engine.create_order("BTC/USDT", OrderSide::Buy, OrderType::Limit, 1.0, None).await.unwrap_err();
    assert!(matches!(err, mockexchange_engine::EngineError::Validation(_)));

    let err = engine.cancel_order("does-not-exist").await.unwrap_err();
    assert!(matches!(err, mockexchange_engine::EngineError::NotFound(_)));

    let err = engine.create_order("ZZZ/USDT", OrderSide::Buy, OrderType::Market, 1.0, None).await.unwrap_err();
    assert!(matches!(err, mockexchange_engine::EngineError::NotFound(_)));
}
