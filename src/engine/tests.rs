use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::EngineConfig;
use crate::models::{OrderSide, OrderStatus, OrderType, TradingPair};
use crate::store::MemoryStore;

use super::ExecutionEngine;

fn test_engine() -> ExecutionEngine<MemoryStore> {
    let (tx, _rx) = mpsc::unbounded_channel();
    ExecutionEngine::new(Arc::new(MemoryStore::new()), EngineConfig::default(), tx)
}

fn test_engine_with_config(config: EngineConfig) -> ExecutionEngine<MemoryStore> {
    let (tx, _rx) = mpsc::unbounded_channel();
    ExecutionEngine::new(Arc::new(MemoryStore::new()), config, tx)
}

async fn seed_ticker(engine: &ExecutionEngine<MemoryStore>, symbol: &str, price: f64) {
    engine.market.set_last_price(&TradingPair::new(symbol, price, 0.0)).await.unwrap();
}

#[tokio::test]
async fn create_order_rejects_when_funds_insufficient() {
    let engine = test_engine();
    seed_ticker(&engine, "BTC/USDT", 100.0).await;
    engine.deposit_asset("USDT", 10.0).await.unwrap();

    let order = engine.create_order("BTC/USDT", OrderSide::Buy, OrderType::Limit, 5.0, Some(100.0)).await.unwrap();
    assert_eq!(order.status, OrderStatus::Rejected);
    assert_eq!(engine.portfolio.get("USDT").await.unwrap().used, 0.0);
}

#[tokio::test]
async fn create_order_reserves_notion_and_fee_for_buy() {
    let engine = test_engine();
    seed_ticker(&engine, "BTC/USDT", 100.0).await;
    engine.deposit_asset("USDT", 1000.0).await.unwrap();

    let order = engine.create_order("BTC/USDT", OrderSide::Buy, OrderType::Limit, 5.0, Some(100.0)).await.unwrap();
    assert_eq!(order.status, OrderStatus::New);
    let bal = engine.portfolio.get("USDT").await.unwrap();
    assert_eq!(bal.used, 500.0);
    assert_eq!(bal.free, 500.0);
}

#[tokio::test]
async fn full_tick_fill_closes_buy_and_zeroes_used() {
    let engine = test_engine();
    seed_ticker(&engine, "BTC/USDT", 100.0).await;
    engine.deposit_asset("USDT", 1000.0).await.unwrap();

    let order = engine.create_order("BTC/USDT", OrderSide::Buy, OrderType::Limit, 5.0, Some(100.0)).await.unwrap();

    engine.set_ticker("BTC/USDT", 100.0, Some(1_000_000.0), Some(1_000_000.0)).await.unwrap();
    engine.process_price_tick("BTC/USDT").await.unwrap();

    let refreshed = engine.orders.get(&order.id).await.unwrap();
    assert_eq!(refreshed.status, OrderStatus::Filled);
    assert!((refreshed.actual_filled - 5.0).abs() < 1e-9);
    assert_eq!(engine.portfolio.get("USDT").await.unwrap().used, 0.0);
    assert!(engine.portfolio.get("BTC").await.unwrap().free > 0.0);
}

#[tokio::test]
async fn cancel_open_order_releases_reservation() {
    let engine = test_engine();
    seed_ticker(&engine, "BTC/USDT", 100.0).await;
    engine.deposit_asset("USDT", 1000.0).await.unwrap();

    let order = engine.create_order("BTC/USDT", OrderSide::Buy, OrderType::Limit, 5.0, Some(100.0)).await.unwrap();
    let canceled = engine.cancel_order(&order.id).await.unwrap();
    assert_eq!(canceled.status, OrderStatus::Canceled);
    assert_eq!(engine.portfolio.get("USDT").await.unwrap().used, 0.0);
    assert_eq!(engine.portfolio.get("USDT").await.unwrap().free, 1000.0);
}

#[tokio::test]
async fn cancel_non_open_order_is_invalid_state() {
    let engine = test_engine();
    seed_ticker(&engine, "BTC/USDT", 100.0).await;
    engine.deposit_asset("USDT", 1000.0).await.unwrap();

    let order = engine.create_order("BTC/USDT", OrderSide::Buy, OrderType::Limit, 5.0, Some(100.0)).await.unwrap();
    engine.cancel_order(&order.id).await.unwrap();

    let err = engine.cancel_order(&order.id).await.unwrap_err();
    assert!(matches!(err, crate::error::EngineError::InvalidState(_)));
}

#[tokio::test]
async fn buy_side_reservation_tamper_rejects_order() {
    // Scenario S3: overwrite the quote balance between reservation and fill
    // so the engine must detect the shortfall at fill time, not crash.
    let engine = test_engine();
    seed_ticker(&engine, "BTC/USDT", 2.0).await;
    engine.deposit_asset("USDT", 20000.0).await.unwrap();

    let order = engine.create_order("BTC/USDT", OrderSide::Buy, OrderType::Limit, 5000.0, Some(2.0)).await.unwrap();
    assert_eq!(order.status, OrderStatus::New);

    let booked = order.reserved_notion_left + order.reserved_fee_left;
    engine.set_balance("USDT", 0.0, booked * 0.9).await.unwrap();

    engine.set_ticker("BTC/USDT", 2.0, Some(1_000_000.0), Some(1_000_000.0)).await.unwrap();
    engine.process_price_tick("BTC/USDT").await.unwrap();

    let refreshed = engine.orders.get(&order.id).await.unwrap();
    assert!(matches!(refreshed.status, OrderStatus::Rejected | OrderStatus::PartiallyRejected));
    let bal = engine.portfolio.get("USDT").await.unwrap();
    assert_eq!(bal.used, 0.0);
}

#[tokio::test]
async fn full_sell_fill_credits_notion_net_of_fee_exactly_once() {
    // A full sell fill must leave the seller with exactly
    // deposit + (filled_notion - filled_fee), not deposit + filled_notion -
    // 2*filled_fee (the fee must be released back to free, then the net
    // proceeds credited on top, not netted away twice).
    let config = EngineConfig { commission: 0.01, ..EngineConfig::default() };
    let engine = test_engine_with_config(config);
    seed_ticker(&engine, "BTC/USDT", 100.0).await;
    engine.deposit_asset("BTC", 5.0).await.unwrap();
    engine.deposit_asset("USDT", 20.0).await.unwrap();

    let order = engine.create_order("BTC/USDT", OrderSide::Sell, OrderType::Limit, 5.0, Some(200.0)).await.unwrap();
    assert_eq!(order.status, OrderStatus::New);
    assert_eq!(engine.portfolio.get("USDT").await.unwrap().used, 10.0);

    engine.set_ticker("BTC/USDT", 200.0, Some(1_000_000.0), Some(1_000_000.0)).await.unwrap();
    engine.process_price_tick("BTC/USDT").await.unwrap();

    let filled = engine.orders.get(&order.id).await.unwrap();
    assert_eq!(filled.status, OrderStatus::Filled);

    let quote = engine.portfolio.get("USDT").await.unwrap();
    assert_eq!(quote.used, 0.0);
    assert!((quote.free - 1010.0).abs() < 1e-6, "expected free(USDT) == 1010 (20 deposited + 1000 notion - 10 fee), got {}", quote.free);

    let base = engine.portfolio.get("BTC").await.unwrap();
    assert_eq!(base.used, 0.0);
    assert_eq!(base.free, 0.0);
}

#[tokio::test]
async fn sell_side_base_shortage_tamper_rejects_order() {
    // Scenario S4: shrink the base reservation between order creation and
    // fill; the engine must reject at fill time and release exactly what's
    // left, not what the order thinks it reserved.
    let engine = test_engine();
    seed_ticker(&engine, "BTC/USDT", 100.0).await;
    engine.deposit_asset("BTC", 5.0).await.unwrap();
    engine.deposit_asset("USDT", 100.0).await.unwrap();

    let order = engine.create_order("BTC/USDT", OrderSide::Sell, OrderType::Limit, 5.0, Some(200.0)).await.unwrap();
    assert_eq!(order.status, OrderStatus::New);
    assert_eq!(engine.portfolio.get("BTC").await.unwrap().used, 5.0);

    engine.set_balance("BTC", 0.0, 4.95).await.unwrap();

    engine.set_ticker("BTC/USDT", 200.0, Some(1_000_000.0), Some(1_000_000.0)).await.unwrap();
    engine.process_price_tick("BTC/USDT").await.unwrap();

    let refreshed = engine.orders.get(&order.id).await.unwrap();
    assert!(matches!(refreshed.status, OrderStatus::Rejected | OrderStatus::PartiallyRejected));

    let base = engine.portfolio.get("BTC").await.unwrap();
    assert_eq!(base.used, 0.0);
    assert!((base.free - 4.95).abs() < 1e-9);
    assert_eq!(engine.portfolio.get("USDT").await.unwrap().used, 0.0);
}

#[tokio::test]
async fn sell_side_fee_shortage_tamper_rejects_order() {
    // Scenario S5: same as S4 but shrink the fee reservation on the quote
    // side instead of the base reservation.
    let config = EngineConfig { commission: 0.01, ..EngineConfig::default() };
    let engine = test_engine_with_config(config);
    seed_ticker(&engine, "BTC/USDT", 100.0).await;
    engine.deposit_asset("BTC", 5.0).await.unwrap();
    engine.deposit_asset("USDT", 100.0).await.unwrap();

    let order = engine.create_order("BTC/USDT", OrderSide::Sell, OrderType::Limit, 5.0, Some(200.0)).await.unwrap();
    assert_eq!(order.status, OrderStatus::New);
    let reserved_fee = order.reserved_fee_left;
    assert_eq!(engine.portfolio.get("BTC").await.unwrap().used, 5.0);

    engine.set_balance("USDT", 0.0, reserved_fee * 0.95).await.unwrap();

    engine.set_ticker("BTC/USDT", 200.0, Some(1_000_000.0), Some(1_000_000.0)).await.unwrap();
    engine.process_price_tick("BTC/USDT").await.unwrap();

    let refreshed = engine.orders.get(&order.id).await.unwrap();
    assert!(matches!(refreshed.status, OrderStatus::Rejected | OrderStatus::PartiallyRejected));

    let base = engine.portfolio.get("BTC").await.unwrap();
    assert_eq!(base.used, 0.0);
    assert!((base.free - 5.0).abs() < 1e-9);
    assert_eq!(engine.portfolio.get("USDT").await.unwrap().used, 0.0);
}

#[tokio::test]
async fn partial_then_full_fill_accumulates_correctly() {
    let engine = test_engine();
    seed_ticker(&engine, "BTC/USDT", 10.0).await;
    engine.deposit_asset("USDT", 1000.0).await.unwrap();

    let order = engine.create_order("BTC/USDT", OrderSide::Buy, OrderType::Limit, 10.0, Some(10.0)).await.unwrap();

    engine.set_ticker("BTC/USDT", 10.0, Some(3.0), Some(3.0)).await.unwrap();
    engine.process_price_tick("BTC/USDT").await.unwrap();
    let after_first = engine.orders.get(&order.id).await.unwrap();
    assert_eq!(after_first.status, OrderStatus::PartiallyFilled);
    assert!((after_first.actual_filled - 3.0).abs() < 1e-6);

    engine.set_ticker("BTC/USDT", 10.0, Some(1_000_000.0), Some(1_000_000.0)).await.unwrap();
    engine.process_price_tick("BTC/USDT").await.unwrap();
    let after_second = engine.orders.get(&order.id).await.unwrap();
    assert_eq!(after_second.status, OrderStatus::Filled);
    assert!((after_second.actual_filled - 10.0).abs() < 1e-6);
    assert_eq!(engine.portfolio.get("USDT").await.unwrap().used, 0.0);
}

#[tokio::test]
async fn check_consistency_reports_no_mismatch_for_fresh_order() {
    let engine = test_engine();
    seed_ticker(&engine, "BTC/USDT", 100.0).await;
    engine.deposit_asset("USDT", 1000.0).await.unwrap();
    engine.create_order("BTC/USDT", OrderSide::Buy, OrderType::Limit, 5.0, Some(100.0)).await.unwrap();

    let mismatches = engine.check_consistency().await.unwrap();
    assert!(mismatches.is_empty());
}

#[tokio::test]
async fn deposit_then_withdraw_round_trips_balance() {
    let engine = test_engine();
    engine.deposit_asset("USDT", 500.0).await.unwrap();
    engine.withdraw_asset("USDT", 500.0).await.unwrap();
    let bal = engine.portfolio.get("USDT").await.unwrap();
    assert_eq!(bal.free, 0.0);
    assert_eq!(bal.used, 0.0);
}

#[tokio::test]
async fn unknown_symbol_is_not_found() {
    let engine = test_engine();
    let err = engine.create_order("ZZZ/USDT", OrderSide::Buy, OrderType::Market, 1.0, None).await.unwrap_err();
    assert!(matches!(err, crate::error::EngineError::NotFound(_)));
}

#[tokio::test]
async fn zero_amount_is_validation_error() {
    let engine = test_engine();
    seed_ticker(&engine, "BTC/USDT", 100.0).await;
    let err = engine.create_order("BTC/USDT", OrderSide::Buy, OrderType::Market, 0.0, None).await.unwrap_err();
    assert!(matches!(err, crate::error::EngineError::Validation(_)));
}
