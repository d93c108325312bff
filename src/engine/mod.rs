pub mod control_loops;
pub mod dispatcher;
pub mod slippage;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::market::MarketStore;
use crate::models::{AssetBalance, InvestmentAccount, Order, OrderSide, OrderStatus, OrderType, TradeStatBucket, TradingPair};
use crate::orders::state_machine::{closing_status, transition, CloseKind};
use crate::orders::{ListFilter, OrderStore};
use crate::portfolio::PortfolioStore;
use crate::store::{keys, Store};

const EPSILON: f64 = 1e-9;
const FILLED_EPSILON: f64 = 1e-12;

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}

fn base_quote(symbol: &str) -> EngineResult<(&str, &str)> {
    symbol
        .split_once('/')
        .ok_or_else(|| EngineError::validation(format!("symbol {symbol} is not BASE/QUOTE")))
}

pub struct ConsistencyMismatch {
    pub asset: String,
    pub expected_used: f64,
    pub actual_used: f64,
}

/// A single cash-valued snapshot of the whole portfolio, split between the
/// cash asset and everything else, each split again into free vs. frozen
/// (reserved against open orders). `mismatches` lists assets where the
/// portfolio's own `used` disagrees with the sum of order residuals by more
/// than the 10⁻³ cash-unit tolerance.
#[derive(Debug, Clone, Default)]
pub struct AssetsSummary {
    pub assets_free_value: f64,
    pub assets_frozen_value: f64,
    pub assets_total_value: f64,
    pub cash_free_value: f64,
    pub cash_frozen_value: f64,
    pub cash_total_value: f64,
    pub total_free_value: f64,
    pub total_frozen_value: f64,
    pub total_equity: f64,
    pub mismatches: Vec<String>,
}

/// Reserve -> fill -> settle orchestration. Holds no durable state besides
/// an in-process id counter; everything else lives in the persistence
/// layer behind `market`/`portfolio`/`orders`.
pub struct ExecutionEngine<S: Store> {
    pub market: MarketStore<S>,
    pub portfolio: PortfolioStore<S>,
    pub orders: OrderStore<S>,
    store: Arc<S>,
    config: EngineConfig,
    oid_counter: AtomicU64,
    settle_tx: mpsc::UnboundedSender<String>,
}

impl<S: Store> ExecutionEngine<S> {
    pub fn new(store: Arc<S>, config: EngineConfig, settle_tx: mpsc::UnboundedSender<String>) -> Self {
        Self {
            market: MarketStore::new(store.clone()),
            portfolio: PortfolioStore::new(store.clone()),
            orders: OrderStore::new(store.clone()),
            store,
            config,
            oid_counter: AtomicU64::new(0),
            settle_tx,
        }
    }

    /// Monotone timestamp-prefixed id, grounded on `_uid()` in
    /// `engine_actors.py` (there: millis-timestamp + counter, hashed and
    /// truncated; here: seconds-timestamp + a random suffix, since we have
    /// no use for the original's base64(md5(...)) shortening).
    fn next_order_id(&self) -> String {
        let ts = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        let seq = self.oid_counter.fetch_add(1, Ordering::Relaxed);
        format!("{ts:010}-{seq:06}-{}", Uuid::new_v4().simple())
    }

    // ---------------------------------------------------------------- //
    // Order creation / cancellation
    // ---------------------------------------------------------------- //

    pub async fn create_order(&self, symbol: &str, side: OrderSide, kind: OrderType, amount: f64, limit_price: Option<f64>) -> EngineResult<Order> {
        if !(amount > 0.0) {
            return Err(EngineError::validation("amount must be positive"));
        }
        if kind == OrderType::Limit && !limit_price.map(|p| p >= 0.0).unwrap_or(false) {
            return Err(EngineError::validation("limit orders require a non-negative limit_price"));
        }
        let (base, quote) = base_quote(symbol)?;
        let last = self.market.last_price(symbol).await?;

        let px = match (kind, side) {
            (OrderType::Market, _) => last,
            (OrderType::Limit, OrderSide::Buy) => limit_price.unwrap(),
            (OrderType::Limit, OrderSide::Sell) => limit_price.unwrap().max(last),
        };
        let notion = amount * px;
        let fee = notion * self.config.commission;

        let ts = now_ms();
        let id = self.next_order_id();

        let mut order = Order {
            id,
            symbol: symbol.to_string(),
            side,
            r#type: kind,
            amount,
            limit_price,
            fee_rate: self.config.commission,
            fee_currency: quote.to_string(),
            notion_currency: quote.to_string(),
            initial_booked_notion: 0.0,
            initial_booked_fee: 0.0,
            reserved_notion_left: 0.0,
            reserved_fee_left: 0.0,
            actual_filled: 0.0,
            actual_notion: 0.0,
            actual_fee: 0.0,
            price: None,
            status: OrderStatus::New,
            ts_create: ts,
            ts_update: ts,
            ts_finish: None,
            history: vec![],
        };

        let reservation_ok = match side {
            OrderSide::Buy => self.portfolio.reserve(quote, notion + fee).await?.is_ok(),
            OrderSide::Sell => match self.portfolio.reserve(base, amount).await? {
                Err(_) => false,
                Ok(()) => match self.portfolio.reserve(quote, fee).await {
                    Ok(Ok(())) => true,
                    Ok(Err(_)) => {
                        // insufficient fee funds; give the base reservation back before rejecting.
                        self.portfolio.release(base, amount).await?;
                        false
                    }
                    Err(e) => {
                        // storage failure, not insufficient funds; still must not strand the base reservation.
                        self.portfolio.release(base, amount).await?;
                        return Err(e);
                    }
                },
            },
        };

        if !reservation_ok {
            order.status = OrderStatus::Rejected;
            order.ts_finish = Some(ts);
            order.push_history(ts, OrderStatus::Rejected, None, None, Some("insufficient funds at order creation".to_string()));
            self.orders.add(&order).await?;
            return Ok(order);
        }

        match side {
            OrderSide::Buy => {
                order.initial_booked_notion = notion;
                order.initial_booked_fee = fee;
                order.reserved_notion_left = notion;
                order.reserved_fee_left = fee;
            }
            OrderSide::Sell => {
                order.initial_booked_notion = 0.0;
                order.initial_booked_fee = fee;
                order.reserved_notion_left = 0.0;
                order.reserved_fee_left = fee;
            }
        }
        order.push_history(ts, OrderStatus::New, None, None, None);
        self.orders.add(&order).await?;

        if kind == OrderType::Market {
            let delay = {
                let mut rng = rand::thread_rng();
                rng.gen_range(self.config.min_settle..=self.config.max_settle.max(self.config.min_settle))
            };
            let tx = self.settle_tx.clone();
            let oid = order.id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_secs_f64(delay)).await;
                let _ = tx.send(oid);
            });
        }

        Ok(order)
    }

    pub async fn cancel_order(&self, id: &str) -> EngineResult<Order> {
        let mut order = self.orders.get(id).await?;
        if !order.is_open() {
            return Err(EngineError::invalid_state(format!("order {id} is not open")));
        }
        let (base, quote) = base_quote(&order.symbol)?;

        let residual_quote = order.residual_quote();
        if residual_quote > 0.0 {
            self.portfolio.release(quote, residual_quote).await?;
        }
        if matches!(order.side, OrderSide::Sell) {
            let residual_base = order.residual_base();
            if residual_base > 0.0 {
                self.portfolio.release(base, residual_base).await?;
            }
        }

        let ts = now_ms();
        let status = closing_status(&order, true, CloseKind::Cancel);
        transition(&mut order, ts, status, None, None, None);
        self.orders.update_with_index_transition(&order, true).await?;
        Ok(order)
    }

    /// Dry-run funds check with no side effects.
    pub async fn can_execute(&self, symbol: &str, side: OrderSide, amount: f64, price: Option<f64>) -> EngineResult<bool> {
        let (base, quote) = base_quote(symbol)?;
        let px = match price {
            Some(p) => p,
            None => self.market.last_price(symbol).await?,
        };
        let notion = amount * px;
        let fee = notion * self.config.commission;
        Ok(match side {
            OrderSide::Buy => self.portfolio.get(quote).await?.free >= notion + fee,
            OrderSide::Sell => {
                let base_bal = self.portfolio.get(base).await?;
                let quote_bal = self.portfolio.get(quote).await?;
                base_bal.free >= amount && quote_bal.free >= fee
            }
        })
    }

    // ---------------------------------------------------------------- //
    // Price ticks / settlement
    // ---------------------------------------------------------------- //

    pub async fn process_price_tick(&self, symbol: &str) -> EngineResult<()> {
        let pair = match self.market.fetch_ticker(symbol).await? {
            Some(p) => p,
            None => return Ok(()),
        };
        let open = self
            .orders
            .list(ListFilter { status_open_only: true, symbol: Some(symbol), ..Default::default() })
            .await?;
        for order in open {
            self.process_single_order(&order.id, &pair).await?;
        }
        Ok(())
    }

    /// Re-reads the order so a stale caller (a tick iterating a snapshot, or
    /// a delayed market settle) never acts on out-of-date state.
    pub async fn process_single_order(&self, order_id: &str, pair: &TradingPair) -> EngineResult<()> {
        let mut order = match self.orders.get(order_id).await {
            Ok(o) => o,
            Err(EngineError::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        };
        if !order.is_open() {
            return Ok(());
        }
        let need = order.amount_remain();
        if need <= FILLED_EPSILON {
            return Ok(());
        }

        let symbol = order.symbol.clone();
        let (base, quote) = base_quote(&symbol)?;
        let is_buy = matches!(order.side, OrderSide::Buy);

        let volume = if is_buy { pair.ask_volume } else { pair.bid_volume };
        let avail = {
            let mut rng = rand::thread_rng();
            slippage::fillable_volume(volume, self.config.sigma_fill, &mut rng)
        };
        if avail <= 0.0 {
            return Ok(());
        }
        let fillable = avail.min(need);
        let order_will_close = fillable >= need - FILLED_EPSILON;

        if order.r#type == OrderType::Limit {
            let limit_price = order.limit_price.unwrap_or(pair.price);
            let crosses = if is_buy { pair.ask <= limit_price } else { pair.bid >= limit_price };
            if !crosses {
                return Ok(());
            }
        }

        let px = if is_buy { pair.ask } else { pair.bid };
        let filled_notion = fillable * px;
        let filled_fee = filled_notion * self.config.commission;

        // Mid-execution reservation shortfall check (§4.7 step 6): external
        // tampering between reservation and fill must reject, not panic or
        // silently under-settle.
        let shortfall = if is_buy {
            let need_quote = fillable * px * (1.0 + self.config.commission);
            let total_quote = self.portfolio.get(quote).await?.total();
            total_quote + EPSILON < need_quote
        } else {
            let total_base = self.portfolio.get(base).await?.total();
            let need_fee = fillable * px * self.config.commission;
            let total_quote = self.portfolio.get(quote).await?.total();
            total_base + EPSILON < fillable || total_quote + EPSILON < need_fee
        };

        let order_was_new = order.actual_filled <= FILLED_EPSILON;

        if shortfall {
            self.reject_on_shortfall(&mut order, base, quote).await?;
            return Ok(());
        }

        match order.side {
            OrderSide::Buy => {
                let release_amt = if order_will_close { order.residual_quote() } else { filled_notion + filled_fee };
                self.settle_buy_fill(quote, base, release_amt, fillable).await?;
            }
            OrderSide::Sell => {
                let base_release = if order_will_close { order.residual_base() } else { fillable };
                let fee_release = if order_will_close { order.reserved_fee_left } else { filled_fee };
                let proceeds = filled_notion - filled_fee;
                self.settle_sell_fill(base, quote, base_release, fee_release, proceeds).await?;
            }
        }

        order.actual_filled += fillable;
        order.actual_notion += filled_notion;
        order.actual_fee += filled_fee;
        order.price = Some(order.actual_notion / order.actual_filled);
        order.reserved_notion_left = (order.reserved_notion_left - if is_buy { filled_notion } else { 0.0 }).max(0.0);
        order.reserved_fee_left = (order.reserved_fee_left - filled_fee).max(0.0);

        let ts = now_ms();
        let status = if order_will_close { OrderStatus::Filled } else { OrderStatus::PartiallyFilled };
        transition(&mut order, ts, status, Some(fillable), Some(px), None);
        self.orders.update_with_index_transition(&order, true).await?;

        self.record_fill(order.side, base, quote, order_was_new, fillable, filled_notion, filled_fee).await?;
        Ok(())
    }

    async fn reject_on_shortfall(&self, order: &mut Order, base: &str, quote: &str) -> EngineResult<()> {
        let residual_quote = order.residual_quote();
        if residual_quote > 0.0 {
            self.portfolio.release(quote, residual_quote).await?;
        }
        if matches!(order.side, OrderSide::Sell) {
            let residual_base = order.residual_base();
            if residual_base > 0.0 {
                self.portfolio.release(base, residual_base).await?;
            }
        }
        let ts = now_ms();
        let status = closing_status(order, true, CloseKind::Reject);
        transition(order, ts, status, None, None, Some("insufficient reserve at fill time".to_string()));
        self.orders.update_with_index_transition(order, true).await?;
        Ok(())
    }

    async fn settle_buy_fill(&self, quote: &str, base: &str, release_from_quote: f64, credit_base: f64) -> EngineResult<()> {
        let mut qbal = self.portfolio.get(quote).await?;
        qbal.used = (qbal.used - release_from_quote).max(0.0);
        qbal.clamp_dust();

        let mut bbal = self.portfolio.get(base).await?;
        bbal.free += credit_base;

        self.portfolio.set_many(&[(quote, qbal), (base, bbal)]).await
    }

    async fn settle_sell_fill(&self, base: &str, quote: &str, release_from_base: f64, release_from_quote_fee: f64, credit_quote: f64) -> EngineResult<()> {
        let mut bbal = self.portfolio.get(base).await?;
        bbal.used = (bbal.used - release_from_base).max(0.0);
        bbal.clamp_dust();

        let mut qbal = self.portfolio.get(quote).await?;
        qbal.used = (qbal.used - release_from_quote_fee).max(0.0);
        qbal.clamp_dust();
        // The released fee reservation returns to `free` first, then the net
        // sale proceeds (`filled_notion - filled_fee`) are credited on top —
        // crediting only `credit_quote` here would charge the fee twice.
        qbal.free += release_from_quote_fee + credit_quote;

        self.portfolio.set_many(&[(base, bbal), (quote, qbal)]).await
    }

    // ---------------------------------------------------------------- //
    // Trade counters
    // ---------------------------------------------------------------- //

    async fn record_fill(&self, side: OrderSide, base: &str, quote: &str, order_was_new: bool, amount: f64, notional: f64, fee: f64) -> EngineResult<()> {
        let side_str = side.to_string();
        if order_was_new {
            self.bump_stat(&side_str, base, "count", quote, 1.0).await?;
        }
        self.bump_stat(&side_str, base, "amount", quote, amount).await?;
        self.bump_stat(&side_str, base, "notional", quote, notional).await?;
        self.bump_stat(&side_str, base, "fee", quote, fee).await?;
        Ok(())
    }

    async fn bump_stat(&self, side: &str, base: &str, metric: &str, quote_field: &str, delta: f64) -> EngineResult<()> {
        let hash_key = keys::trade_stat_hash(side, base, metric);
        self.store.hash_incr_float(&hash_key, quote_field, delta).await?;
        self.store.set_add(&keys::trade_stat_index(metric), &hash_key).await?;
        Ok(())
    }

    pub async fn get_trade_stats(&self, side: Option<OrderSide>, assets: Option<&[String]>) -> EngineResult<HashMap<String, TradeStatBucket>> {
        let mut out = HashMap::new();
        for s in [OrderSide::Buy, OrderSide::Sell] {
            if let Some(wanted) = side {
                if wanted != s {
                    continue;
                }
            }
            let side_str = s.to_string();
            let mut bucket = TradeStatBucket::default();
            for metric in ["count", "amount", "notional", "fee"] {
                let index = self.store.set_members(&keys::trade_stat_index(metric)).await?;
                let prefix = format!("trades:{side_str}:");
                for hash_key in index.into_iter().filter(|k| k.starts_with(&prefix)) {
                    if let Some(asset_filter) = assets {
                        let base = hash_key.trim_start_matches(&prefix).trim_end_matches(&format!(":{metric}"));
                        if !asset_filter.iter().any(|a| a == base) {
                            continue;
                        }
                    }
                    let fields = self.store.hash_get_all(&hash_key).await?;
                    let sum: f64 = fields.iter().filter_map(|(_, v)| v.parse::<f64>().ok()).sum();
                    match metric {
                        "count" => bucket.count += sum as u64,
                        "amount" => bucket.amount += sum,
                        "notional" => bucket.notional += sum,
                        "fee" => bucket.fee += sum,
                        _ => unreachable!(),
                    }
                }
            }
            out.insert(side_str.to_uppercase(), bucket);
        }
        Ok(out)
    }

    // ---------------------------------------------------------------- //
    // Admin operations
    // ---------------------------------------------------------------- //

    pub async fn deposit_asset(&self, asset: &str, amount: f64) -> EngineResult<()> {
        if !(amount > 0.0) {
            return Err(EngineError::validation("deposit amount must be positive"));
        }
        let mut bal = self.portfolio.get(asset).await?;
        bal.free += amount;
        self.portfolio.set(asset, bal).await?;

        let ref_value = self.ref_value(asset, amount).await?;
        let account = InvestmentAccount { ref_symbol: format!("{asset}/{}", self.config.cash_asset), asset_quantity: amount, ref_value };
        let raw = serde_json::to_string(&account).map_err(crate::error::StoreError::from)?;
        self.store.hash_set(&keys::deposit_account(asset), "latest", &raw).await?;
        self.store.set_add(keys::DEPOSITS_INDEX, asset).await?;
        Ok(())
    }

    pub async fn withdraw_asset(&self, asset: &str, amount: f64) -> EngineResult<()> {
        if !(amount > 0.0) {
            return Err(EngineError::validation("withdraw amount must be positive"));
        }
        let mut bal = self.portfolio.get(asset).await?;
        if bal.free < amount {
            return Err(EngineError::validation(format!("insufficient free {asset} to withdraw")));
        }
        bal.free -= amount;
        self.portfolio.set(asset, bal).await?;

        let ref_value = self.ref_value(asset, amount).await?;
        let account = InvestmentAccount { ref_symbol: format!("{asset}/{}", self.config.cash_asset), asset_quantity: amount, ref_value };
        let raw = serde_json::to_string(&account).map_err(crate::error::StoreError::from)?;
        self.store.hash_set(&keys::withdrawal_account(asset), "latest", &raw).await?;
        self.store.set_add(keys::WITHDRAWALS_INDEX, asset).await?;
        Ok(())
    }

    /// Falls back to 0 when the cash-relative price is unavailable, per the
    /// decision recorded in DESIGN.md (matches the original source rather
    /// than the spec's suggested "flag" enhancement).
    async fn ref_value(&self, asset: &str, amount: f64) -> EngineResult<f64> {
        if asset == self.config.cash_asset {
            return Ok(amount);
        }
        let symbol = format!("{asset}/{}", self.config.cash_asset);
        match self.market.last_price(&symbol).await {
            Ok(price) => Ok(amount * price),
            Err(_) => Ok(0.0),
        }
    }

    pub async fn set_balance(&self, asset: &str, free: f64, used: f64) -> EngineResult<()> {
        self.portfolio.set(asset, AssetBalance::new(free, used)).await
    }

    pub async fn set_ticker(&self, symbol: &str, price: f64, bid_volume: Option<f64>, ask_volume: Option<f64>) -> EngineResult<()> {
        let ts = now_ms() as f64 / 1000.0;
        let pair = TradingPair {
            symbol: symbol.to_string(),
            price,
            timestamp: ts,
            bid: price,
            ask: price,
            bid_volume: bid_volume.unwrap_or(1e12),
            ask_volume: ask_volume.unwrap_or(1e12),
        };
        self.market.set_last_price(&pair).await
    }

    pub async fn reset(&self) -> EngineResult<()> {
        self.portfolio.clear().await?;
        self.orders.clear().await?;
        for metric in ["count", "amount", "notional", "fee"] {
            let index_key = keys::trade_stat_index(metric);
            for hash_key in self.store.set_members(&index_key).await? {
                self.store.delete(&hash_key).await?;
            }
            self.store.delete(&index_key).await?;
        }
        for (index_key, prefix_fn) in [
            (keys::DEPOSITS_INDEX, keys::deposit_account as fn(&str) -> String),
            (keys::WITHDRAWALS_INDEX, keys::withdrawal_account as fn(&str) -> String),
        ] {
            for asset in self.store.set_members(index_key).await? {
                self.store.delete(&prefix_fn(&asset)).await?;
            }
            self.store.delete(index_key).await?;
        }
        Ok(())
    }

    // ---------------------------------------------------------------- //
    // Maintenance
    // ---------------------------------------------------------------- //

    pub async fn prune_orders_older_than(&self, age_secs: u64) -> EngineResult<u64> {
        let cutoff = now_ms() - (age_secs as i64 * 1000);
        let all = self.orders.list(ListFilter::default()).await?;
        let mut pruned = 0;
        for order in all {
            if order.status.is_closed() && order.ts_finish.map(|t| t < cutoff).unwrap_or(false) {
                self.orders.remove(&order.id).await?;
                pruned += 1;
            }
        }
        Ok(pruned)
    }

    pub async fn expire_orders_older_than(&self, age_secs: u64) -> EngineResult<u64> {
        let cutoff = now_ms() - (age_secs as i64 * 1000);
        let open = self.orders.list(ListFilter { status_open_only: true, ..Default::default() }).await?;
        let mut expired = 0;
        for mut order in open {
            if order.ts_update >= cutoff {
                continue;
            }
            let (base, quote) = base_quote(&order.symbol)?;
            let residual_quote = order.residual_quote();
            if residual_quote > 0.0 {
                self.portfolio.release(quote, residual_quote).await?;
            }
            if matches!(order.side, OrderSide::Sell) {
                let residual_base = order.residual_base();
                if residual_base > 0.0 {
                    self.portfolio.release(base, residual_base).await?;
                }
            }
            let ts = now_ms();
            let status = closing_status(&order, true, CloseKind::Expire);
            transition(&mut order, ts, status, None, None, Some("expired".to_string()));
            self.orders.update_with_index_transition(&order, true).await?;
            expired += 1;
        }
        Ok(expired)
    }

    pub async fn check_consistency(&self) -> EngineResult<Vec<ConsistencyMismatch>> {
        let open = self.orders.list(ListFilter { status_open_only: true, ..Default::default() }).await?;
        let mut expected: HashMap<String, f64> = HashMap::new();
        for order in &open {
            let (base, quote) = base_quote(&order.symbol)?;
            *expected.entry(quote.to_string()).or_default() += order.residual_quote();
            if matches!(order.side, OrderSide::Sell) {
                *expected.entry(base.to_string()).or_default() += order.residual_base();
            }
        }
        let portfolio = self.portfolio.all().await?;
        let mut mismatches = Vec::new();
        let mut assets: Vec<&String> = expected.keys().chain(portfolio.keys()).collect();
        assets.sort();
        assets.dedup();
        for asset in assets {
            let expected_used = *expected.get(asset).unwrap_or(&0.0);
            let actual_used = portfolio.get(asset).map(|b| b.used).unwrap_or(0.0);
            if (expected_used - actual_used).abs() > EPSILON {
                mismatches.push(ConsistencyMismatch { asset: asset.clone(), expected_used, actual_used });
            }
        }
        Ok(mismatches)
    }

    // ---------------------------------------------------------------- //
    // Overviews
    // ---------------------------------------------------------------- //

    pub async fn get_summary_capital(&self) -> EngineResult<(f64, f64, f64, f64)> {
        let portfolio = self.portfolio.all().await?;
        let mut equity = 0.0;
        for (asset, bal) in &portfolio {
            equity += self.ref_value(asset, bal.total()).await.unwrap_or(0.0);
        }
        let deposits = self.sum_investment_accounts(keys::DEPOSITS_INDEX, keys::deposit_account as fn(&str) -> String).await?;
        let withdrawals = self.sum_investment_accounts(keys::WITHDRAWALS_INDEX, keys::withdrawal_account as fn(&str) -> String).await?;
        let profit_loss = equity - (deposits - withdrawals);
        Ok((equity, deposits, withdrawals, profit_loss))
    }

    async fn sum_investment_accounts(&self, index_key: &str, key_fn: fn(&str) -> String) -> EngineResult<f64> {
        let mut total = 0.0;
        for asset in self.store.set_members(index_key).await? {
            if let Some(raw) = self.store.hash_get(&key_fn(&asset), "latest").await? {
                if let Ok(account) = serde_json::from_str::<InvestmentAccount>(&raw) {
                    total += account.ref_value;
                }
            }
        }
        Ok(total)
    }

    /// Freezes a single price snapshot across every asset referenced by the
    /// portfolio or an open order, then reconciles two independent views of
    /// "frozen": the portfolio's own `used` field versus the sum of residual
    /// reservations recomputed from open orders (the same computation
    /// `check_consistency` does, but expressed in cash-asset value).
    pub async fn get_summary_assets(&self) -> EngineResult<AssetsSummary> {
        let portfolio = self.portfolio.all().await?;
        let open = self.orders.list(ListFilter { status_open_only: true, ..Default::default() }).await?;

        let mut order_residual: HashMap<String, f64> = HashMap::new();
        for order in &open {
            let (base, quote) = base_quote(&order.symbol)?;
            *order_residual.entry(quote.to_string()).or_default() += order.residual_quote();
            if matches!(order.side, OrderSide::Sell) {
                *order_residual.entry(base.to_string()).or_default() += order.residual_base();
            }
        }

        let mut assets: Vec<&String> = portfolio.keys().chain(order_residual.keys()).collect();
        assets.sort();
        assets.dedup();

        let mut summary = AssetsSummary::default();
        for asset in assets {
            let bal = portfolio.get(asset).copied().unwrap_or_default();
            let price = self.ref_value(asset, 1.0).await.unwrap_or(0.0);
            let free_value = bal.free * price;
            let frozen_value = bal.used * price;
            let frozen_from_orders = order_residual.get(asset).copied().unwrap_or(0.0) * price;

            if (frozen_value - frozen_from_orders).abs() > 1e-3 {
                summary.mismatches.push(asset.clone());
            }

            if asset == &self.config.cash_asset {
                summary.cash_free_value += free_value;
                summary.cash_frozen_value += frozen_value;
            } else {
                summary.assets_free_value += free_value;
                summary.assets_frozen_value += frozen_value;
            }
        }

        summary.assets_total_value = summary.assets_free_value + summary.assets_frozen_value;
        summary.cash_total_value = summary.cash_free_value + summary.cash_frozen_value;
        summary.total_free_value = summary.assets_free_value + summary.cash_free_value;
        summary.total_frozen_value = summary.assets_frozen_value + summary.cash_frozen_value;
        summary.total_equity = summary.total_free_value + summary.total_frozen_value;

        Ok(summary)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ---------------------------------------------------------------- //
    // Read-only surface
    // ---------------------------------------------------------------- //

    pub async fn list_symbols(&self) -> EngineResult<Vec<String>> {
        self.market.tickers().await
    }

    pub async fn fetch_ticker(&self, symbol: &str) -> EngineResult<Option<TradingPair>> {
        self.market.fetch_ticker(symbol).await
    }

    pub async fn fetch_balance(&self, asset: Option<&str>) -> EngineResult<HashMap<String, AssetBalance>> {
        match asset {
            Some(a) => {
                let mut out = HashMap::new();
                out.insert(a.to_string(), self.portfolio.get(a).await?);
                Ok(out)
            }
            None => self.portfolio.all().await,
        }
    }

    pub async fn list_assets(&self) -> EngineResult<Vec<String>> {
        let mut assets: Vec<String> = self.portfolio.all().await?.into_keys().collect();
        assets.sort();
        Ok(assets)
    }

    pub async fn get_order(&self, id: &str, include_history: bool) -> EngineResult<Order> {
        let order = self.orders.get(id).await?;
        Ok(order.strip_history_unless(include_history))
    }

    pub async fn list_orders(
        &self,
        status_open_only: bool,
        status: Option<OrderStatus>,
        symbol: Option<&str>,
        side: Option<OrderSide>,
        tail: Option<usize>,
        include_history: bool,
    ) -> EngineResult<Vec<Order>> {
        let orders = self.orders.list(ListFilter { status_open_only, status, symbol, side, tail }).await?;
        Ok(orders.into_iter().map(|o| o.strip_history_unless(include_history)).collect())
    }

    /// Liveness probe: the store answers, nothing more. Grounded on the
    /// teacher's `/health` handler, which likewise just round-trips a
    /// connection check rather than asserting business invariants.
    pub async fn health(&self) -> EngineResult<bool> {
        self.market.tickers().await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests;
