pub mod state_machine;

use std::sync::Arc;

use crate::error::{EngineError, EngineResult};
use crate::models::{Order, OrderSide, OrderStatus};
use crate::store::{keys, Store, StoreOp};

/// Canonical order records plus the open-order secondary indexes
/// (`open:set`, `open:<SYMBOL>`). Grounded on `orderbook.py`, with one
/// deliberate divergence: `update()` here never touches the indexes —
/// maintaining them is the execution engine's duty, since it already knows
/// the old and new status at every transition site.
pub struct OrderStore<S: Store> {
    store: Arc<S>,
}

#[derive(Debug, Clone, Default)]
pub struct ListFilter<'a> {
    /// Fast path: any open status (`New` or `PartiallyFilled`), served off
    /// the `open:*` index sets rather than a full hash scan.
    pub status_open_only: bool,
    /// Filter down to one exact status. When it names an open status this
    /// still takes the open-index fast path (the index may hold more than
    /// one open status) and filters the result to the exact match;
    /// otherwise it falls back to a full hash scan, per
    /// `orderbook.py`'s `status` filter.
    pub status: Option<OrderStatus>,
    pub symbol: Option<&'a str>,
    pub side: Option<OrderSide>,
    pub tail: Option<usize>,
}

impl<S: Store> OrderStore<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Insert a brand-new order and, if open, add it to both indexes.
    pub async fn add(&self, order: &Order) -> EngineResult<()> {
        let blob = serde_json::to_string(order).map_err(crate::error::StoreError::from)?;
        self.store.hash_set(keys::ORDERS_HASH, &order.id, &blob).await?;
        if order.is_open() {
            self.add_to_indexes(order).await?;
        }
        Ok(())
    }

    /// Overwrite the stored record. Does not touch the open indexes.
    pub async fn update(&self, order: &Order) -> EngineResult<()> {
        let blob = serde_json::to_string(order).map_err(crate::error::StoreError::from)?;
        self.store.hash_set(keys::ORDERS_HASH, &order.id, &blob).await?;
        Ok(())
    }

    pub async fn add_to_indexes(&self, order: &Order) -> EngineResult<()> {
        self.store.set_add(keys::OPEN_ALL_SET, &order.id).await?;
        self.store.set_add(&keys::open_symbol_set(&order.symbol), &order.id).await?;
        Ok(())
    }

    pub async fn remove_from_indexes(&self, order: &Order) -> EngineResult<()> {
        self.store.set_rem(keys::OPEN_ALL_SET, &order.id).await?;
        self.store.set_rem(&keys::open_symbol_set(&order.symbol), &order.id).await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> EngineResult<Order> {
        let blob = self
            .store
            .hash_get(keys::ORDERS_HASH, id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("order {id} not found")))?;
        serde_json::from_str(&blob).map_err(|e| EngineError::from(crate::error::StoreError::from(e)))
    }

    pub async fn list(&self, filter: ListFilter<'_>) -> EngineResult<Vec<Order>> {
        let use_open_index = filter.status_open_only || filter.status.map(|s| s.is_open()).unwrap_or(false);

        let mut orders: Vec<Order> = if use_open_index {
            let ids = if let Some(symbol) = filter.symbol {
                self.store.set_members(&keys::open_symbol_set(symbol)).await?
            } else {
                self.store.set_members(keys::OPEN_ALL_SET).await?
            };
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            let blobs = self.store.hash_mget(keys::ORDERS_HASH, &ids).await?;
            blobs.into_iter().flatten().filter_map(|b| serde_json::from_str(&b).ok()).collect()
        } else {
            let all = self.store.hash_get_all(keys::ORDERS_HASH).await?;
            let mut orders: Vec<Order> = all.into_iter().filter_map(|(_, blob)| serde_json::from_str(&blob).ok()).collect();
            if let Some(symbol) = filter.symbol {
                orders.retain(|o| o.symbol == symbol);
            }
            orders
        };

        if let Some(status) = filter.status {
            orders.retain(|o| o.status == status);
        }
        if let Some(side) = filter.side {
            orders.retain(|o| o.side == side);
        }

        orders.sort_by(|a, b| b.ts_update.cmp(&a.ts_update));
        if let Some(tail) = filter.tail {
            orders.truncate(tail);
        }
        Ok(orders)
    }

    /// Erase a record and, if it was open, drop it from both indexes.
    /// Idempotent: a missing id is a no-op.
    pub async fn remove(&self, id: &str) -> EngineResult<()> {
        let blob = match self.store.hash_get(keys::ORDERS_HASH, id).await? {
            Some(b) => b,
            None => return Ok(()),
        };
        if let Ok(order) = serde_json::from_str::<Order>(&blob) {
            if order.is_open() {
                self.remove_from_indexes(&order).await?;
            }
        }
        self.store.hash_del(keys::ORDERS_HASH, id).await?;
        Ok(())
    }

    pub async fn clear(&self) -> EngineResult<()> {
        self.store.delete(keys::ORDERS_HASH).await?;
        self.store.delete(keys::OPEN_ALL_SET).await?;
        let symbol_sets = self.store.scan_keys(keys::OPEN_SYMBOL_PREFIX).await?;
        for key in symbol_sets {
            self.store.delete(&key).await?;
        }
        Ok(())
    }

    /// Batch an order update alongside index changes as one atomic write.
    pub async fn update_with_index_transition(&self, order: &Order, was_open: bool) -> EngineResult<()> {
        let blob = serde_json::to_string(order).map_err(crate::error::StoreError::from)?;
        let mut ops = vec![StoreOp::HashSet {
            key: keys::ORDERS_HASH.to_string(),
            field: order.id.clone(),
            value: blob,
        }];
        let now_open = order.is_open();
        if was_open && !now_open {
            ops.push(StoreOp::SetRem { key: keys::OPEN_ALL_SET.to_string(), member: order.id.clone() });
            ops.push(StoreOp::SetRem { key: keys::open_symbol_set(&order.symbol), member: order.id.clone() });
        } else if !was_open && now_open {
            ops.push(StoreOp::SetAdd { key: keys::OPEN_ALL_SET.to_string(), member: order.id.clone() });
            ops.push(StoreOp::SetAdd { key: keys::open_symbol_set(&order.symbol), member: order.id.clone() });
        }
        self.store.pipeline(ops).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderStatus, OrderType};
    use crate::store::MemoryStore;

    fn sample_order(id: &str, symbol: &str, status: OrderStatus) -> Order {
        Order {
            id: id.to_string(),
            symbol: symbol.to_string(),
            side: OrderSide::Buy,
            r#type: OrderType::Limit,
            amount: 1.0,
            limit_price: Some(100.0),
            fee_rate: 0.0,
            fee_currency: "USDT".to_string(),
            notion_currency: "USDT".to_string(),
            initial_booked_notion: 100.0,
            initial_booked_fee: 0.0,
            reserved_notion_left: 100.0,
            reserved_fee_left: 0.0,
            actual_filled: 0.0,
            actual_notion: 0.0,
            actual_fee: 0.0,
            price: None,
            status,
            ts_create: 1,
            ts_update: 1,
            ts_finish: None,
            history: vec![],
        }
    }

    #[tokio::test]
    async fn add_indexes_open_orders() {
        let os = OrderStore::new(Arc::new(MemoryStore::new()));
        let order = sample_order("1", "BTC/USDT", OrderStatus::New);
        os.add(&order).await.unwrap();

        let open = os.list(ListFilter { status_open_only: true, ..Default::default() }).await.unwrap();
        assert_eq!(open.len(), 1);
    }

    #[tokio::test]
    async fn update_does_not_touch_indexes() {
        let os = OrderStore::new(Arc::new(MemoryStore::new()));
        let mut order = sample_order("1", "BTC/USDT", OrderStatus::New);
        os.add(&order).await.unwrap();

        order.status = OrderStatus::Filled;
        os.update(&order).await.unwrap();

        let open = os.list(ListFilter { status_open_only: true, ..Default::default() }).await.unwrap();
        assert_eq!(open.len(), 1, "update() must not mutate indexes on its own");
    }

    #[tokio::test]
    async fn update_with_index_transition_removes_closed_orders() {
        let os = OrderStore::new(Arc::new(MemoryStore::new()));
        let mut order = sample_order("1", "BTC/USDT", OrderStatus::New);
        os.add(&order).await.unwrap();

        order.status = OrderStatus::Filled;
        os.update_with_index_transition(&order, true).await.unwrap();

        let open = os.list(ListFilter { status_open_only: true, ..Default::default() }).await.unwrap();
        assert!(open.is_empty());
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let os = OrderStore::new(Arc::new(MemoryStore::new()));
        os.remove("missing").await.unwrap();
    }
}
