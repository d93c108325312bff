use crate::models::{Order, OrderStatus};

/// Transition `order` to `status`, appending a history entry and, if the
/// new status is terminal, squashing residual bookings and stamping
/// `ts_finish`. Centralizes what was three copies of the same bookkeeping
/// in the original implementation (cancel, reject-on-fill, expire).
pub fn transition(order: &mut Order, now_ms: i64, status: OrderStatus, fill_amount: Option<f64>, fill_price: Option<f64>, comment: Option<String>) {
    order.status = status;
    order.ts_update = now_ms;
    if status.is_closed() {
        order.squash_residuals();
        order.ts_finish = Some(now_ms);
    }
    order.push_history(now_ms, status, fill_amount, fill_price, comment);
}

/// Resolve the close-vs-partial variant of a transition family from whether
/// anything has ever been filled.
pub fn closing_status(order: &Order, fully_closed: bool, kind: CloseKind) -> OrderStatus {
    let ever_filled = order.actual_filled > 0.0;
    match (kind, fully_closed, ever_filled) {
        (CloseKind::Cancel, true, false) => OrderStatus::Canceled,
        (CloseKind::Cancel, true, true) => OrderStatus::PartiallyCanceled,
        (CloseKind::Reject, _, false) => OrderStatus::Rejected,
        (CloseKind::Reject, _, true) => OrderStatus::PartiallyRejected,
        (CloseKind::Expire, _, false) => OrderStatus::Expired,
        (CloseKind::Expire, _, true) => OrderStatus::PartiallyExpired,
        (CloseKind::Cancel, false, _) => unreachable!("cancel always fully closes the order"),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    Cancel,
    Reject,
    Expire,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderSide, OrderType};

    fn new_order() -> Order {
        Order {
            id: "1".into(),
            symbol: "BTC/USDT".into(),
            side: OrderSide::Buy,
            r#type: OrderType::Limit,
            amount: 10.0,
            limit_price: Some(100.0),
            fee_rate: 0.0,
            fee_currency: "USDT".into(),
            notion_currency: "USDT".into(),
            initial_booked_notion: 1000.0,
            initial_booked_fee: 0.0,
            reserved_notion_left: 1000.0,
            reserved_fee_left: 0.0,
            actual_filled: 0.0,
            actual_notion: 0.0,
            actual_fee: 0.0,
            price: None,
            status: OrderStatus::New,
            ts_create: 0,
            ts_update: 0,
            ts_finish: None,
            history: vec![],
        }
    }

    #[test]
    fn terminal_transition_squashes_and_stamps() {
        let mut order = new_order();
        transition(&mut order, 42, OrderStatus::Canceled, None, None, Some("user cancel".into()));
        assert_eq!(order.reserved_notion_left, 0.0);
        assert_eq!(order.ts_finish, Some(42));
        assert_eq!(order.history.len(), 1);
    }

    #[test]
    fn closing_status_picks_partial_variant_when_ever_filled() {
        let mut order = new_order();
        order.actual_filled = 3.0;
        assert_eq!(closing_status(&order, true, CloseKind::Cancel), OrderStatus::PartiallyCanceled);
        assert_eq!(closing_status(&order, true, CloseKind::Reject), OrderStatus::PartiallyRejected);
    }
}
