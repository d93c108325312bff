use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

impl std::str::FromStr for OrderSide {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buy" => Ok(OrderSide::Buy),
            "sell" => Ok(OrderSide::Sell),
            other => Err(format!("unknown side: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Market => write!(f, "market"),
            OrderType::Limit => write!(f, "limit"),
        }
    }
}

impl std::str::FromStr for OrderType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "market" => Ok(OrderType::Market),
            "limit" => Ok(OrderType::Limit),
            other => Err(format!("unknown order type: {other}")),
        }
    }
}

/// The nine-state order lifecycle. `OPEN = {New, PartiallyFilled}`, every
/// other variant is `CLOSED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    PartiallyCanceled,
    Expired,
    PartiallyExpired,
    Rejected,
    PartiallyRejected,
}

impl OrderStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, OrderStatus::New | OrderStatus::PartiallyFilled)
    }

    pub fn is_closed(&self) -> bool {
        !self.is_open()
    }

    /// Human-readable label, e.g. `partially_filled` -> `Partially Filled`.
    pub fn label(&self) -> String {
        let raw = self.as_str();
        raw.split('_')
            .map(|word| {
                let mut c = word.chars();
                match c.next() {
                    Some(first) => first.to_uppercase().collect::<String>() + c.as_str(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "new",
            OrderStatus::PartiallyFilled => "partially_filled",
            OrderStatus::Filled => "filled",
            OrderStatus::Canceled => "canceled",
            OrderStatus::PartiallyCanceled => "partially_canceled",
            OrderStatus::Expired => "expired",
            OrderStatus::PartiallyExpired => "partially_expired",
            OrderStatus::Rejected => "rejected",
            OrderStatus::PartiallyRejected => "partially_rejected",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One append-only entry in an order's `history`. `fill` details are only
/// present on execution-related transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub ts: i64,
    pub status: OrderStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fill_amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fill_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub r#type: OrderType,
    pub amount: f64,
    pub limit_price: Option<f64>,

    pub fee_rate: f64,
    pub fee_currency: String,
    pub notion_currency: String,

    /// Notion reserved at creation time (0 for sells: only base + fee are
    /// reserved up front).
    pub initial_booked_notion: f64,
    pub initial_booked_fee: f64,
    pub reserved_notion_left: f64,
    pub reserved_fee_left: f64,

    pub actual_filled: f64,
    pub actual_notion: f64,
    pub actual_fee: f64,
    /// Volume-weighted average execution price, `None` until the first fill.
    pub price: Option<f64>,

    pub status: OrderStatus,

    pub ts_create: i64,
    pub ts_update: i64,
    pub ts_finish: Option<i64>,

    pub history: Vec<HistoryEntry>,
}

impl Order {
    pub fn amount_remain(&self) -> f64 {
        self.amount - self.actual_filled
    }

    /// Reserved base still backing this order (sell side only has a base
    /// residual; buys never reserve base).
    pub fn residual_base(&self) -> f64 {
        if matches!(self.side, OrderSide::Sell) {
            self.amount_remain().max(0.0)
        } else {
            0.0
        }
    }

    pub fn residual_quote(&self) -> f64 {
        self.reserved_notion_left + self.reserved_fee_left
    }

    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }

    pub fn squash_residuals(&mut self) {
        self.reserved_notion_left = 0.0;
        self.reserved_fee_left = 0.0;
    }

    pub fn push_history(&mut self, ts: i64, status: OrderStatus, fill_amount: Option<f64>, fill_price: Option<f64>, comment: Option<String>) {
        self.history.push(HistoryEntry {
            ts,
            status,
            fill_amount,
            fill_price,
            comment,
        });
    }

    /// Drops `history` unless the caller asked to see it. Read paths default
    /// to `false` so a list of many orders doesn't ship every transition of
    /// every order by default.
    pub fn strip_history_unless(mut self, include_history: bool) -> Self {
        if !include_history {
            self.history.clear();
        }
        self
    }
}
