pub mod balance;
pub mod market;
pub mod order;
pub mod stats;

pub use balance::AssetBalance;
pub use market::TradingPair;
pub use order::{Order, OrderSide, OrderStatus, OrderType};
pub use stats::{InvestmentAccount, TradeStatBucket};
