//! Centralizes the key layout from §4.1 so no call site hand-builds a key.

pub fn ticker(symbol: &str) -> String {
    format!("sym_{symbol}")
}

pub const TICKER_PREFIX: &str = "sym_";

pub const ORDERS_HASH: &str = "orders";
pub const OPEN_ALL_SET: &str = "open:set";

pub fn open_symbol_set(symbol: &str) -> String {
    format!("open:{symbol}")
}

pub const OPEN_SYMBOL_PREFIX: &str = "open:";

pub const PORTFOLIO_HASH: &str = "portfolio";

/// Hash holding one metric (`count`/`amount`/`notional`/`fee`) for a given
/// `(side, base)` pair; its fields are keyed by quote asset (or
/// fee-currency, for the `fee` metric).
pub fn trade_stat_hash(side: &str, base: &str, metric: &str) -> String {
    format!("trades:{side}:{base}:{metric}")
}

/// Set enumerating every `trade_stat_hash` key that exists for `metric`.
pub fn trade_stat_index(metric: &str) -> String {
    format!("trades:index:{metric}")
}

pub fn deposit_account(asset: &str) -> String {
    format!("deposits:{asset}")
}

pub fn withdrawal_account(asset: &str) -> String {
    format!("withdrawals:{asset}")
}

pub const DEPOSITS_INDEX: &str = "deposits:index";
pub const WITHDRAWALS_INDEX: &str = "withdrawals:index";

pub const LEADER_LOCK: &str = "engine:leader";
