//! Configuration for a single order book.

use serde::{Deserialize, Serialize};

use crate::constants;

/// Per-book configuration, passed explicitly to `OrderBook::new`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BookConfig {
    /// Reference price for market orders when the book is empty on both sides.
    pub default_market_order_price: u64,
    /// Stop continuous matching when an aggressor meets its own party's order.
    pub check_wash_trades: bool,
    /// Dump every price level through `tracing` after each mutation.
    pub log_price_levels_debug: bool,
    /// Log each order removed from the book.
    pub log_removed_orders_debug: bool,
}

impl Default for BookConfig {
    fn default() -> Self {
        Self {
            default_market_order_price: constants::DEFAULT_MARKET_ORDER_PRICE,
            check_wash_trades: true,
            log_price_levels_debug: false,
            log_removed_orders_debug: false,
        }
    }
}

impl BookConfig {
    #[must_use]
    pub fn with_default_market_order_price(mut self, price: u64) -> Self {
        self.default_market_order_price = price;
        self
    }

    #[must_use]
    pub fn with_wash_trade_check(mut self, enabled: bool) -> Self {
        self.check_wash_trades = enabled;
        self
    }
}
