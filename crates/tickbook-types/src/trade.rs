//! Trades produced by uncrossing.
//!
//! A [`Trade`] is created once, as a byproduct of matching, and never
//! mutated afterwards.

use serde::{Deserialize, Serialize};

use crate::{MarketId, OrderId, PartyId, Side, Timestamp, TradeId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    /// Deterministic from (aggressor order, batch, fill sequence).
    pub id: TradeId,
    pub market_id: MarketId,
    /// Passive order's price in continuous trading, the uncrossing price
    /// when leaving an auction.
    pub price: u64,
    pub size: u64,
    pub buyer: PartyId,
    pub seller: PartyId,
    pub buy_order: OrderId,
    pub sell_order: OrderId,
    /// `None` for trades generated by an auction uncross.
    pub aggressor: Option<Side>,
    pub batch_id: u64,
    pub timestamp: Timestamp,
}

impl Trade {
    /// `price × size`, widened so it cannot overflow.
    #[must_use]
    pub fn notional(&self) -> u128 {
        u128::from(self.price) * u128::from(self.size)
    }

    /// The order on the aggressor's side, if there was an aggressor.
    #[must_use]
    pub fn aggressor_order(&self) -> Option<&OrderId> {
        match self.aggressor? {
            Side::Buy => Some(&self.buy_order),
            Side::Sell => Some(&self.sell_order),
        }
    }
}
