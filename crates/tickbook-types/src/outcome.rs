//! Results returned by book operations.

use serde::{Deserialize, Serialize};

use crate::{Order, Side, Trade};

/// Result of submitting an order.
///
/// `passive_orders_affected` holds the resting orders touched by the match,
/// in match order, with their post-trade `remaining` and status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderConfirmation {
    pub order: Order,
    pub trades: Vec<Trade>,
    pub passive_orders_affected: Vec<Order>,
}

impl OrderConfirmation {
    #[must_use]
    pub fn traded_volume(&self) -> u64 {
        self.trades.iter().map(|t| t.size).sum()
    }
}

/// Result of cancelling an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationConfirmation {
    pub order: Order,
}

/// Outcome of a closeout-price query.
///
/// Running short of liquidity is an expected outcome here, not an error:
/// collateral logic must tell "some but not enough" apart from "nothing".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseoutPrice {
    /// The full volume is available at this volume-weighted average price.
    Complete(u64),
    /// The side holds only `available`, whose average price is `price`.
    NotEnoughOrders { price: u64, available: u64 },
    /// The side is empty.
    NoOrders,
}

impl CloseoutPrice {
    /// The achievable average price, if the side holds anything.
    #[must_use]
    pub fn price(&self) -> Option<u64> {
        match *self {
            Self::Complete(price) | Self::NotEnoughOrders { price, .. } => Some(price),
            Self::NoOrders => None,
        }
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete(_))
    }
}

/// Price, volume and uncrossing side the auction would clear at right now.
///
/// An uncrossed book yields [`IndicativeQuote::NONE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IndicativeQuote {
    pub price: u64,
    pub volume: u64,
    /// Side whose orders are extracted whole when the auction uncrosses.
    pub side: Option<Side>,
}

impl IndicativeQuote {
    pub const NONE: Self = Self {
        price: 0,
        volume: 0,
        side: None,
    };

    #[must_use]
    pub fn is_none(&self) -> bool {
        self.volume == 0
    }
}
