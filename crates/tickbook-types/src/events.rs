//! Outbound events handed to the broker collaborator.
//!
//! Downstream position and ledger engines depend on event order, so the
//! helpers here fix it: removals first, then for each confirmation the
//! passive-order updates, the aggressor update and finally its trades.

use serde::{Deserialize, Serialize};

use crate::{CancellationConfirmation, Order, OrderConfirmation, Trade};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload")]
pub enum BookEvent {
    OrderUpdated(Order),
    TradeCreated(Trade),
}

impl BookEvent {
    /// Events for one confirmation, in broker order.
    #[must_use]
    pub fn from_confirmation(conf: &OrderConfirmation) -> Vec<Self> {
        let mut events =
            Vec::with_capacity(conf.passive_orders_affected.len() + conf.trades.len() + 1);
        events.extend(conf.passive_orders_affected.iter().cloned().map(Self::OrderUpdated));
        events.push(Self::OrderUpdated(conf.order.clone()));
        events.extend(conf.trades.iter().cloned().map(Self::TradeCreated));
        events
    }

    #[must_use]
    pub fn from_cancellation(conf: &CancellationConfirmation) -> Self {
        Self::OrderUpdated(conf.order.clone())
    }

    #[must_use]
    pub fn from_removed(orders: &[Order]) -> Vec<Self> {
        orders.iter().cloned().map(Self::OrderUpdated).collect()
    }

    #[must_use]
    pub fn as_order(&self) -> Option<&Order> {
        match self {
            Self::OrderUpdated(o) => Some(o),
            Self::TradeCreated(_) => None,
        }
    }

    #[must_use]
    pub fn as_trade(&self) -> Option<&Trade> {
        match self {
            Self::TradeCreated(t) => Some(t),
            Self::OrderUpdated(_) => None,
        }
    }
}
