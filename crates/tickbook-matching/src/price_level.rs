//! A single price level in the order book.
//!
//! Orders at the same price are stored in FIFO order (time priority)
//! using a [`VecDeque`]. The level keeps the sum of its orders' remaining
//! volume, hidden iceberg reserves included, so that side walks never have
//! to rescan the queue.
//!
//! An aggressor first takes displayed volume oldest first. Whatever it still
//! needs once every displayed order is exhausted is shared across the
//! iceberg reserves at this level in proportion to their size; the units
//! lost to rounding go to the oldest icebergs. Each touched resting order
//! produces a single trade.

use std::collections::VecDeque;

use tickbook_types::{BookError, MarketId, Order, OrderId, OrderStatus, Result, Side, Timestamp, Trade, TradeId};

/// Everything a level needs to stamp the trades it produces.
#[derive(Debug, Clone, Copy)]
pub struct TradeContext<'a> {
    pub market_id: &'a MarketId,
    pub batch_id: u64,
    pub timestamp: Timestamp,
    /// Set while uncrossing an auction: every trade prints at this price and
    /// carries no aggressor side.
    pub uncross_price: Option<u64>,
}

/// What stopped a level walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LevelOutcome {
    /// The aggressor has nothing left.
    pub filled: bool,
    /// A resting order belongs to the aggressor's party.
    pub wash_trade: bool,
}

/// All resting orders at one price.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceLevel {
    /// The price at this level.
    pub price: u64,
    /// Orders in time-priority order (front = oldest = highest priority).
    orders: VecDeque<Order>,
    /// Sum of `true_remaining` over `orders`.
    volume: u64,
}

impl PriceLevel {
    /// Create a new empty price level.
    #[must_use]
    pub fn new(price: u64) -> Self {
        Self {
            price,
            orders: VecDeque::new(),
            volume: 0,
        }
    }

    /// Add an order to the back of this level (lowest time priority).
    pub fn add_order(&mut self, order: Order) {
        self.volume += order.true_remaining();
        self.orders.push_back(order);
    }

    /// Remove a specific order by ID. Returns the removed order, or `None`.
    pub fn remove_order(&mut self, order_id: &OrderId) -> Option<Order> {
        let pos = self.orders.iter().position(|o| o.id == *order_id)?;
        let order = self.orders.remove(pos)?;
        self.volume -= order.true_remaining();
        Some(order)
    }

    /// Remove and return the front (oldest / highest priority) order.
    pub fn pop_front(&mut self) -> Option<Order> {
        let order = self.orders.pop_front()?;
        self.volume -= order.true_remaining();
        Some(order)
    }

    /// Swap in an amended copy of a resting order, keeping its queue
    /// position. Returns the previous version.
    pub fn replace_order(&mut self, amended: Order) -> Option<Order> {
        let slot = self.orders.iter_mut().find(|o| o.id == amended.id)?;
        self.volume = self.volume - slot.true_remaining() + amended.true_remaining();
        Some(std::mem::replace(slot, amended))
    }

    #[must_use]
    pub fn get(&self, order_id: &OrderId) -> Option<&Order> {
        self.orders.iter().find(|o| o.id == *order_id)
    }

    /// Peek at the front order without removing it.
    #[must_use]
    pub fn front(&self) -> Option<&Order> {
        self.orders.front()
    }

    /// Orders front to back.
    pub fn orders(&self) -> impl DoubleEndedIterator<Item = &Order> + ExactSizeIterator {
        self.orders.iter()
    }

    /// Total remaining volume across all orders at this level, hidden
    /// iceberg volume included.
    #[must_use]
    pub fn volume(&self) -> u64 {
        self.volume
    }

    /// Returns `true` if there are no orders at this level.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// Number of orders at this level.
    #[must_use]
    pub fn len(&self) -> usize {
        self.orders.len()
    }

    /// Match `agg` against this level.
    ///
    /// Trades print at this level's price (or the auction uncrossing price),
    /// one per touched resting order in queue order. Fully filled resting
    /// orders are dequeued and marked `Filled`; every touched resting order
    /// is appended to `impacted` in its post-trade state. Icebergs are not
    /// refreshed here.
    pub fn uncross(
        &mut self,
        agg: &mut Order,
        check_wash_trades: bool,
        ctx: &TradeContext<'_>,
        trades: &mut Vec<Trade>,
        impacted: &mut Vec<Order>,
    ) -> Result<LevelOutcome> {
        let mut outcome = LevelOutcome::default();
        let mut fills = vec![0u64; self.orders.len()];

        for (passive, fill) in self.orders.iter_mut().zip(fills.iter_mut()) {
            if agg.remaining == 0 {
                break;
            }
            if check_wash_trades && passive.party == agg.party {
                outcome.wash_trade = true;
                break;
            }
            if passive.is_filled() {
                return Err(BookError::invariant(format!(
                    "resting order {} at {} has no remaining volume",
                    passive.id, self.price
                )));
            }
            let size = agg.remaining.min(passive.remaining);
            agg.remaining -= size;
            passive.remaining -= size;
            *fill = size;
        }

        if !outcome.wash_trade && agg.remaining > 0 {
            self.fill_reserves(agg, &mut fills);
        }

        let total: u64 = fills.iter().sum();
        self.volume = self.volume.checked_sub(total).ok_or_else(|| {
            BookError::invariant(format!(
                "level {} volume {} below fill {total}",
                self.price, self.volume
            ))
        })?;

        for (passive, &size) in self.orders.iter_mut().zip(&fills) {
            if size == 0 {
                continue;
            }
            passive.updated_at = ctx.timestamp;
            if passive.is_filled() {
                passive.status = OrderStatus::Filled;
            }
            trades.push(make_trade(agg, passive, size, self.price, trades.len(), ctx));
            impacted.push(passive.clone());
        }
        self.orders.retain(|o| !o.is_filled());

        outcome.filled = agg.remaining == 0;
        Ok(outcome)
    }

    /// Share what `agg` still needs across the hidden reserves, pro rata to
    /// each reserve. Rounding leftovers go to the oldest icebergs, each
    /// capped by what it has left.
    fn fill_reserves(&mut self, agg: &mut Order, fills: &mut [u64]) {
        let reserved: u64 = self.orders.iter().map(Order::reserved).sum();
        if reserved == 0 {
            return;
        }
        let wanted = agg.remaining.min(reserved);

        let mut shares: Vec<u64> = self
            .orders
            .iter()
            .map(|o| {
                let own = o.reserved();
                if wanted == reserved {
                    return own;
                }
                let share = u128::from(wanted) * u128::from(own) / u128::from(reserved);
                u64::try_from(share).unwrap_or(own)
            })
            .collect();

        let mut leftover = wanted - shares.iter().sum::<u64>();
        for (order, share) in self.orders.iter().zip(shares.iter_mut()) {
            if leftover == 0 {
                break;
            }
            let extra = leftover.min(order.reserved() - *share);
            *share += extra;
            leftover -= extra;
        }

        for ((order, share), fill) in self.orders.iter_mut().zip(&shares).zip(fills.iter_mut()) {
            if let Some(iceberg) = order.iceberg.as_mut() {
                iceberg.reserved_remaining -= share;
                *fill += share;
                agg.remaining -= share;
            }
        }
    }
}

pub(crate) fn make_trade(
    agg: &Order,
    passive: &Order,
    size: u64,
    level_price: u64,
    fill_sequence: usize,
    ctx: &TradeContext<'_>,
) -> Trade {
    let (buy, sell) = match agg.side {
        Side::Buy => (agg, passive),
        Side::Sell => (passive, agg),
    };
    Trade {
        id: TradeId::deterministic(&agg.id, ctx.batch_id, fill_sequence as u64),
        market_id: ctx.market_id.clone(),
        price: ctx.uncross_price.unwrap_or(level_price),
        size,
        buyer: buy.party.clone(),
        seller: sell.party.clone(),
        buy_order: buy.id.clone(),
        sell_order: sell.id.clone(),
        aggressor: ctx.uncross_price.is_none().then_some(agg.side),
        batch_id: ctx.batch_id,
        timestamp: ctx.timestamp,
    }
}
