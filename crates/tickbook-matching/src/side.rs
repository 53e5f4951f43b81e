//! One side of the order book.
//!
//! Levels live in a `Vec` sorted so that the **best** price is at the back:
//! buy levels ascend (highest bid last), sell levels descend (lowest ask
//! last). Matching consumes and prunes levels from the back, so emptied
//! levels are popped without shifting the rest of the vector.
//!
//! Buy and sell differ only in [`BookSide::priority`]; every walk below is
//! written once against that ordering.

use std::cmp::Ordering;

use tickbook_types::{
    BookError, CloseoutPrice, Order, OrderId, OrderType, PartyId, Result, Side, TimeInForce, Trade,
};
use tracing::debug;

use crate::price_level::{PriceLevel, TradeContext};

/// Trades and touched resting orders from one aggressor walk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UncrossOutcome {
    pub trades: Vec<Trade>,
    /// Resting orders touched, in match order, in their post-trade state.
    pub impacted: Vec<Order>,
    pub last_traded_price: Option<u64>,
    /// Matching stopped on an order from the aggressor's own party.
    pub wash_trade: bool,
}

/// Ordered price levels for one side of the book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookSide {
    side: Side,
    /// Worst price first, best price last.
    levels: Vec<PriceLevel>,
}

impl BookSide {
    #[must_use]
    pub fn new(side: Side) -> Self {
        Self {
            side,
            levels: Vec::new(),
        }
    }

    #[must_use]
    pub fn side(&self) -> Side {
        self.side
    }

    /// Storage order of two prices: `Greater` means `a` is the better price
    /// and sits closer to the back.
    #[must_use]
    pub fn priority(&self, a: u64, b: u64) -> Ordering {
        match self.side {
            Side::Buy => a.cmp(&b),
            Side::Sell => b.cmp(&a),
        }
    }

    // =================================================================
    // Insertion / removal
    // =================================================================

    /// Append `order` to the queue at its price, creating the level if needed.
    pub fn add_order(&mut self, order: Order) {
        match self.find_level(order.price) {
            Ok(idx) => self.levels[idx].add_order(order),
            Err(idx) => {
                let mut level = PriceLevel::new(order.price);
                level.add_order(order);
                self.levels.insert(idx, level);
            }
        }
    }

    /// Remove the order `id` resting at `price`, pruning the level if it
    /// empties. Fails if the level or the order is absent.
    pub fn remove_order(&mut self, id: &OrderId, price: u64) -> Result<Order> {
        let idx = self
            .find_level(price)
            .map_err(|_| BookError::OrderNotFound(id.clone()))?;
        let order = self.levels[idx]
            .remove_order(id)
            .ok_or_else(|| BookError::OrderNotFound(id.clone()))?;
        if self.levels[idx].is_empty() {
            self.levels.remove(idx);
        }
        Ok(order)
    }

    /// Replace a resting order with its amended copy in place.
    pub fn replace_order(&mut self, amended: Order) -> Result<Order> {
        let id = amended.id.clone();
        let idx = self
            .find_level(amended.price)
            .map_err(|_| BookError::OrderNotFound(id.clone()))?;
        self.levels[idx]
            .replace_order(amended)
            .ok_or(BookError::OrderNotFound(id))
    }

    #[must_use]
    pub fn get(&self, id: &OrderId, price: u64) -> Option<&Order> {
        let idx = self.find_level(price).ok()?;
        self.levels[idx].get(id)
    }

    fn find_level(&self, price: u64) -> std::result::Result<usize, usize> {
        self.levels
            .binary_search_by(|level| self.priority(level.price, price))
    }

    // =================================================================
    // Queries
    // =================================================================

    /// Levels in storage order (worst first, best last).
    #[must_use]
    pub fn levels(&self) -> &[PriceLevel] {
        &self.levels
    }

    /// Levels best price first.
    pub fn levels_best_first(&self) -> impl Iterator<Item = &PriceLevel> {
        self.levels.iter().rev()
    }

    #[must_use]
    pub fn best_price(&self) -> Option<u64> {
        self.levels.last().map(|l| l.price)
    }

    #[must_use]
    pub fn best_price_and_volume(&self) -> Option<(u64, u64)> {
        self.levels.last().map(|l| (l.price, l.volume()))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    #[must_use]
    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    #[must_use]
    pub fn order_count(&self) -> usize {
        self.levels.iter().map(PriceLevel::len).sum()
    }

    #[must_use]
    pub fn total_volume(&self) -> u64 {
        self.levels.iter().map(PriceLevel::volume).sum()
    }

    /// Volume resting at `price` or better.
    #[must_use]
    pub fn volume_at_or_better(&self, price: u64) -> u64 {
        self.levels_best_first()
            .take_while(|l| self.priority(l.price, price) != Ordering::Less)
            .map(PriceLevel::volume)
            .sum()
    }

    /// Orders of `party`, best level first, FIFO within a level.
    #[must_use]
    pub fn orders_by_party(&self, party: &PartyId) -> Vec<Order> {
        self.levels_best_first()
            .flat_map(PriceLevel::orders)
            .filter(|o| o.party == *party)
            .cloned()
            .collect()
    }

    /// All resting orders in ascending `created_at`, ties in book order.
    ///
    /// Re-inserting the result into an empty side rebuilds identical levels.
    #[must_use]
    pub fn orders_by_creation(&self) -> Vec<Order> {
        let mut orders: Vec<Order> = self
            .levels
            .iter()
            .flat_map(PriceLevel::orders)
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.created_at);
        orders
    }

    /// Levels strictly sorted by priority with no empty or duplicate level.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        self.levels.iter().all(|l| !l.is_empty())
            && self
                .levels
                .windows(2)
                .all(|w| self.priority(w[0].price, w[1].price) == Ordering::Less)
    }

    /// Volume-weighted average price for consuming `volume` from the best
    /// level outward. Division floors.
    pub fn closeout_price(&self, volume: u64) -> Result<CloseoutPrice> {
        if volume == 0 {
            return Err(BookError::InvalidVolume);
        }
        if self.levels.is_empty() {
            return Ok(CloseoutPrice::NoOrders);
        }

        let mut needed = volume;
        let mut notional: u128 = 0;
        for level in self.levels_best_first() {
            let take = needed.min(level.volume());
            notional += u128::from(level.price) * u128::from(take);
            needed -= take;
            if needed == 0 {
                return Ok(CloseoutPrice::Complete(average(notional, volume)?));
            }
        }

        let available = volume - needed;
        Ok(CloseoutPrice::NotEnoughOrders {
            price: average(notional, available)?,
            available,
        })
    }

    // =================================================================
    // Matching
    // =================================================================

    /// Match `agg` against this side in price-time priority.
    ///
    /// FOK orders are checked for sufficient qualifying volume first and
    /// leave the side untouched if short. Network orders ignore price and
    /// have their price rewritten to the size-weighted average achieved.
    pub fn uncross(
        &mut self,
        agg: &mut Order,
        check_wash_trades: bool,
        ctx: &TradeContext<'_>,
    ) -> Result<UncrossOutcome> {
        if agg.time_in_force == TimeInForce::Fok {
            let mut available: u64 = 0;
            'levels: for level in self.levels_best_first() {
                if !agg.accepts_price(level.price) {
                    break;
                }
                for order in level.orders() {
                    if check_wash_trades && order.party == agg.party {
                        return Ok(UncrossOutcome {
                            wash_trade: true,
                            ..UncrossOutcome::default()
                        });
                    }
                    available += order.true_remaining();
                    if available >= agg.remaining {
                        break 'levels;
                    }
                }
            }
            debug!(
                order = %agg.id,
                available,
                remaining = agg.remaining,
                "fok volume check"
            );
            if available < agg.remaining {
                return Ok(UncrossOutcome::default());
            }
        }

        let mut outcome = self.walk(agg, check_wash_trades, ctx, Order::accepts_price)?;

        if agg.order_type == OrderType::Network && !outcome.trades.is_empty() {
            let (notional, filled) = outcome.trades.iter().fold((0u128, 0u64), |(n, f), t| {
                (n + t.notional(), f + t.size)
            });
            agg.price = average(notional, filled)?;
        }
        outcome.last_traded_price = outcome.trades.last().map(|t| t.price);
        Ok(outcome)
    }

    /// Match an order extracted from the other side during an auction
    /// uncross. Levels qualify by the uncrossing price, not the order's own
    /// limit, and no self-trade check applies.
    pub fn uncross_auction(
        &mut self,
        agg: &mut Order,
        uncross_price: u64,
        ctx: &TradeContext<'_>,
    ) -> Result<UncrossOutcome> {
        let side = self.side;
        let accepts = move |_: &Order, price: u64| clears(side, price, uncross_price);
        let mut outcome = self.walk(agg, false, ctx, accepts)?;
        outcome.last_traded_price = outcome.trades.last().map(|t| t.price);
        Ok(outcome)
    }

    fn walk(
        &mut self,
        agg: &mut Order,
        check_wash_trades: bool,
        ctx: &TradeContext<'_>,
        accepts: impl Fn(&Order, u64) -> bool,
    ) -> Result<UncrossOutcome> {
        let mut outcome = UncrossOutcome::default();
        let mut idx = self.levels.len();

        while idx > 0 && agg.remaining > 0 {
            let level = &mut self.levels[idx - 1];
            if !accepts(agg, level.price) {
                break;
            }
            let step = level.uncross(
                agg,
                check_wash_trades,
                ctx,
                &mut outcome.trades,
                &mut outcome.impacted,
            )?;
            if step.wash_trade {
                outcome.wash_trade = true;
                break;
            }
            if !level.is_empty() {
                break;
            }
            idx -= 1;
        }

        while self.levels.last().is_some_and(PriceLevel::is_empty) {
            self.levels.pop();
        }
        Ok(outcome)
    }

    // =================================================================
    // Auction extraction
    // =================================================================

    /// Whether a level at `price` on this side trades in an uncross at
    /// `uncross_price`.
    #[must_use]
    pub fn clears_at(&self, price: u64, uncross_price: u64) -> bool {
        clears(self.side, price, uncross_price)
    }

    /// Whole orders, best first, whose volume (hidden iceberg volume
    /// included) sums to exactly `volume` and whose prices all clear at
    /// `price`. The side is not modified. Returned icebergs have their
    /// reserve folded into `remaining`.
    pub fn plan_extraction(&self, price: u64, volume: u64) -> Result<Vec<Order>> {
        let mut total: u64 = 0;
        let mut orders = Vec::new();
        'levels: for level in self.levels_best_first() {
            for order in level.orders() {
                if total == volume {
                    break 'levels;
                }
                let size = order.true_remaining();
                if !self.clears_at(order.price, price) || total + size > volume {
                    return Err(BookError::invariant(format!(
                        "cannot extract {volume} at {price} from {} side: order {} breaks the bound",
                        self.side, order.id
                    )));
                }
                total += size;
                let mut order = order.clone();
                order.reveal_all();
                orders.push(order);
            }
        }

        if total != volume {
            return Err(BookError::invariant(format!(
                "{} side holds only {total} of {volume} to extract at {price}",
                self.side
            )));
        }
        Ok(orders)
    }

    /// Remove the orders [`plan_extraction`](Self::plan_extraction) names.
    pub fn extract_orders(&mut self, price: u64, volume: u64) -> Result<Vec<Order>> {
        let orders = self.plan_extraction(price, volume)?;
        for _ in 0..orders.len() {
            let level = self
                .levels
                .last_mut()
                .ok_or_else(|| BookError::invariant("extraction ran past the last level"))?;
            level.pop_front();
            if level.is_empty() {
                self.levels.pop();
            }
        }
        Ok(orders)
    }

    /// Uncross `aggressors` against a copy of the levels that clear at
    /// `uncross_price`. The side itself is not touched.
    ///
    /// Returns the trades and what would be left of those levels.
    pub fn simulate_auction(
        &self,
        aggressors: &[Order],
        uncross_price: u64,
        ctx: &TradeContext<'_>,
    ) -> Result<(Vec<Trade>, Vec<PriceLevel>)> {
        let split = self
            .levels
            .partition_point(|l| !self.clears_at(l.price, uncross_price));
        let mut scratch = Self {
            side: self.side,
            levels: self.levels[split..].to_vec(),
        };

        let mut trades = Vec::new();
        for agg in aggressors {
            let mut agg = agg.clone();
            let outcome = scratch.uncross_auction(&mut agg, uncross_price, ctx)?;
            if agg.remaining != 0 {
                return Err(BookError::invariant(format!(
                    "auction aggressor {} left with {} unmatched",
                    agg.id, agg.remaining
                )));
            }
            trades.extend(outcome.trades);
        }
        Ok((trades, scratch.levels))
    }
}

fn clears(side: Side, price: u64, uncross_price: u64) -> bool {
    match side {
        Side::Buy => price >= uncross_price,
        Side::Sell => price <= uncross_price,
    }
}

/// `notional / volume`, floored. The result never exceeds the largest
/// price contributing to `notional`, so it fits in `u64`.
fn average(notional: u128, volume: u64) -> Result<u64> {
    if volume == 0 {
        return Err(BookError::invariant("average price over zero volume"));
    }
    u64::try_from(notional / u128::from(volume))
        .map_err(|_| BookError::invariant("average price overflows u64"))
}
