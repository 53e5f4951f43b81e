//! The order book for a single market.
//!
//! Owns both [`BookSide`]s, the GTT expiry index, the ID and party lookup
//! tables and the continuous/auction mode switch.
//!
//! ```text
//!            enter_auction()
//! Continuous ───────────────▶ Auction
//!     ▲                          │
//!     └──────────────────────────┘
//!          leave_auction(now)
//! ```
//!
//! In continuous mode an incoming order is uncrossed against the opposite
//! side and any persistent remainder rests on its own side. In auction mode
//! orders only rest; the indicative price is maintained by
//! [`IndicativePriceAndVolume`], [`AuctionBook`] models the exit uncross on
//! demand, and leaving the auction runs one real uncross at the indicative
//! price. Entering an auction cancels GFN orders, leaving one cancels GFA
//! orders.
//!
//! Iceberg orders whose displayed part drops below its minimum after a fill
//! are topped up from their reserve and re-queued behind the orders already
//! at their price.
//!
//! ## Determinism
//!
//! Every iteration that can influence output runs over ordered containers
//! (price levels, `BTreeMap`/`BTreeSet` party and expiry indexes). The
//! `HashMap` ID index is only ever used for point lookups.

use std::cell::OnceCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use tickbook_types::*;
use tracing::{debug, error, info, warn};

use crate::auction::AuctionBook;
use crate::cache::BookCache;
use crate::expiring::ExpiringOrders;
use crate::indicative::IndicativePriceAndVolume;
use crate::price_level::TradeContext;
use crate::side::{BookSide, UncrossOutcome};

#[derive(Debug, Clone)]
struct AuctionState {
    ipv: IndicativePriceAndVolume,
    /// Built on first use, dropped on every mutation.
    book: OnceCell<AuctionBook>,
}

impl AuctionState {
    fn new(buy: &BookSide, sell: &BookSide) -> Self {
        Self {
            ipv: IndicativePriceAndVolume::new(buy, sell),
            book: OnceCell::new(),
        }
    }
}

/// The order book for a single market.
#[derive(Debug, Clone)]
pub struct OrderBook {
    config: BookConfig,
    market_id: MarketId,
    buy: BookSide,
    sell: BookSide,
    last_traded_price: u64,
    /// Highest `created_at` accepted so far.
    latest_timestamp: Timestamp,
    /// Resting orders only: `OrderId -> (side, price)`.
    orders_by_id: HashMap<OrderId, (Side, u64)>,
    orders_per_party: BTreeMap<PartyId, BTreeSet<OrderId>>,
    expiring: ExpiringOrders,
    /// `Some` while in auction.
    auction: Option<AuctionState>,
    batch_id: u64,
    cache: BookCache,
}

fn trace_defect(market: &MarketId, err: &BookError) {
    if err.is_defect() {
        error!(market = %market, error = %err, "book invariant violated");
    }
}

/// A lookup that the book's own indexes promised would succeed.
fn indexed_lookup_failed(id: &OrderId, err: BookError) -> BookError {
    if err.is_defect() {
        err
    } else {
        BookError::invariant(format!("indexed order {id} unusable: {err}"))
    }
}

impl OrderBook {
    /// Create a new empty book in continuous trading.
    #[must_use]
    pub fn new(market_id: MarketId, config: BookConfig) -> Self {
        Self {
            config,
            market_id,
            buy: BookSide::new(Side::Buy),
            sell: BookSide::new(Side::Sell),
            last_traded_price: 0,
            latest_timestamp: Timestamp::ZERO,
            orders_by_id: HashMap::new(),
            orders_per_party: BTreeMap::new(),
            expiring: ExpiringOrders::new(),
            auction: None,
            batch_id: 0,
            cache: BookCache::new(),
        }
    }

    // =================================================================
    // Validation
    // =================================================================

    fn validate_fields(&self, order: &Order) -> Result<()> {
        if order.id.is_empty() {
            return Err(BookError::EmptyOrderId);
        }
        if order.market_id.is_empty() {
            return Err(BookError::EmptyMarketId(order.id.clone()));
        }
        if order.market_id != self.market_id {
            return Err(BookError::MarketMismatch {
                book: self.market_id.clone(),
                order: order.market_id.clone(),
            });
        }
        if order.party.is_empty() {
            return Err(BookError::EmptyPartyId(order.id.clone()));
        }
        if order.remaining == 0 || order.true_remaining() > order.size {
            return Err(BookError::InvalidRemaining {
                id: order.id.clone(),
                remaining: order.true_remaining(),
                size: order.size,
            });
        }
        if let Some(iceberg) = order.iceberg {
            if order.order_type != OrderType::Limit || !order.is_persistent() {
                return Err(BookError::IcebergNotAllowed(order.id.clone()));
            }
            if iceberg.peak_size == 0
                || iceberg.minimum_visible_size == 0
                || iceberg.minimum_visible_size > iceberg.peak_size
            {
                return Err(BookError::InvalidIceberg(order.id.clone()));
            }
        }
        if order.order_type == OrderType::Limit && order.price == 0 {
            return Err(BookError::ZeroPrice(order.id.clone()));
        }
        if order.time_in_force == TimeInForce::Gtt {
            if order.order_type != OrderType::Limit {
                return Err(BookError::GttNotAllowed(order.id.clone()));
            }
            if order.expires_at.is_zero() {
                return Err(BookError::MissingExpiry(order.id.clone()));
            }
        }
        match order.order_type {
            OrderType::Market
                if !matches!(order.time_in_force, TimeInForce::Ioc | TimeInForce::Fok) =>
            {
                Err(BookError::InvalidMarketTimeInForce(order.id.clone()))
            }
            OrderType::Network if order.time_in_force != TimeInForce::Fok => {
                Err(BookError::InvalidNetworkTimeInForce(order.id.clone()))
            }
            _ => Ok(()),
        }
    }

    fn validate_order(&self, order: &Order) -> Result<()> {
        self.validate_fields(order)?;
        if order.created_at < self.latest_timestamp {
            return Err(BookError::OutOfSequence {
                id: order.id.clone(),
                created_at: order.created_at,
                latest: self.latest_timestamp,
            });
        }
        match order.time_in_force {
            TimeInForce::Gfa if self.auction.is_none() => {
                Err(BookError::GfaOutsideAuction(order.id.clone()))
            }
            TimeInForce::Gfn if self.auction.is_some() => {
                Err(BookError::GfnDuringAuction(order.id.clone()))
            }
            _ => Ok(()),
        }
    }

    // =================================================================
    // Submission
    // =================================================================

    /// Match `order` against the book and rest any persistent remainder.
    ///
    /// In auction the order never trades: persistent orders rest, IOC and
    /// FOK orders are stopped.
    pub fn submit_order(&mut self, order: Order) -> Result<OrderConfirmation> {
        self.try_submit(order)
            .inspect_err(|e| trace_defect(&self.market_id, e))
    }

    fn try_submit(&mut self, mut order: Order) -> Result<OrderConfirmation> {
        self.validate_order(&order)?;
        if self.orders_by_id.contains_key(&order.id) {
            warn!(market = %self.market_id, order = %order.id, "duplicate order id");
            return Err(BookError::DuplicateOrder(order.id));
        }

        self.invalidate();
        self.latest_timestamp = self.latest_timestamp.max(order.created_at);
        order.batch_id = self.batch_id;
        order.status = OrderStatus::Active;
        order.reason = None;
        order.reveal_all();

        let mut outcome = UncrossOutcome::default();
        if self.auction.is_none() {
            let ctx = TradeContext {
                market_id: &self.market_id,
                batch_id: self.batch_id,
                timestamp: order.created_at,
                uncross_price: None,
            };
            let opposite = match order.side {
                Side::Buy => &mut self.sell,
                Side::Sell => &mut self.buy,
            };
            outcome = opposite.uncross(&mut order, self.config.check_wash_trades, &ctx)?;
            if let Some(price) = outcome.last_traded_price {
                self.last_traded_price = price;
            }
        }

        order.status = aggressor_status(&order, &outcome);
        if outcome.wash_trade {
            order.reason = Some(OrderReason::SelfTrading);
            warn!(
                market = %self.market_id,
                order = %order.id,
                party = %order.party,
                traded = outcome.trades.len(),
                "self trade prevented"
            );
        }

        for passive in &outcome.impacted {
            if passive.is_filled() {
                self.forget(passive);
            }
        }
        self.refresh_icebergs(outcome.impacted.iter_mut())?;

        if order.status == OrderStatus::Active {
            order.set_peaks();
            self.rest(order.clone());
        }

        debug!(
            market = %self.market_id,
            order = %order.id,
            side = %order.side,
            status = %order.status,
            remaining = order.remaining,
            trades = outcome.trades.len(),
            "order submitted"
        );
        self.log_levels();

        Ok(OrderConfirmation {
            order,
            trades: outcome.trades,
            passive_orders_affected: outcome.impacted,
        })
    }

    fn rest(&mut self, order: Order) {
        self.index(&order);
        if let Some(state) = self.auction.as_mut() {
            state
                .ipv
                .add_volume_at_price(order.price, order.true_remaining(), order.side);
        }
        let side = order.side;
        self.side_mut(side).add_order(order);
    }

    /// Refresh every still-resting iceberg in `touched` whose display fell
    /// below its minimum, and write the refreshed state back into `touched`.
    ///
    /// A refreshed iceberg re-enters the back of its queue. Its `created_at`
    /// becomes the book's latest timestamp so that ascending `created_at`
    /// keeps matching queue order.
    fn refresh_icebergs<'a>(&mut self, touched: impl IntoIterator<Item = &'a mut Order>) -> Result<()> {
        for entry in touched {
            if entry.is_filled() || entry.iceberg.is_none() {
                continue;
            }
            let &(side, price) = self.orders_by_id.get(&entry.id).ok_or_else(|| {
                BookError::invariant(format!("touched iceberg {} is not resting", entry.id))
            })?;
            let needs_refresh = self
                .side(side)
                .get(&entry.id, price)
                .is_some_and(Order::needs_refresh);
            if !needs_refresh {
                continue;
            }

            let mut order = self.side_mut(side).remove_order(&entry.id, price)?;
            order.refresh();
            order.created_at = self.latest_timestamp;
            order.status = OrderStatus::Active;
            debug!(
                market = %self.market_id,
                order = %order.id,
                visible = order.remaining,
                reserved = order.reserved(),
                "iceberg refreshed"
            );
            *entry = order.clone();
            self.side_mut(side).add_order(order);
        }
        Ok(())
    }

    /// Clear memoized auction state ahead of a mutation.
    fn invalidate(&mut self) {
        self.cache.invalidate();
        if let Some(state) = self.auction.as_mut() {
            state.book.take();
        }
    }

    fn index(&mut self, order: &Order) {
        self.orders_by_id
            .insert(order.id.clone(), (order.side, order.price));
        self.orders_per_party
            .entry(order.party.clone())
            .or_default()
            .insert(order.id.clone());
        if order.time_in_force == TimeInForce::Gtt {
            self.expiring.insert(order.id.clone(), order.expires_at);
        }
    }

    /// Drop `order` from every lookup table. The side itself is untouched.
    fn forget(&mut self, order: &Order) {
        self.orders_by_id.remove(&order.id);
        if let Some(ids) = self.orders_per_party.get_mut(&order.party) {
            ids.remove(&order.id);
            if ids.is_empty() {
                self.orders_per_party.remove(&order.party);
            }
        }
        if order.time_in_force == TimeInForce::Gtt {
            self.expiring.remove(&order.id, order.expires_at);
        }
        if self.config.log_removed_orders_debug {
            debug!(
                market = %self.market_id,
                order = %order.id,
                status = %order.status,
                remaining = order.remaining,
                "order removed from book"
            );
        }
    }

    // =================================================================
    // Removal
    // =================================================================

    /// Take a resting order off its side and out of every index.
    ///
    /// `side` and `price` must match where the order actually rests.
    fn remove_resting(&mut self, id: &OrderId, side: Side, price: u64) -> Result<Order> {
        let &(resting_side, resting_price) = self
            .orders_by_id
            .get(id)
            .ok_or_else(|| BookError::OrderNotFound(id.clone()))?;
        if resting_side != side || resting_price != price {
            warn!(
                market = %self.market_id,
                order = %id,
                %side,
                price,
                "removal does not match resting order"
            );
            return Err(BookError::SideOrPriceMismatch {
                id: id.clone(),
                side,
                price,
            });
        }

        let removed = self.side_mut(side).remove_order(id, price)?;
        self.forget(&removed);
        self.invalidate();

        if let Some(state) = self.auction.as_mut() {
            state
                .ipv
                .remove_volume_at_price(price, removed.true_remaining(), side)?;
        }
        Ok(removed)
    }

    /// Cancel a resting order. Market, side, price and ID must all match.
    pub fn cancel_order(&mut self, order: &Order) -> Result<CancellationConfirmation> {
        if order.market_id != self.market_id {
            return Err(BookError::MarketMismatch {
                book: self.market_id.clone(),
                order: order.market_id.clone(),
            });
        }
        if order.id.is_empty() {
            return Err(BookError::EmptyOrderId);
        }

        let mut removed = self
            .remove_resting(&order.id, order.side, order.price)
            .inspect_err(|e| trace_defect(&self.market_id, e))?;
        removed.status = OrderStatus::Cancelled;
        debug!(market = %self.market_id, order = %removed.id, "order cancelled");
        self.log_levels();
        Ok(CancellationConfirmation { order: removed })
    }

    /// Cancel every resting order of `party`, in order ID order.
    ///
    /// Every order comes from the party index, so any failure part way
    /// through is a defect rather than a rejection.
    pub fn cancel_all_orders(&mut self, party: &PartyId) -> Result<Vec<CancellationConfirmation>> {
        let orders = self.get_orders_per_party(party)?;
        let mut cancelled = Vec::with_capacity(orders.len());
        for order in &orders {
            let confirmation = self
                .cancel_order(order)
                .map_err(|err| indexed_lookup_failed(&order.id, err))
                .inspect_err(|e| trace_defect(&self.market_id, e))?;
            cancelled.push(confirmation);
        }
        Ok(cancelled)
    }

    /// Remove every GTT order with `expires_at <= now`, marking it `Expired`.
    pub fn remove_expired_orders(&mut self, now: Timestamp) -> Result<Vec<Order>> {
        self.try_remove_expired(now)
            .inspect_err(|e| trace_defect(&self.market_id, e))
    }

    fn try_remove_expired(&mut self, now: Timestamp) -> Result<Vec<Order>> {
        let ids = self.expiring.expire(now);
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut expired = Vec::with_capacity(ids.len());
        for id in ids {
            let &(side, price) = self.orders_by_id.get(&id).ok_or_else(|| {
                BookError::invariant(format!("expiring order {id} is not resting"))
            })?;
            let mut order = self.remove_resting(&id, side, price)?;
            order.status = OrderStatus::Expired;
            order.updated_at = now;
            expired.push(order);
        }

        debug!(market = %self.market_id, %now, count = expired.len(), "orders expired");
        self.log_levels();
        Ok(expired)
    }

    /// Remove every resting order of the given parties, marking each
    /// `Stopped`. Per party: buy side then sell side, best price first,
    /// FIFO within a level.
    pub fn remove_distressed_orders(&mut self, parties: &[PartyId]) -> Result<Vec<Order>> {
        let mut removed = Vec::new();
        for party in parties {
            let mut orders = self.buy.orders_by_party(party);
            orders.extend(self.sell.orders_by_party(party));
            for order in orders {
                let mut order = self
                    .remove_resting(&order.id, order.side, order.price)
                    .inspect_err(|e| trace_defect(&self.market_id, e))?;
                order.status = OrderStatus::Stopped;
                removed.push(order);
            }
        }
        if !removed.is_empty() {
            info!(market = %self.market_id, count = removed.len(), "distressed orders removed");
        }
        Ok(removed)
    }

    // =================================================================
    // Amendment
    // =================================================================

    /// Replace a resting order with `amended`, keeping its queue position.
    ///
    /// Only `size` and `remaining` (downwards), `time_in_force` (between GTC
    /// and GTT) and `expires_at` may change. An iceberg keeps its peak and
    /// minimum; its displayed part and its reserve can only shrink. Returns
    /// the order as it now rests.
    pub fn amend_order(&mut self, original: &Order, amended: Order) -> Result<Order> {
        self.try_amend(original, amended)
            .inspect_err(|e| trace_defect(&self.market_id, e))
    }

    fn try_amend(&mut self, original: &Order, mut amended: Order) -> Result<Order> {
        if original.created_at != amended.created_at {
            return Err(BookError::AmendSequenceChanged(amended.id));
        }
        if original.id != amended.id || original.side != amended.side {
            return Err(BookError::AmendIdentityChanged(amended.id));
        }
        self.validate_fields(&amended)?;
        if !amended.is_persistent() {
            return Err(BookError::AmendIdentityChanged(amended.id));
        }

        let &(side, price) = self
            .orders_by_id
            .get(&amended.id)
            .ok_or_else(|| BookError::OrderNotFound(amended.id.clone()))?;
        if side != amended.side {
            return Err(BookError::SideOrPriceMismatch {
                id: amended.id.clone(),
                side: amended.side,
                price: amended.price,
            });
        }
        let resting = self
            .side(side)
            .get(&amended.id, price)
            .ok_or_else(|| {
                BookError::invariant(format!("indexed order {} missing from side", amended.id))
            })?;

        if resting.party != amended.party {
            return Err(BookError::AmendPartyChanged {
                id: amended.id.clone(),
                original: resting.party.clone(),
                amended: amended.party.clone(),
            });
        }
        if amended.price != price {
            return Err(BookError::AmendPriceChanged(amended.id));
        }
        for (resting_volume, amended_volume) in [
            (resting.size, amended.size),
            (resting.remaining, amended.remaining),
            (resting.true_remaining(), amended.true_remaining()),
        ] {
            if amended_volume > resting_volume {
                return Err(BookError::AmendSizeIncrease {
                    id: amended.id.clone(),
                    resting: resting_volume,
                    amended: amended_volume,
                });
            }
        }
        let gtc_or_gtt = |tif: TimeInForce| matches!(tif, TimeInForce::Gtc | TimeInForce::Gtt);
        if amended.time_in_force != resting.time_in_force
            && !(gtc_or_gtt(amended.time_in_force) && gtc_or_gtt(resting.time_in_force))
        {
            return Err(BookError::AmendIdentityChanged(amended.id));
        }
        let shape = |o: &Order| o.iceberg.map(|i| (i.peak_size, i.minimum_visible_size));
        if shape(resting) != shape(&amended) {
            return Err(BookError::AmendIdentityChanged(amended.id));
        }
        if resting.created_at != amended.created_at {
            return Err(BookError::AmendSequenceChanged(amended.id));
        }

        let resting_order_type = resting.order_type;
        self.invalidate();
        amended.status = OrderStatus::Active;
        amended.order_type = resting_order_type;
        if amended.time_in_force != TimeInForce::Gtt {
            amended.expires_at = Timestamp::ZERO;
        }
        let previous = self.side_mut(side).replace_order(amended.clone())?;

        if previous.time_in_force == TimeInForce::Gtt {
            self.expiring.remove(&previous.id, previous.expires_at);
        }
        if amended.time_in_force == TimeInForce::Gtt {
            self.expiring.insert(amended.id.clone(), amended.expires_at);
        }

        if let Some(state) = self.auction.as_mut() {
            let reduced = previous.true_remaining() - amended.true_remaining();
            state.ipv.remove_volume_at_price(price, reduced, side)?;
        }

        debug!(
            market = %self.market_id,
            order = %amended.id,
            remaining = amended.remaining,
            tif = %amended.time_in_force,
            "order amended"
        );
        self.log_levels();
        Ok(amended)
    }

    // =================================================================
    // Auction
    // =================================================================

    /// Switch to auction mode. GFN orders are cancelled and returned; every
    /// other resting order stays and new orders stop trading.
    pub fn enter_auction(&mut self) -> Result<Vec<Order>> {
        if self.auction.is_some() {
            return Err(BookError::AlreadyInAuction);
        }
        let cancelled = self
            .cancel_time_in_force(TimeInForce::Gfn)
            .inspect_err(|e| trace_defect(&self.market_id, e))?;
        self.auction = Some(AuctionState::new(&self.buy, &self.sell));
        self.invalidate();
        info!(
            market = %self.market_id,
            orders = self.order_count(),
            cancelled = cancelled.len(),
            "entered auction"
        );
        Ok(cancelled)
    }

    /// Cancel every resting order with `tif`: buy side then sell side, best
    /// price first, FIFO within a level.
    fn cancel_time_in_force(&mut self, tif: TimeInForce) -> Result<Vec<Order>> {
        let doomed: Vec<(OrderId, Side, u64)> = self
            .buy
            .levels_best_first()
            .chain(self.sell.levels_best_first())
            .flat_map(crate::PriceLevel::orders)
            .filter(|o| o.time_in_force == tif)
            .map(|o| (o.id.clone(), o.side, o.price))
            .collect();

        let mut cancelled = Vec::with_capacity(doomed.len());
        for (id, side, price) in doomed {
            let mut order = self
                .remove_resting(&id, side, price)
                .map_err(|err| indexed_lookup_failed(&id, err))?;
            order.status = OrderStatus::Cancelled;
            cancelled.push(order);
        }
        if !cancelled.is_empty() {
            debug!(market = %self.market_id, %tif, count = cancelled.len(), "orders cancelled by mode change");
        }
        Ok(cancelled)
    }

    /// Uncross at the indicative price and return to continuous trading.
    ///
    /// Returns one confirmation per order taken from the uncrossing side,
    /// plus the orders removed on exit: cancelled GFA orders first, then
    /// those that expired by `now`.
    pub fn leave_auction(&mut self, now: Timestamp) -> Result<(Vec<OrderConfirmation>, Vec<Order>)> {
        self.try_leave_auction(now)
            .inspect_err(|e| trace_defect(&self.market_id, e))
    }

    fn try_leave_auction(&mut self, now: Timestamp) -> Result<(Vec<OrderConfirmation>, Vec<Order>)> {
        let state = self.auction.as_ref().ok_or(BookError::NotInAuction)?;
        let quote = state
            .ipv
            .indicative_quote(self.buy.best_price(), self.sell.best_price());

        self.batch_id += 1;
        self.invalidate();

        let confirmations = self.uncross_auction(quote, now)?;
        self.auction = None;
        let mut removed = self.cancel_time_in_force(TimeInForce::Gfa)?;
        let cancelled = removed.len();
        removed.extend(self.try_remove_expired(now)?);

        info!(
            market = %self.market_id,
            price = quote.price,
            volume = quote.volume,
            batch = self.batch_id,
            uncrossed = confirmations.len(),
            cancelled,
            expired = removed.len() - cancelled,
            "left auction"
        );
        Ok((confirmations, removed))
    }

    fn uncross_auction(
        &mut self,
        quote: IndicativeQuote,
        now: Timestamp,
    ) -> Result<Vec<OrderConfirmation>> {
        let Some(uncross_side) = quote.side else {
            return Ok(Vec::new());
        };
        let price = quote.price;
        let extracted = self.side_mut(uncross_side).extract_orders(price, quote.volume)?;

        let mut confirmations = Vec::with_capacity(extracted.len());
        for mut agg in extracted {
            let ctx = TradeContext {
                market_id: &self.market_id,
                batch_id: self.batch_id,
                timestamp: now,
                uncross_price: Some(price),
            };
            let opposite = match uncross_side {
                Side::Buy => &mut self.sell,
                Side::Sell => &mut self.buy,
            };
            let outcome = opposite.uncross_auction(&mut agg, price, &ctx)?;
            if agg.remaining != 0 {
                return Err(BookError::invariant(format!(
                    "auction order {} left with {} after uncrossing at {price}",
                    agg.id, agg.remaining
                )));
            }

            agg.status = OrderStatus::Filled;
            agg.updated_at = now;
            self.forget(&agg);
            for passive in &outcome.impacted {
                if passive.is_filled() {
                    self.forget(passive);
                }
            }
            self.last_traded_price = price;

            confirmations.push(OrderConfirmation {
                order: agg,
                trades: outcome.trades,
                passive_orders_affected: outcome.impacted,
            });
        }

        // Icebergs refresh once the whole uncross is done; the last report of
        // each touched order carries its final state.
        let mut seen = BTreeSet::new();
        let mut latest: Vec<&mut Order> = confirmations
            .iter_mut()
            .rev()
            .flat_map(|c| c.passive_orders_affected.iter_mut().rev())
            .filter(|o| seen.insert(o.id.clone()))
            .collect();
        latest.reverse();
        self.refresh_icebergs(latest)?;

        self.log_levels();
        Ok(confirmations)
    }

    /// Indicative uncrossing price, volume and side. Auction only; memoized
    /// until the next mutation.
    pub fn indicative_price_and_volume(&self) -> Result<IndicativeQuote> {
        let state = self.auction.as_ref().ok_or(BookError::NotInAuction)?;
        if let Some(quote) = self.cache.quote() {
            return Ok(quote);
        }
        let quote = state
            .ipv
            .indicative_quote(self.buy.best_price(), self.sell.best_price());
        self.cache.store_quote(quote);
        Ok(quote)
    }

    pub fn indicative_price(&self) -> Result<u64> {
        if self.auction.is_none() {
            return Err(BookError::NotInAuction);
        }
        if let Some(price) = self.cache.indicative_price() {
            return Ok(price);
        }
        Ok(self.indicative_price_and_volume()?.price)
    }

    /// The book as leaving the auction now would leave it, memoized until
    /// the next mutation. Trades are stamped with the next batch and the
    /// latest timestamp seen.
    pub fn auction_book(&self) -> Result<&AuctionBook> {
        let state = self.auction.as_ref().ok_or(BookError::NotInAuction)?;
        if let Some(book) = state.book.get() {
            return Ok(book);
        }
        let quote = self.indicative_price_and_volume()?;
        let ctx = TradeContext {
            market_id: &self.market_id,
            batch_id: self.batch_id + 1,
            timestamp: self.latest_timestamp,
            uncross_price: Some(quote.price),
        };
        let book = AuctionBook::uncross(&self.buy, &self.sell, quote, &ctx)
            .inspect_err(|e| trace_defect(&self.market_id, e))?;
        Ok(state.book.get_or_init(|| book))
    }

    /// Trades that leaving the auction now would produce. Nothing is mutated.
    pub fn indicative_trades(&self) -> Result<Vec<Trade>> {
        Ok(self.auction_book()?.trades().to_vec())
    }

    /// Whether both a bid and an ask would remain after leaving the auction
    /// now. GTT orders due at the exit timestamp are not accounted for.
    /// Always `false` outside an auction.
    #[must_use]
    pub fn bid_and_ask_present_after_auction(&self) -> bool {
        self.auction_book()
            .is_ok_and(AuctionBook::bid_and_ask_present)
    }

    /// Leaving now would trade and leave a two-sided book.
    #[must_use]
    pub fn can_leave_auction(&self) -> bool {
        self.indicative_price_and_volume()
            .is_ok_and(|quote| !quote.is_none())
            && self.bid_and_ask_present_after_auction()
    }

    #[must_use]
    pub fn in_auction(&self) -> bool {
        self.auction.is_some()
    }

    // =================================================================
    // Queries
    // =================================================================

    #[must_use]
    pub fn market_id(&self) -> &MarketId {
        &self.market_id
    }

    #[must_use]
    pub fn config(&self) -> &BookConfig {
        &self.config
    }

    #[must_use]
    pub fn side(&self, side: Side) -> &BookSide {
        match side {
            Side::Buy => &self.buy,
            Side::Sell => &self.sell,
        }
    }

    fn side_mut(&mut self, side: Side) -> &mut BookSide {
        match side {
            Side::Buy => &mut self.buy,
            Side::Sell => &mut self.sell,
        }
    }

    #[must_use]
    pub fn best_bid_price_and_volume(&self) -> Option<(u64, u64)> {
        self.buy.best_price_and_volume()
    }

    #[must_use]
    pub fn best_offer_price_and_volume(&self) -> Option<(u64, u64)> {
        self.sell.best_price_and_volume()
    }

    #[must_use]
    pub fn best_bid_price(&self) -> Option<u64> {
        self.buy.best_price()
    }

    #[must_use]
    pub fn best_ask_price(&self) -> Option<u64> {
        self.sell.best_price()
    }

    /// Price a market order on `side` references: the opposite best, else
    /// the own-side best, else the configured default.
    #[must_use]
    pub fn market_order_price(&self, side: Side) -> u64 {
        self.side(side.opposite())
            .best_price()
            .or_else(|| self.side(side).best_price())
            .unwrap_or(self.config.default_market_order_price)
    }

    /// Average price for closing out `volume` against the resting `side`.
    pub fn closeout_price(&self, volume: u64, side: Side) -> Result<CloseoutPrice> {
        self.side(side).closeout_price(volume)
    }

    /// Volume resting on `side` at `price` or better.
    #[must_use]
    pub fn get_volume_at_price(&self, price: u64, side: Side) -> u64 {
        self.side(side).volume_at_or_better(price)
    }

    pub fn get_order_by_id(&self, id: &OrderId) -> Result<&Order> {
        if id.is_empty() {
            return Err(BookError::EmptyOrderId);
        }
        let &(side, price) = self
            .orders_by_id
            .get(id)
            .ok_or_else(|| BookError::OrderNotFound(id.clone()))?;
        self.side(side)
            .get(id, price)
            .ok_or_else(|| BookError::invariant(format!("indexed order {id} missing from side")))
    }

    /// Resting orders of `party`, sorted by order ID. An ID in the party
    /// index that does not resolve to a resting order is a defect.
    pub fn get_orders_per_party(&self, party: &PartyId) -> Result<Vec<Order>> {
        self.orders_per_party
            .get(party)
            .into_iter()
            .flatten()
            .map(|id| {
                self.get_order_by_id(id)
                    .cloned()
                    .map_err(|err| indexed_lookup_failed(id, err))
            })
            .collect::<Result<Vec<_>>>()
            .inspect_err(|e| trace_defect(&self.market_id, e))
    }

    #[must_use]
    pub fn last_traded_price(&self) -> u64 {
        self.last_traded_price
    }

    #[must_use]
    pub fn latest_timestamp(&self) -> Timestamp {
        self.latest_timestamp
    }

    #[must_use]
    pub fn batch_id(&self) -> u64 {
        self.batch_id
    }

    #[must_use]
    pub fn order_count(&self) -> usize {
        self.orders_by_id.len()
    }

    #[must_use]
    pub fn total_volume(&self) -> u64 {
        self.buy.total_volume() + self.sell.total_volume()
    }

    #[must_use]
    pub fn level_count(&self) -> usize {
        self.buy.level_count() + self.sell.level_count()
    }

    /// Orders waiting in the expiry index.
    #[must_use]
    pub fn expiring_count(&self) -> usize {
        self.expiring.len()
    }

    /// Cross-check sides and indexes. Any failure is a defect.
    pub fn check_integrity(&self) -> Result<()> {
        for side in [&self.buy, &self.sell] {
            if !side.is_well_formed() {
                return Err(BookError::invariant(format!(
                    "{} side levels out of order",
                    side.side()
                )));
            }
        }
        let resting = self.buy.order_count() + self.sell.order_count();
        if resting != self.orders_by_id.len() {
            return Err(BookError::invariant(format!(
                "{resting} resting orders but {} indexed",
                self.orders_by_id.len()
            )));
        }
        let by_party: usize = self.orders_per_party.values().map(BTreeSet::len).sum();
        if by_party != resting {
            return Err(BookError::invariant(format!(
                "{resting} resting orders but {by_party} in party index"
            )));
        }
        for side in [&self.buy, &self.sell] {
            for order in side.levels().iter().flat_map(crate::PriceLevel::orders) {
                if order.remaining == 0 || order.true_remaining() > order.size {
                    return Err(BookError::invariant(format!(
                        "resting order {} has remaining {} of {}",
                        order.id,
                        order.true_remaining(),
                        order.size
                    )));
                }
            }
        }
        if let Some(state) = &self.auction {
            let fresh = IndicativePriceAndVolume::new(&self.buy, &self.sell);
            if fresh != state.ipv {
                return Err(BookError::invariant("indicative levels drifted from book"));
            }
        }
        Ok(())
    }

    // =================================================================
    // Snapshot
    // =================================================================

    /// Serializable state. Each side's orders are sorted by `created_at`.
    #[must_use]
    pub fn snapshot(&self) -> MatchingBook {
        MatchingBook {
            version: constants::SNAPSHOT_VERSION,
            market_id: self.market_id.clone(),
            buy: self.buy.orders_by_creation(),
            sell: self.sell.orders_by_creation(),
            last_traded_price: self.last_traded_price,
            auction: self.auction.is_some(),
            batch_id: self.batch_id,
            latest_timestamp: self.latest_timestamp,
        }
    }

    /// Rebuild a book from a snapshot by re-inserting each side's orders.
    pub fn from_snapshot(config: BookConfig, snapshot: MatchingBook) -> Result<Self> {
        if snapshot.version != constants::SNAPSHOT_VERSION {
            return Err(BookError::UnsupportedSnapshot(snapshot.version));
        }
        let mut book = Self::new(snapshot.market_id, config);
        book.last_traded_price = snapshot.last_traded_price;
        book.batch_id = snapshot.batch_id;
        book.latest_timestamp = snapshot.latest_timestamp;

        for (side, orders) in [(Side::Buy, snapshot.buy), (Side::Sell, snapshot.sell)] {
            for order in orders {
                if order.side != side {
                    return Err(BookError::invariant(format!(
                        "snapshot lists {} order {} on the {side} side",
                        order.side, order.id
                    )));
                }
                if order.market_id != book.market_id {
                    return Err(BookError::MarketMismatch {
                        book: book.market_id.clone(),
                        order: order.market_id,
                    });
                }
                if book.orders_by_id.contains_key(&order.id) {
                    return Err(BookError::DuplicateOrder(order.id));
                }
                book.index(&order);
                book.side_mut(side).add_order(order);
            }
        }

        if snapshot.auction {
            book.auction = Some(AuctionState::new(&book.buy, &book.sell));
        }
        info!(
            market = %book.market_id,
            orders = book.order_count(),
            auction = snapshot.auction,
            batch = book.batch_id,
            "book restored from snapshot"
        );
        Ok(book)
    }

    /// SHA-256 over every level's price and volume.
    #[must_use]
    pub fn state_hash(&self) -> [u8; 32] {
        crate::determinism::compute_state_hash(&self.buy, &self.sell)
    }

    // =================================================================
    // Debug output
    // =================================================================

    /// Dump both sides through `tracing` at debug level.
    pub fn print_state(&self, label: &str) {
        debug!(
            market = %self.market_id,
            label,
            auction = self.in_auction(),
            orders = self.order_count(),
            last_traded_price = self.last_traded_price,
            "book state"
        );
        for side in [&self.sell, &self.buy] {
            for level in side.levels_best_first() {
                debug!(
                    market = %self.market_id,
                    side = %side.side(),
                    price = level.price,
                    volume = level.volume(),
                    orders = level.len(),
                    "level"
                );
            }
        }
    }

    fn log_levels(&self) {
        if self.config.log_price_levels_debug {
            self.print_state("after mutation");
        }
    }
}

fn aggressor_status(order: &Order, outcome: &UncrossOutcome) -> OrderStatus {
    let traded = !outcome.trades.is_empty();
    if order.is_filled() {
        OrderStatus::Filled
    } else if outcome.wash_trade || !order.is_persistent() {
        if traded {
            OrderStatus::PartiallyFilled
        } else {
            OrderStatus::Stopped
        }
    } else {
        OrderStatus::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn market() -> MarketId {
        MarketId::new(Order::FIXTURE_MARKET)
    }

    fn new_book() -> OrderBook {
        OrderBook::new(market(), BookConfig::default())
    }

    fn order(id: &str, party: &str, side: Side, price: u64, size: u64, t: i64) -> Order {
        Order::fixture(id, party, side, price, size).with_created_at(Timestamp(t))
    }

    #[test]
    fn fills_follow_price_time_priority() {
        let mut book = new_book();
        book.submit_order(order("b0", "p1", Side::Buy, 100, 100, 0)).unwrap();
        book.submit_order(order("b1", "p2", Side::Buy, 100, 100, 1)).unwrap();

        let conf = book
            .submit_order(
                order("s0", "p3", Side::Sell, 100, 150, 2).with_time_in_force(TimeInForce::Ioc),
            )
            .unwrap();

        assert_eq!(conf.order.status, OrderStatus::Filled);
        assert_eq!(conf.trades.len(), 2);
        assert_eq!(conf.trades[0].buy_order.as_str(), "b0");
        assert_eq!(conf.trades[0].size, 100);
        assert_eq!(conf.trades[1].buy_order.as_str(), "b1");
        assert_eq!(conf.trades[1].size, 50);
        assert_eq!(conf.passive_orders_affected[0].status, OrderStatus::Filled);
        assert_eq!(conf.passive_orders_affected[1].status, OrderStatus::Active);

        assert_eq!(book.best_bid_price_and_volume(), Some((100, 50)));
        assert_eq!(book.order_count(), 1);
        assert!(book.get_order_by_id(&OrderId::new("b0")).is_err());
        assert_eq!(book.get_order_by_id(&OrderId::new("b1")).unwrap().remaining, 50);
        assert_eq!(book.last_traded_price(), 100);
        book.check_integrity().unwrap();
    }

    #[test]
    fn validation_rejects_malformed_orders() {
        let mut book = new_book();
        let base = order("a", "p", Side::Buy, 100, 10, 0);

        let mut no_id = base.clone();
        no_id.id = OrderId::default();
        assert!(matches!(book.submit_order(no_id), Err(BookError::EmptyOrderId)));

        let mut no_party = base.clone();
        no_party.party = PartyId::default();
        assert!(matches!(book.submit_order(no_party), Err(BookError::EmptyPartyId(_))));

        let oversized = base.clone().with_remaining(11);
        assert!(matches!(
            book.submit_order(oversized),
            Err(BookError::InvalidRemaining { .. })
        ));

        let mut gtt = base.clone();
        gtt.time_in_force = TimeInForce::Gtt;
        assert!(matches!(book.submit_order(gtt), Err(BookError::MissingExpiry(_))));

        let market_gtt = base
            .clone()
            .with_type(OrderType::Market)
            .with_expiry(Timestamp(10));
        assert!(matches!(book.submit_order(market_gtt), Err(BookError::GttNotAllowed(_))));

        let market_gtc = base.clone().with_type(OrderType::Market);
        assert!(matches!(
            book.submit_order(market_gtc),
            Err(BookError::InvalidMarketTimeInForce(_))
        ));

        let network_ioc = base
            .clone()
            .with_type(OrderType::Network)
            .with_time_in_force(TimeInForce::Ioc);
        assert!(matches!(
            book.submit_order(network_ioc),
            Err(BookError::InvalidNetworkTimeInForce(_))
        ));

        let mut other_market = base.clone();
        other_market.market_id = MarketId::new("OTHER");
        assert!(matches!(
            book.submit_order(other_market),
            Err(BookError::MarketMismatch { .. })
        ));

        assert_eq!(book.order_count(), 0);
        assert_eq!(book.latest_timestamp(), Timestamp::ZERO);
    }

    #[test]
    fn out_of_sequence_is_rejected() {
        let mut book = new_book();
        book.submit_order(order("a", "p", Side::Buy, 100, 1, 10)).unwrap();
        let err = book.submit_order(order("b", "p", Side::Buy, 100, 1, 9)).unwrap_err();
        assert!(matches!(err, BookError::OutOfSequence { .. }));
        assert!(book.submit_order(order("c", "p", Side::Buy, 100, 1, 10)).is_ok());
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let mut book = new_book();
        book.submit_order(order("a", "p", Side::Buy, 100, 1, 0)).unwrap();
        let err = book.submit_order(order("a", "p", Side::Buy, 101, 1, 0)).unwrap_err();
        assert!(matches!(err, BookError::DuplicateOrder(_)));
    }

    #[test]
    fn ioc_and_fok_statuses() {
        let mut book = new_book();
        book.submit_order(order("s", "maker", Side::Sell, 100, 5, 0)).unwrap();

        let ioc = book
            .submit_order(
                order("ioc", "taker", Side::Buy, 99, 5, 1).with_time_in_force(TimeInForce::Ioc),
            )
            .unwrap();
        assert_eq!(ioc.order.status, OrderStatus::Stopped);

        let fok = book
            .submit_order(
                order("fok", "taker", Side::Buy, 100, 6, 2).with_time_in_force(TimeInForce::Fok),
            )
            .unwrap();
        assert_eq!(fok.order.status, OrderStatus::Stopped);
        assert!(fok.trades.is_empty());

        let partial = book
            .submit_order(
                order("ioc2", "taker", Side::Buy, 100, 8, 3).with_time_in_force(TimeInForce::Ioc),
            )
            .unwrap();
        assert_eq!(partial.order.status, OrderStatus::PartiallyFilled);
        assert_eq!(partial.order.remaining, 3);
        assert_eq!(book.order_count(), 0);
    }

    #[test]
    fn self_trade_stops_aggressor() {
        let mut book = new_book();
        book.submit_order(order("s1", "other", Side::Sell, 100, 5, 0)).unwrap();
        book.submit_order(order("s2", "me", Side::Sell, 100, 5, 1)).unwrap();

        let conf = book.submit_order(order("b", "me", Side::Buy, 100, 10, 2)).unwrap();
        assert_eq!(conf.trades.len(), 1);
        assert_eq!(conf.order.status, OrderStatus::PartiallyFilled);
        assert_eq!(conf.order.reason, Some(OrderReason::SelfTrading));
        assert!(book.get_order_by_id(&OrderId::new("b")).is_err());
        assert_eq!(book.best_offer_price_and_volume(), Some((100, 5)));

        let fok = book
            .submit_order(order("f", "me", Side::Buy, 100, 5, 3).with_time_in_force(TimeInForce::Fok))
            .unwrap();
        assert_eq!(fok.order.status, OrderStatus::Stopped);
        assert_eq!(fok.order.reason, Some(OrderReason::SelfTrading));
    }

    #[test]
    fn wash_check_can_be_disabled() {
        let cfg = BookConfig::default().with_wash_trade_check(false);
        let mut book = OrderBook::new(market(), cfg);
        book.submit_order(order("s", "me", Side::Sell, 100, 5, 0)).unwrap();
        let conf = book.submit_order(order("b", "me", Side::Buy, 100, 5, 1)).unwrap();
        assert_eq!(conf.order.status, OrderStatus::Filled);
    }

    #[test]
    fn cancel_requires_exact_match() {
        let mut book = new_book();
        let resting = order("a", "p", Side::Buy, 100, 10, 0);
        book.submit_order(resting.clone()).unwrap();

        let mut wrong_price = resting.clone();
        wrong_price.price = 101;
        assert!(matches!(
            book.cancel_order(&wrong_price),
            Err(BookError::SideOrPriceMismatch { .. })
        ));

        let mut wrong_side = resting.clone();
        wrong_side.side = Side::Sell;
        assert!(book.cancel_order(&wrong_side).is_err());

        let mut wrong_market = resting.clone();
        wrong_market.market_id = MarketId::new("X");
        assert!(matches!(
            book.cancel_order(&wrong_market),
            Err(BookError::MarketMismatch { .. })
        ));
        assert_eq!(book.order_count(), 1);

        let conf = book.cancel_order(&resting).unwrap();
        assert_eq!(conf.order.status, OrderStatus::Cancelled);
        assert_eq!(book.order_count(), 0);
        assert!(matches!(
            book.cancel_order(&resting),
            Err(BookError::OrderNotFound(_))
        ));
    }

    #[test]
    fn amend_rules() {
        let mut book = new_book();
        let original = order("a", "p", Side::Buy, 100, 10, 0);
        book.submit_order(original.clone()).unwrap();
        book.submit_order(order("b", "q", Side::Buy, 100, 10, 1)).unwrap();

        let mut bigger = original.clone();
        bigger.size = 20;
        bigger.remaining = 20;
        assert!(matches!(
            book.amend_order(&original, bigger),
            Err(BookError::AmendSizeIncrease { .. })
        ));

        let mut repriced = original.clone();
        repriced.price = 101;
        assert!(matches!(
            book.amend_order(&original, repriced),
            Err(BookError::AmendPriceChanged(_))
        ));

        let mut other_party = original.clone();
        other_party.party = PartyId::new("z");
        assert!(matches!(
            book.amend_order(&original, other_party),
            Err(BookError::AmendPartyChanged { .. })
        ));

        let retimed = original.clone().with_created_at(Timestamp(5));
        assert!(matches!(
            book.amend_order(&original, retimed),
            Err(BookError::AmendSequenceChanged(_))
        ));

        let reduced = original.clone().with_remaining(4);
        let amended = book.amend_order(&original, reduced).unwrap();
        assert_eq!(amended.remaining, 4);
        assert_eq!(book.best_bid_price_and_volume(), Some((100, 14)));

        // Queue position kept: a sell hits "a" first.
        let conf = book.submit_order(order("s", "r", Side::Sell, 100, 4, 2)).unwrap();
        assert_eq!(conf.trades[0].buy_order.as_str(), "a");
        book.check_integrity().unwrap();
    }

    #[test]
    fn amend_moves_order_between_gtc_and_gtt() {
        let mut book = new_book();
        let original = order("a", "p", Side::Sell, 100, 10, 0);
        book.submit_order(original.clone()).unwrap();
        assert_eq!(book.expiring_count(), 0);

        let gtt = original.clone().with_expiry(Timestamp(50));
        let gtt = book.amend_order(&original, gtt).unwrap();
        assert_eq!(book.expiring_count(), 1);

        let back = gtt.clone().with_time_in_force(TimeInForce::Gtc);
        let back = book.amend_order(&gtt, back).unwrap();
        assert_eq!(back.expires_at, Timestamp::ZERO);
        assert_eq!(book.expiring_count(), 0);
        assert!(book.remove_expired_orders(Timestamp(100)).unwrap().is_empty());
    }

    #[test]
    fn gtt_orders_expire_in_time_order() {
        let mut book = new_book();
        let t = 100;
        for (id, exp) in [("a", t - 1), ("b", t), ("c", t), ("d", t + 1)] {
            book.submit_order(order(id, "p", Side::Buy, 90, 1, 0).with_expiry(Timestamp(exp)))
                .unwrap();
        }
        let expired = book.remove_expired_orders(Timestamp(t)).unwrap();
        let ids: Vec<&str> = expired.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(expired.iter().all(|o| o.status == OrderStatus::Expired));
        assert_eq!(book.order_count(), 1);
        assert!(book.get_order_by_id(&OrderId::new("d")).is_ok());
        book.check_integrity().unwrap();
    }

    #[test]
    fn filled_gtt_leaves_expiry_index() {
        let mut book = new_book();
        book.submit_order(order("g", "p", Side::Sell, 100, 5, 0).with_expiry(Timestamp(10)))
            .unwrap();
        book.submit_order(order("b", "q", Side::Buy, 100, 5, 1)).unwrap();
        assert_eq!(book.expiring_count(), 0);
        assert!(book.remove_expired_orders(Timestamp(10)).unwrap().is_empty());
    }

    #[test]
    fn distressed_orders_are_stopped() {
        let mut book = new_book();
        book.submit_order(order("b1", "bad", Side::Buy, 90, 1, 0)).unwrap();
        book.submit_order(order("b2", "bad", Side::Buy, 95, 1, 1)).unwrap();
        book.submit_order(order("s1", "bad", Side::Sell, 110, 1, 2)).unwrap();
        book.submit_order(order("x", "good", Side::Sell, 105, 1, 3)).unwrap();

        let removed = book
            .remove_distressed_orders(&[PartyId::new("bad")])
            .unwrap();
        let ids: Vec<&str> = removed.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["b2", "b1", "s1"]);
        assert!(removed.iter().all(|o| o.status == OrderStatus::Stopped));
        assert_eq!(book.order_count(), 1);
        assert!(book.get_orders_per_party(&PartyId::new("bad")).unwrap().is_empty());
    }

    #[test]
    fn cancel_all_for_party() {
        let mut book = new_book();
        book.submit_order(order("z", "p", Side::Buy, 90, 1, 0)).unwrap();
        book.submit_order(order("a", "p", Side::Sell, 110, 1, 1)).unwrap();
        book.submit_order(order("m", "q", Side::Sell, 111, 1, 2)).unwrap();

        let confs = book.cancel_all_orders(&PartyId::new("p")).unwrap();
        let ids: Vec<&str> = confs.iter().map(|c| c.order.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "z"]);
        assert_eq!(book.order_count(), 1);
    }

    #[test]
    fn market_order_price_fallbacks() {
        let cfg = BookConfig::default().with_default_market_order_price(777);
        let mut book = OrderBook::new(market(), cfg);
        assert_eq!(book.market_order_price(Side::Buy), 777);

        book.submit_order(order("b", "p", Side::Buy, 90, 1, 0)).unwrap();
        assert_eq!(book.market_order_price(Side::Buy), 90);
        assert_eq!(book.market_order_price(Side::Sell), 90);

        book.submit_order(order("s", "p", Side::Sell, 110, 1, 1)).unwrap();
        assert_eq!(book.market_order_price(Side::Buy), 110);
    }

    #[test]
    fn market_order_ignores_price() {
        let mut book = new_book();
        book.submit_order(order("s1", "m", Side::Sell, 100, 5, 0)).unwrap();
        book.submit_order(order("s2", "m", Side::Sell, 500, 5, 1)).unwrap();
        let conf = book
            .submit_order(
                order("mkt", "t", Side::Buy, 0, 8, 2)
                    .with_type(OrderType::Market)
                    .with_time_in_force(TimeInForce::Ioc),
            )
            .unwrap();
        assert_eq!(conf.order.status, OrderStatus::Filled);
        assert_eq!(conf.trades[1].price, 500);
    }

    #[test]
    fn closeout_price_walks_levels() {
        let mut book = new_book();
        for (i, p) in [100, 90, 80].into_iter().enumerate() {
            book.submit_order(order(&format!("b{i}"), "p", Side::Buy, p, 100, 0)).unwrap();
        }
        assert_eq!(book.closeout_price(200, Side::Buy).unwrap(), CloseoutPrice::Complete(95));
        assert_eq!(book.closeout_price(300, Side::Buy).unwrap(), CloseoutPrice::Complete(90));
        assert_eq!(
            book.closeout_price(301, Side::Buy).unwrap(),
            CloseoutPrice::NotEnoughOrders { price: 90, available: 300 }
        );
        assert_eq!(book.closeout_price(1, Side::Sell).unwrap(), CloseoutPrice::NoOrders);
    }

    #[test]
    fn auction_uncrosses_at_indicative_price() {
        let mut book = new_book();
        book.enter_auction().unwrap();
        book.submit_order(order("b1", "a", Side::Buy, 2000, 5, 0)).unwrap();
        book.submit_order(order("s1", "b", Side::Sell, 2000, 5, 1)).unwrap();
        book.submit_order(order("b2", "c", Side::Buy, 1900, 5, 2)).unwrap();
        book.submit_order(order("s2", "d", Side::Sell, 1950, 5, 3)).unwrap();

        let quote = book.indicative_price_and_volume().unwrap();
        assert_eq!(quote.price, 1975);
        assert_eq!(quote.volume, 5);
        assert_eq!(quote.side, Some(Side::Buy));
        assert_eq!(book.indicative_price().unwrap(), 1975);
        assert!(book.bid_and_ask_present_after_auction());
        assert!(book.can_leave_auction());

        let preview = book.indicative_trades().unwrap();
        let (confs, expired) = book.leave_auction(Timestamp(10)).unwrap();
        assert!(expired.is_empty());
        assert_eq!(confs.len(), 1);
        assert_eq!(confs[0].order.id.as_str(), "b1");
        assert_eq!(confs[0].order.status, OrderStatus::Filled);
        let fills = |trades: &[Trade]| -> Vec<(TradeId, u64, u64)> {
            trades.iter().map(|t| (t.id, t.price, t.size)).collect()
        };
        assert_eq!(fills(&confs[0].trades), fills(&preview));

        let trade = &confs[0].trades[0];
        assert_eq!(trade.price, 1975);
        assert_eq!(trade.size, 5);
        assert_eq!(trade.sell_order.as_str(), "s2");
        assert_eq!(trade.aggressor, None);
        assert_eq!(trade.timestamp, Timestamp(10));

        assert!(!book.in_auction());
        assert_eq!(book.batch_id(), 1);
        assert_eq!(book.last_traded_price(), 1975);
        assert_eq!(book.best_bid_price(), Some(1900));
        assert_eq!(book.best_ask_price(), Some(2000));
        book.check_integrity().unwrap();
    }

    #[test]
    fn auction_stops_immediate_orders() {
        let mut book = new_book();
        book.submit_order(order("s", "m", Side::Sell, 100, 5, 0)).unwrap();
        book.enter_auction().unwrap();
        let conf = book
            .submit_order(order("b", "t", Side::Buy, 100, 5, 1).with_time_in_force(TimeInForce::Ioc))
            .unwrap();
        assert_eq!(conf.order.status, OrderStatus::Stopped);
        assert!(conf.trades.is_empty());

        let rested = book.submit_order(order("b2", "t", Side::Buy, 100, 5, 2)).unwrap();
        assert_eq!(rested.order.status, OrderStatus::Active);
        assert!(rested.trades.is_empty());
        assert_eq!(book.order_count(), 2);
    }

    #[test]
    fn auction_mode_errors() {
        let mut book = new_book();
        assert!(matches!(book.leave_auction(Timestamp(1)), Err(BookError::NotInAuction)));
        assert!(matches!(book.indicative_price_and_volume(), Err(BookError::NotInAuction)));
        book.enter_auction().unwrap();
        assert!(matches!(book.enter_auction(), Err(BookError::AlreadyInAuction)));
        let (confs, _) = book.leave_auction(Timestamp(1)).unwrap();
        assert!(confs.is_empty());
    }

    #[test]
    fn cache_invalidated_by_cancel_in_auction() {
        let mut book = new_book();
        book.enter_auction().unwrap();
        book.submit_order(order("b", "a", Side::Buy, 101, 5, 0)).unwrap();
        let s = order("s", "b", Side::Sell, 100, 5, 1);
        book.submit_order(s.clone()).unwrap();
        assert_eq!(book.indicative_price_and_volume().unwrap().volume, 5);

        book.cancel_order(&s).unwrap();
        assert!(book.indicative_price_and_volume().unwrap().is_none());
        book.check_integrity().unwrap();
    }

    #[test]
    fn leave_auction_expires_due_orders() {
        let mut book = new_book();
        book.enter_auction().unwrap();
        book.submit_order(order("g", "a", Side::Buy, 90, 5, 0).with_expiry(Timestamp(5)))
            .unwrap();
        book.submit_order(order("s", "b", Side::Sell, 95, 5, 1)).unwrap();
        let (confs, expired) = book.leave_auction(Timestamp(5)).unwrap();
        assert!(confs.is_empty());
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].status, OrderStatus::Expired);
    }

    #[test]
    fn snapshot_roundtrip_preserves_state() {
        let mut book = new_book();
        book.submit_order(order("b1", "a", Side::Buy, 99, 5, 0)).unwrap();
        book.submit_order(order("b2", "b", Side::Buy, 99, 3, 1)).unwrap();
        book.submit_order(order("s1", "c", Side::Sell, 101, 4, 2).with_expiry(Timestamp(9)))
            .unwrap();
        book.enter_auction().unwrap();

        let snap = book.snapshot();
        let bytes = snap.to_bytes().unwrap();
        let restored =
            OrderBook::from_snapshot(BookConfig::default(), MatchingBook::from_bytes(&bytes).unwrap())
                .unwrap();

        assert_eq!(restored.snapshot().to_bytes().unwrap(), bytes);
        assert_eq!(restored.state_hash(), book.state_hash());
        assert!(restored.in_auction());
        assert_eq!(restored.expiring_count(), 1);
        assert_eq!(
            restored.side(Side::Buy).levels()[0].front().unwrap().id.as_str(),
            "b1"
        );
        restored.check_integrity().unwrap();
    }

    #[test]
    fn volume_at_price_counts_better_levels() {
        let mut book = new_book();
        book.submit_order(order("a", "p", Side::Sell, 100, 2, 0)).unwrap();
        book.submit_order(order("b", "p", Side::Sell, 105, 3, 1)).unwrap();
        assert_eq!(book.get_volume_at_price(104, Side::Sell), 2);
        assert_eq!(book.get_volume_at_price(105, Side::Sell), 5);
        assert_eq!(book.total_volume(), 5);
        assert_eq!(book.level_count(), 2);
    }

    #[test]
    fn amend_cannot_grow_size() {
        let mut book = new_book();
        let original = order("a", "p", Side::Buy, 100, 10, 0);
        book.submit_order(original.clone()).unwrap();

        let mut grown = original.clone();
        grown.size = 20;
        let err = book.amend_order(&original, grown).unwrap_err();
        assert!(matches!(
            err,
            BookError::AmendSizeIncrease { resting: 10, amended: 20, .. }
        ));
        assert_eq!(book.get_order_by_id(&original.id).unwrap().size, 10);

        let mut shrunk = original.clone().with_remaining(6);
        shrunk.size = 6;
        assert_eq!(book.amend_order(&original, shrunk).unwrap().size, 6);
        book.check_integrity().unwrap();
    }

    #[test]
    fn amend_keeps_auction_time_in_force() {
        let mut book = new_book();
        let original = order("a", "p", Side::Buy, 100, 10, 0);
        book.submit_order(original.clone()).unwrap();
        let gfn = original.clone().with_time_in_force(TimeInForce::Gfn);
        assert!(matches!(
            book.amend_order(&original, gfn),
            Err(BookError::AmendIdentityChanged(_))
        ));
    }

    #[test]
    fn broken_party_index_is_a_defect() {
        let mut book = new_book();
        book.submit_order(order("a", "me", Side::Buy, 100, 10, 0)).unwrap();
        book.submit_order(order("b", "me", Side::Sell, 105, 10, 1)).unwrap();
        book.orders_per_party
            .entry(PartyId::new("me"))
            .or_default()
            .insert(OrderId::new("ghost"));

        let party = PartyId::new("me");
        assert!(book.get_orders_per_party(&party).unwrap_err().is_defect());
        assert!(book.cancel_all_orders(&party).unwrap_err().is_defect());
        assert_eq!(book.order_count(), 2);
    }

    #[test]
    fn auction_prediction_follows_single_price_uncross() {
        let mut book = new_book();
        book.enter_auction().unwrap();
        book.submit_order(order("s100", "a", Side::Sell, 100, 10, 0)).unwrap();
        book.submit_order(order("b101", "b", Side::Buy, 101, 5, 1)).unwrap();
        book.submit_order(order("b105", "c", Side::Buy, 105, 10, 2)).unwrap();
        book.submit_order(order("s104", "d", Side::Sell, 104, 5, 3)).unwrap();

        let quote = book.indicative_price_and_volume().unwrap();
        assert_eq!((quote.price, quote.volume, quote.side), (102, 10, Some(Side::Buy)));
        assert!(book.bid_and_ask_present_after_auction());
        assert!(book.can_leave_auction());
        let predicted = book.auction_book().unwrap().clone();
        assert_eq!(predicted.best_bid(), Some((101, 5)));
        assert_eq!(predicted.best_ask(), Some((104, 5)));

        let (confs, removed) = book.leave_auction(Timestamp(4)).unwrap();
        assert!(removed.is_empty());
        assert_eq!(confs.len(), 1);
        assert_eq!(book.best_bid_price_and_volume(), predicted.best_bid());
        assert_eq!(book.best_offer_price_and_volume(), predicted.best_ask());
    }

    #[test]
    fn auction_uncross_allows_same_party_cross() {
        let mut book = new_book();
        book.enter_auction().unwrap();
        book.submit_order(order("b", "me", Side::Buy, 100, 5, 0)).unwrap();
        book.submit_order(order("s", "me", Side::Sell, 100, 5, 1)).unwrap();
        book.submit_order(order("b2", "x", Side::Buy, 98, 5, 2)).unwrap();
        book.submit_order(order("s2", "y", Side::Sell, 102, 5, 3)).unwrap();

        assert!(book.can_leave_auction());
        let preview = book.indicative_trades().unwrap();
        assert_eq!(preview.len(), 1);
        assert_eq!(preview[0].buyer, preview[0].seller);

        let (confs, _) = book.leave_auction(Timestamp(4)).unwrap();
        assert_eq!(confs[0].trades[0].buyer.as_str(), "me");
        assert_eq!(confs[0].trades[0].seller.as_str(), "me");
        assert_eq!(book.best_bid_price(), Some(98));
        assert_eq!(book.best_ask_price(), Some(102));
    }

    fn iceberg(id: &str, party: &str, side: Side, price: u64, size: u64, peak: u64, min: u64, t: i64) -> Order {
        order(id, party, side, price, size, t).with_iceberg(peak, min)
    }

    #[test]
    fn iceberg_rests_with_peak_and_loses_priority_on_refresh() {
        let mut book = new_book();
        let rested = book
            .submit_order(iceberg("ice", "i", Side::Buy, 100, 100, 4, 2, 0))
            .unwrap();
        assert_eq!((rested.order.remaining, rested.order.reserved()), (4, 96));
        book.submit_order(order("plain", "p", Side::Buy, 100, 10, 1)).unwrap();
        assert_eq!(book.best_bid_price_and_volume(), Some((100, 110)));

        let conf = book.submit_order(order("s1", "t", Side::Sell, 100, 1, 2)).unwrap();
        assert_eq!(conf.passive_orders_affected[0].remaining, 3);
        assert_eq!(book.side(Side::Buy).levels()[0].front().unwrap().id.as_str(), "ice");

        let conf = book.submit_order(order("s2", "t", Side::Sell, 100, 3, 3)).unwrap();
        let refreshed = &conf.passive_orders_affected[0];
        assert_eq!((refreshed.remaining, refreshed.reserved()), (4, 92));
        assert_eq!(refreshed.created_at, Timestamp(3));
        assert_eq!(book.side(Side::Buy).levels()[0].front().unwrap().id.as_str(), "plain");

        let conf = book.submit_order(order("s3", "t", Side::Sell, 100, 5, 4)).unwrap();
        assert_eq!(conf.trades[0].buy_order.as_str(), "plain");
        book.check_integrity().unwrap();

        let restored = OrderBook::from_snapshot(BookConfig::default(), book.snapshot()).unwrap();
        assert_eq!(restored.snapshot(), book.snapshot());
        assert_eq!(
            restored.side(Side::Buy).levels()[0].front().unwrap().id.as_str(),
            "plain"
        );
    }

    #[test]
    fn aggressive_iceberg_trades_full_size() {
        let mut book = new_book();
        book.submit_order(order("s", "m", Side::Sell, 100, 5, 0)).unwrap();
        let conf = book
            .submit_order(iceberg("ice", "i", Side::Buy, 100, 20, 4, 1, 1))
            .unwrap();
        assert_eq!(conf.trades.len(), 1);
        assert_eq!(conf.trades[0].size, 5);
        assert_eq!(conf.order.status, OrderStatus::Active);
        assert_eq!((conf.order.remaining, conf.order.reserved()), (4, 11));
        assert_eq!(book.best_bid_price_and_volume(), Some((100, 15)));

        let conf = book
            .submit_order(iceberg("big", "j", Side::Sell, 100, 40, 10, 1, 2))
            .unwrap();
        assert_eq!(conf.trades[0].size, 15);
        assert_eq!((conf.order.remaining, conf.order.reserved()), (10, 15));
        book.check_integrity().unwrap();
    }

    #[test]
    fn iceberg_self_trade_is_prevented() {
        let mut book = new_book();
        book.submit_order(iceberg("ice", "me", Side::Sell, 100, 50, 5, 1, 0))
            .unwrap();
        let conf = book.submit_order(order("b", "me", Side::Buy, 100, 10, 1)).unwrap();
        assert_eq!(conf.order.status, OrderStatus::Stopped);
        assert_eq!(conf.order.reason, Some(OrderReason::SelfTrading));
        assert!(conf.trades.is_empty());

        book.submit_order(order("s", "x", Side::Sell, 99, 2, 2)).unwrap();
        let conf = book
            .submit_order(iceberg("mine", "me", Side::Buy, 100, 10, 2, 1, 3))
            .unwrap();
        assert_eq!(conf.order.status, OrderStatus::PartiallyFilled);
        assert_eq!(conf.trades.len(), 1);
        assert!(book.get_order_by_id(&OrderId::new("mine")).is_err());
    }

    #[test]
    fn iceberg_validation() {
        let mut book = new_book();
        let ioc = iceberg("a", "p", Side::Buy, 100, 10, 2, 1, 0).with_time_in_force(TimeInForce::Ioc);
        assert!(matches!(book.submit_order(ioc), Err(BookError::IcebergNotAllowed(_))));
        let market = iceberg("b", "p", Side::Buy, 0, 10, 2, 1, 0)
            .with_type(OrderType::Market)
            .with_time_in_force(TimeInForce::Fok);
        assert!(matches!(book.submit_order(market), Err(BookError::IcebergNotAllowed(_))));
        for (peak, min) in [(0, 0), (2, 0), (2, 3)] {
            let bad = iceberg("c", "p", Side::Buy, 100, 10, peak, min, 0);
            assert!(matches!(book.submit_order(bad), Err(BookError::InvalidIceberg(_))));
        }
        assert_eq!(book.order_count(), 0);
    }

    #[test]
    fn iceberg_amend_shrinks_reserve_only() {
        let mut book = new_book();
        let rested = book
            .submit_order(iceberg("ice", "p", Side::Buy, 100, 20, 4, 1, 0))
            .unwrap()
            .order;

        let mut shown_more = rested.clone();
        shown_more.remaining = 5;
        shown_more.iceberg.as_mut().unwrap().reserved_remaining = 15;
        assert!(matches!(
            book.amend_order(&rested, shown_more),
            Err(BookError::AmendSizeIncrease { .. })
        ));

        let mut reshaped = rested.clone();
        reshaped.iceberg = Some(IcebergOrder {
            peak_size: 8,
            ..rested.iceberg.unwrap()
        });
        assert!(matches!(
            book.amend_order(&rested, reshaped),
            Err(BookError::AmendIdentityChanged(_))
        ));

        let mut smaller = rested.clone();
        smaller.size = 14;
        smaller.iceberg.as_mut().unwrap().reserved_remaining = 10;
        let amended = book.amend_order(&rested, smaller).unwrap();
        assert_eq!(amended.true_remaining(), 14);
        assert_eq!(book.best_bid_price_and_volume(), Some((100, 14)));
        book.check_integrity().unwrap();
    }

    #[test]
    fn gfn_orders_cancelled_on_entering_auction() {
        let mut book = new_book();
        book.submit_order(order("gfn", "a", Side::Buy, 99, 5, 0).with_time_in_force(TimeInForce::Gfn))
            .unwrap();
        book.submit_order(order("gtc", "b", Side::Sell, 101, 5, 1)).unwrap();
        let gfa = order("gfa", "c", Side::Buy, 99, 5, 2).with_time_in_force(TimeInForce::Gfa);
        assert!(matches!(book.submit_order(gfa), Err(BookError::GfaOutsideAuction(_))));

        let cancelled = book.enter_auction().unwrap();
        assert_eq!(cancelled.len(), 1);
        assert_eq!(cancelled[0].id.as_str(), "gfn");
        assert_eq!(cancelled[0].status, OrderStatus::Cancelled);
        assert_eq!(book.order_count(), 1);
        assert_eq!(book.indicative_price_and_volume().unwrap(), IndicativeQuote::NONE);

        let late = order("gfn2", "a", Side::Buy, 99, 5, 3).with_time_in_force(TimeInForce::Gfn);
        assert!(matches!(book.submit_order(late), Err(BookError::GfnDuringAuction(_))));
        book.check_integrity().unwrap();
    }

    #[test]
    fn gfa_orders_cancelled_on_leaving_auction() {
        let mut book = new_book();
        book.enter_auction().unwrap();
        let gfa = |id: &str, side, price, size, t| {
            order(id, "g", side, price, size, t).with_time_in_force(TimeInForce::Gfa)
        };
        book.submit_order(gfa("g1", Side::Buy, 101, 5, 0)).unwrap();
        book.submit_order(order("s1", "s", Side::Sell, 100, 5, 1)).unwrap();
        book.submit_order(gfa("g2", Side::Buy, 95, 5, 2)).unwrap();
        book.submit_order(order("s2", "s", Side::Sell, 105, 5, 3)).unwrap();

        // The only bid left after the uncross is cancelled on exit.
        assert!(!book.bid_and_ask_present_after_auction());
        assert!(!book.can_leave_auction());

        let (confs, removed) = book.leave_auction(Timestamp(4)).unwrap();
        assert_eq!(confs.len(), 1);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id.as_str(), "g2");
        assert_eq!(removed[0].status, OrderStatus::Cancelled);
        assert_eq!(book.best_bid_price(), None);
        assert_eq!(book.best_ask_price(), Some(105));
        book.check_integrity().unwrap();
    }
}
