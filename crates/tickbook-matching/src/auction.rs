//! The book as it would stand right after leaving the auction.
//!
//! [`AuctionBook`] runs the same call uncross that
//! [`OrderBook::leave_auction`](crate::OrderBook::leave_auction) performs:
//! whole orders are taken from the uncrossing side, best first, until the
//! indicative volume is reached, and each is matched at the indicative price
//! against the opposite side with no self-trade check. Only the opposite
//! levels that clear at that price are copied; the real sides stay
//! untouched.
//!
//! What survives becomes the residual bid and ask levels that continuous
//! trading would open with. GFA orders are left out since they are
//! cancelled on exit. Expiry is not modelled: GTT orders due at the exit
//! timestamp are swept after the uncross.

use std::collections::BTreeMap;

use tickbook_types::{IndicativeQuote, Order, Result, Side, TimeInForce, Trade};

use crate::price_level::{PriceLevel, TradeContext};
use crate::side::BookSide;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuctionBook {
    quote: IndicativeQuote,
    trades: Vec<Trade>,
    /// Residual buy volume per price.
    bids: BTreeMap<u64, u64>,
    /// Residual sell volume per price.
    asks: BTreeMap<u64, u64>,
}

impl AuctionBook {
    /// Uncross `buy` and `sell` at `quote`.
    ///
    /// Fails with a defect if the sides cannot deliver `quote.volume` at
    /// `quote.price`.
    pub fn uncross(
        buy: &BookSide,
        sell: &BookSide,
        quote: IndicativeQuote,
        ctx: &TradeContext<'_>,
    ) -> Result<Self> {
        let mut book = Self {
            quote,
            ..Self::default()
        };
        let Some(uncross_side) = quote.side.filter(|_| !quote.is_none()) else {
            book.absorb(buy.levels().iter().flat_map(PriceLevel::orders));
            book.absorb(sell.levels().iter().flat_map(PriceLevel::orders));
            return Ok(book);
        };
        let (own, opposite) = match uncross_side {
            Side::Buy => (buy, sell),
            Side::Sell => (sell, buy),
        };

        let aggressors = own.plan_extraction(quote.price, quote.volume)?;
        book.absorb(
            own.levels_best_first()
                .flat_map(PriceLevel::orders)
                .skip(aggressors.len()),
        );

        let (trades, touched) = opposite.simulate_auction(&aggressors, quote.price, ctx)?;
        book.absorb(touched.iter().flat_map(PriceLevel::orders));
        book.absorb(
            opposite
                .levels_best_first()
                .skip_while(|l| opposite.clears_at(l.price, quote.price))
                .flat_map(PriceLevel::orders),
        );
        book.trades = trades;
        Ok(book)
    }

    fn absorb<'a>(&mut self, orders: impl Iterator<Item = &'a Order>) {
        for order in orders.filter(|o| o.time_in_force != TimeInForce::Gfa) {
            let levels = match order.side {
                Side::Buy => &mut self.bids,
                Side::Sell => &mut self.asks,
            };
            *levels.entry(order.price).or_default() += order.true_remaining();
        }
    }

    #[must_use]
    pub fn quote(&self) -> IndicativeQuote {
        self.quote
    }

    /// Trades the uncross prints, in execution order.
    #[must_use]
    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    #[must_use]
    pub fn traded_volume(&self) -> u64 {
        self.trades.iter().map(|t| t.size).sum()
    }

    /// Both a bid and an ask remain once the uncross settles.
    #[must_use]
    pub fn bid_and_ask_present(&self) -> bool {
        !self.bids.is_empty() && !self.asks.is_empty()
    }

    /// Best residual bid and its volume.
    #[must_use]
    pub fn best_bid(&self) -> Option<(u64, u64)> {
        self.bids.last_key_value().map(|(p, v)| (*p, *v))
    }

    /// Best residual ask and its volume.
    #[must_use]
    pub fn best_ask(&self) -> Option<(u64, u64)> {
        self.asks.first_key_value().map(|(p, v)| (*p, *v))
    }
}
