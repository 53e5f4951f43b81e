//! Auction pricing over aggregate volume per price.
//!
//! While a book is in auction, both sides are merged into one price-keyed
//! index holding independent buy and sell volume. Order flow during the
//! auction only adds or removes volume here; no trades are produced.
//!
//! ## Uncrossing price
//!
//! Over the crossed range `[best ask, best bid]`, with levels walked from the
//! highest price down:
//!
//! - `cumulative_bid(p)` is the buy volume priced at or above `p`
//! - `cumulative_ask(p)` is the sell volume priced at or below `p`
//! - `max_tradable = max_p min(cumulative_bid(p), cumulative_ask(p))`
//!
//! Several prices can reach `max_tradable`. The uncrossing price is the
//! floored midpoint of the highest and the lowest of them. Any price in that
//! span clears at least `max_tradable` on both sides, so the midpoint is
//! always executable.
//!
//! The uncrossing side is found by walking bid volume from the highest price
//! down: if it reaches `max_tradable` exactly, buy orders can be taken whole
//! and the buy side uncrosses; if it overshoots, the sell side does.

use std::collections::BTreeMap;

use tickbook_types::{BookError, IndicativeQuote, Result, Side};

use crate::side::BookSide;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct IpvLevel {
    buy: u64,
    sell: u64,
}

impl IpvLevel {
    fn is_empty(self) -> bool {
        self.buy == 0 && self.sell == 0
    }
}

/// One price in the cumulative curve, highest price first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CumulativeLevel {
    pub price: u64,
    pub bid_volume: u64,
    pub ask_volume: u64,
    pub cumulative_bid: u64,
    pub cumulative_ask: u64,
    pub max_tradable: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndicativePriceAndVolume {
    levels: BTreeMap<u64, IpvLevel>,
}

impl IndicativePriceAndVolume {
    /// Merge the current levels of both sides.
    #[must_use]
    pub fn new(buy: &BookSide, sell: &BookSide) -> Self {
        let mut ipv = Self::default();
        for (side, book) in [(Side::Buy, buy), (Side::Sell, sell)] {
            for level in book.levels() {
                ipv.add_volume_at_price(level.price, level.volume(), side);
            }
        }
        ipv
    }

    pub fn add_volume_at_price(&mut self, price: u64, volume: u64, side: Side) {
        if volume == 0 {
            return;
        }
        let level = self.levels.entry(price).or_default();
        match side {
            Side::Buy => level.buy += volume,
            Side::Sell => level.sell += volume,
        }
    }

    /// Fails with a defect if more volume is removed than was added.
    pub fn remove_volume_at_price(&mut self, price: u64, volume: u64, side: Side) -> Result<()> {
        if volume == 0 {
            return Ok(());
        }
        let level = self.levels.get_mut(&price).ok_or_else(|| {
            BookError::invariant(format!("no indicative level at {price} to remove {volume}"))
        })?;
        let slot = match side {
            Side::Buy => &mut level.buy,
            Side::Sell => &mut level.sell,
        };
        *slot = slot.checked_sub(volume).ok_or_else(|| {
            BookError::invariant(format!(
                "indicative {side} volume at {price} is {slot}, cannot remove {volume}"
            ))
        })?;
        if level.is_empty() {
            self.levels.remove(&price);
        }
        Ok(())
    }

    /// Aggregate (buy, sell) volume at `price`.
    #[must_use]
    pub fn volume_at(&self, price: u64) -> (u64, u64) {
        self.levels
            .get(&price)
            .map_or((0, 0), |level| (level.buy, level.sell))
    }

    #[must_use]
    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Cumulative curves over `[min_price, max_price]`, highest price first,
    /// plus the maximum tradable volume.
    #[must_use]
    pub fn cumulative_price_levels(
        &self,
        max_price: u64,
        min_price: u64,
    ) -> (Vec<CumulativeLevel>, u64) {
        if max_price < min_price {
            return (Vec::new(), 0);
        }

        let mut curve: Vec<CumulativeLevel> = self
            .levels
            .range(min_price..=max_price)
            .rev()
            .map(|(&price, level)| CumulativeLevel {
                price,
                bid_volume: level.buy,
                ask_volume: level.sell,
                ..CumulativeLevel::default()
            })
            .collect();

        let mut bid = 0;
        for level in &mut curve {
            bid += level.bid_volume;
            level.cumulative_bid = bid;
        }
        let mut ask = 0;
        let mut max_tradable = 0;
        for level in curve.iter_mut().rev() {
            ask += level.ask_volume;
            level.cumulative_ask = ask;
            level.max_tradable = level.cumulative_bid.min(ask);
            max_tradable = max_tradable.max(level.max_tradable);
        }
        (curve, max_tradable)
    }

    /// Price, volume and side the auction would uncross at, given the real
    /// best bid and best ask. Returns [`IndicativeQuote::NONE`] if the book
    /// is not crossed.
    #[must_use]
    pub fn indicative_quote(&self, best_bid: Option<u64>, best_ask: Option<u64>) -> IndicativeQuote {
        let (Some(best_bid), Some(best_ask)) = (best_bid, best_ask) else {
            return IndicativeQuote::NONE;
        };
        let (curve, max_tradable) = self.cumulative_price_levels(best_bid, best_ask);
        if max_tradable == 0 {
            return IndicativeQuote::NONE;
        }

        let mut at_max = curve
            .iter()
            .filter(|l| l.max_tradable == max_tradable)
            .map(|l| l.price);
        let Some(highest) = at_max.next() else {
            return IndicativeQuote::NONE;
        };
        let lowest = at_max.last().unwrap_or(highest);
        let price = lowest + (highest - lowest) / 2;

        let side = curve
            .iter()
            .find(|l| l.cumulative_bid >= max_tradable)
            .map(|l| {
                if l.cumulative_bid == max_tradable {
                    Side::Buy
                } else {
                    Side::Sell
                }
            });

        IndicativeQuote {
            price,
            volume: max_tradable,
            side,
        }
    }
}
