//! Memo slots for the indicative auction quote.
//!
//! Every mutating book operation calls [`BookCache::invalidate`], which
//! clears all three slots unconditionally. Reads go through `&self`, so the
//! slots use [`Cell`].

use std::cell::Cell;

use tickbook_types::{IndicativeQuote, Side};

#[derive(Debug, Clone, Default)]
pub struct BookCache {
    indicative_price: Cell<Option<u64>>,
    indicative_volume: Cell<Option<u64>>,
    indicative_side: Cell<Option<Option<Side>>>,
}

impl BookCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invalidate(&self) {
        self.indicative_price.set(None);
        self.indicative_volume.set(None);
        self.indicative_side.set(None);
    }

    #[must_use]
    pub fn indicative_price(&self) -> Option<u64> {
        self.indicative_price.get()
    }

    pub fn set_indicative_price(&self, price: u64) {
        self.indicative_price.set(Some(price));
    }

    #[must_use]
    pub fn indicative_volume(&self) -> Option<u64> {
        self.indicative_volume.get()
    }

    pub fn set_indicative_volume(&self, volume: u64) {
        self.indicative_volume.set(Some(volume));
    }

    #[must_use]
    pub fn indicative_side(&self) -> Option<Option<Side>> {
        self.indicative_side.get()
    }

    pub fn set_indicative_side(&self, side: Option<Side>) {
        self.indicative_side.set(Some(side));
    }

    /// The full quote, if all three slots are valid.
    #[must_use]
    pub fn quote(&self) -> Option<IndicativeQuote> {
        Some(IndicativeQuote {
            price: self.indicative_price()?,
            volume: self.indicative_volume()?,
            side: self.indicative_side()?,
        })
    }

    pub fn store_quote(&self, quote: IndicativeQuote) {
        self.set_indicative_price(quote.price);
        self.set_indicative_volume(quote.volume);
        self.set_indicative_side(quote.side);
    }
}
