//! # tickbook-matching
//!
//! **Deterministic single-market order book with price-time priority
//! matching and call auctions.**
//!
//! Every replica that applies the same ordered commands to an [`OrderBook`]
//! must end in the same state and emit the same trades. Accordingly the
//! crate has:
//!
//! - **No I/O and no clock**: timestamps come in on orders and commands
//! - **Ordered iteration only**: price levels, `BTreeMap`s and FIFO queues
//! - **Integer arithmetic**: prices and sizes are `u64`, notional sums `u128`
//! - **Self-trade prevention** during continuous matching
//!
//! [`BookSide`] and [`PriceLevel`] do the matching. [`ExpiringOrders`]
//! indexes GTT orders. [`IndicativePriceAndVolume`] prices the auction and
//! [`AuctionBook`] predicts the book it leaves behind. [`BookCache`] memoizes
//! the indicative quote.

pub mod auction;
pub mod cache;
pub mod determinism;
pub mod expiring;
pub mod indicative;
pub mod orderbook;
pub mod price_level;
pub mod side;

pub use auction::AuctionBook;
pub use cache::BookCache;
pub use determinism::{compute_state_hash, compute_trade_root, verify_trade_root};
pub use expiring::ExpiringOrders;
pub use indicative::{CumulativeLevel, IndicativePriceAndVolume};
pub use orderbook::OrderBook;
pub use price_level::{LevelOutcome, PriceLevel, TradeContext};
pub use side::{BookSide, UncrossOutcome};
