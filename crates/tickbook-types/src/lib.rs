//! # tickbook-types
//!
//! Shared types, errors, and configuration for the **tickbook** order book.
//!
//! This crate is the leaf dependency of the workspace. It defines:
//!
//! - **Identifiers**: [`OrderId`], [`PartyId`], [`MarketId`], [`TradeId`], [`Timestamp`]
//! - **Order model**: [`Order`], [`Side`], [`TimeInForce`], [`OrderType`], [`OrderStatus`]
//! - **Trade model**: [`Trade`]
//! - **Operation results**: [`OrderConfirmation`], [`CloseoutPrice`], [`IndicativeQuote`]
//! - **Outbound events**: [`BookEvent`]
//! - **Snapshot**: [`MatchingBook`]
//! - **Configuration**: [`BookConfig`]
//! - **Errors**: [`BookError`] with `TB_ERR_` prefix codes
//! - **Constants**: snapshot version and hash domain separators

pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod ids;
pub mod order;
pub mod outcome;
pub mod snapshot;
pub mod trade;

// Re-export all primary types at crate root for ergonomic imports:
//   use tickbook_types::{Order, Side, Trade, BookError, ...};

pub use config::*;
pub use error::*;
pub use events::*;
pub use ids::*;
pub use order::*;
pub use outcome::*;
pub use snapshot::*;
pub use trade::*;

// Constants are accessed via `tickbook_types::constants::FOO`
// (not re-exported to avoid name collisions).
