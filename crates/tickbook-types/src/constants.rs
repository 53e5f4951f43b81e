//! System-wide constants for the tickbook order book.

/// Version of the [`MatchingBook`](crate::MatchingBook) snapshot layout.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Domain separator for [`TradeId`](crate::TradeId) derivation.
pub const TRADE_ID_DOMAIN: &[u8] = b"tickbook:trade_id:v1:";

/// Domain separator for the per-book state hash.
pub const STATE_HASH_DOMAIN: &[u8] = b"tickbook:state_hash:v1:";

/// Domain separator for the replay-log hash chained over applied commands.
pub const REPLAY_HASH_DOMAIN: &[u8] = b"tickbook:replay:v1:";

/// Price returned for market orders when both sides of the book are empty.
pub const DEFAULT_MARKET_ORDER_PRICE: u64 = 0;
