//! Identifiers and logical time used throughout tickbook.
//!
//! Order, party and market identifiers are assigned by the transaction layer
//! upstream of the book, so they are plain string newtypes. Trade identifiers
//! are derived here, deterministically, so every replica names the same fill
//! the same way.

use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::TRADE_ID_DOMAIN;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Default, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            #[must_use]
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// OrderId / PartyId / MarketId
// ---------------------------------------------------------------------------

string_id!(
    /// Identifier of an order, unique within a market.
    OrderId
);

string_id!(
    /// Identifier of a trading party (account).
    PartyId
);

string_id!(
    /// Identifier of the market a book serves.
    MarketId
);

// ---------------------------------------------------------------------------
// TradeId
// ---------------------------------------------------------------------------

/// Trade identifier, derived from the aggressor and its fill sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct TradeId(pub Uuid);

impl TradeId {
    /// Derive the id of the `fill_sequence`-th trade generated by `aggressor`
    /// within batch `batch_id`.
    #[must_use]
    pub fn deterministic(aggressor: &OrderId, batch_id: u64, fill_sequence: u64) -> Self {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(TRADE_ID_DOMAIN);
        hasher.update((aggressor.0.len() as u64).to_be_bytes());
        hasher.update(aggressor.0.as_bytes());
        hasher.update(batch_id.to_be_bytes());
        hasher.update(fill_sequence.to_be_bytes());
        let hash = hasher.finalize();
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&hash[..16]);
        Self(Uuid::from_bytes(bytes))
    }

    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0.as_bytes()[..4])
    }
}

impl fmt::Display for TradeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Timestamp
// ---------------------------------------------------------------------------

/// Logical time in nanoseconds since the UNIX epoch.
///
/// Supplied by the replay layer (block time), never read from a wall clock
/// inside the book.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Default, Serialize, Deserialize,
)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    #[must_use]
    pub fn as_nanos(self) -> i64 {
        self.0
    }

    #[must_use]
    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub fn to_datetime(self) -> DateTime<Utc> {
        Utc.timestamp_nanos(self.0)
    }
}

impl From<DateTime<Utc>> for Timestamp {
    /// Times outside the `i64` nanosecond range saturate.
    fn from(dt: DateTime<Utc>) -> Self {
        match dt.timestamp_nanos_opt() {
            Some(nanos) => Self(nanos),
            None if dt.timestamp() < 0 => Self(i64::MIN),
            None => Self(i64::MAX),
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_datetime().to_rfc3339())
    }
}
