//! Serializable snapshot of one book.
//!
//! Each side's orders are listed in ascending `created_at` order, so
//! re-inserting them one by one into empty sides rebuilds the same levels
//! with the same FIFO queues.

use serde::{Deserialize, Serialize};

use crate::{BookError, MarketId, Order, Result, Timestamp, constants};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchingBook {
    pub version: u32,
    pub market_id: MarketId,
    pub buy: Vec<Order>,
    pub sell: Vec<Order>,
    pub last_traded_price: u64,
    pub auction: bool,
    pub batch_id: u64,
    pub latest_timestamp: Timestamp,
}

impl MatchingBook {
    /// Deterministic byte encoding.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let snap: Self = serde_json::from_slice(bytes)?;
        if snap.version != constants::SNAPSHOT_VERSION {
            return Err(BookError::UnsupportedSnapshot(snap.version));
        }
        Ok(snap)
    }

    #[must_use]
    pub fn order_count(&self) -> usize {
        self.buy.len() + self.sell.len()
    }
}
