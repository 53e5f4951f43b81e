//! Commands delivered by the transaction layer, in agreed order.

use serde::{Deserialize, Serialize};
use tickbook_types::{MarketId, Order, PartyId, Timestamp};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Create an empty book in continuous trading.
    OpenMarket { market_id: MarketId },
    Submit { order: Order },
    Cancel { order: Order },
    Amend { original: Order, amended: Order },
    RemoveExpired { market_id: MarketId, now: Timestamp },
    EnterAuction { market_id: MarketId },
    LeaveAuction { market_id: MarketId, now: Timestamp },
    RemoveDistressed { market_id: MarketId, parties: Vec<PartyId> },
    CancelAll { market_id: MarketId, party: PartyId },
}

impl Command {
    /// The market this command applies to.
    #[must_use]
    pub fn market_id(&self) -> &MarketId {
        match self {
            Self::Submit { order } | Self::Cancel { order } => &order.market_id,
            Self::Amend { original, .. } => &original.market_id,
            Self::OpenMarket { market_id }
            | Self::RemoveExpired { market_id, .. }
            | Self::EnterAuction { market_id }
            | Self::LeaveAuction { market_id, .. }
            | Self::RemoveDistressed { market_id, .. }
            | Self::CancelAll { market_id, .. } => market_id,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::OpenMarket { .. } => "open_market",
            Self::Submit { .. } => "submit",
            Self::Cancel { .. } => "cancel",
            Self::Amend { .. } => "amend",
            Self::RemoveExpired { .. } => "remove_expired",
            Self::EnterAuction { .. } => "enter_auction",
            Self::LeaveAuction { .. } => "leave_auction",
            Self::RemoveDistressed { .. } => "remove_distressed",
            Self::CancelAll { .. } => "cancel_all",
        }
    }
}
