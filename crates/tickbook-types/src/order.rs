//! Order types for the tickbook order book.
//!
//! Prices are unsigned integers in market tick units. Price `0` is only
//! meaningful for unpriced market and network orders.

use serde::{Deserialize, Serialize};

use crate::{MarketId, OrderId, PartyId, Timestamp};

/// Which side of the book this order is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// How long an order may live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum TimeInForce {
    /// Good till cancelled.
    Gtc,
    /// Good till time; requires `expires_at`.
    Gtt,
    /// Immediate or cancel.
    Ioc,
    /// Fill or kill.
    Fok,
    /// Good for auction; cancelled when the book leaves auction.
    Gfa,
    /// Good for normal trading; cancelled when the book enters auction.
    Gfn,
}

impl TimeInForce {
    /// Everything except IOC and FOK may rest on the book.
    #[must_use]
    pub fn is_persistent(self) -> bool {
        !matches!(self, Self::Ioc | Self::Fok)
    }
}

impl std::fmt::Display for TimeInForce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gtc => write!(f, "GTC"),
            Self::Gtt => write!(f, "GTT"),
            Self::Ioc => write!(f, "IOC"),
            Self::Fok => write!(f, "FOK"),
            Self::Gfa => write!(f, "GFA"),
            Self::Gfn => write!(f, "GFN"),
        }
    }
}

/// The type of order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum OrderType {
    Limit,
    Market,
    /// Submitted by the protocol itself to close out a distressed position.
    Network,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Limit => write!(f, "LIMIT"),
            Self::Market => write!(f, "MARKET"),
            Self::Network => write!(f, "NETWORK"),
        }
    }
}

/// Lifecycle status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum OrderStatus {
    Active,
    Filled,
    PartiallyFilled,
    Stopped,
    Cancelled,
    Expired,
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "ACTIVE"),
            Self::Filled => write!(f, "FILLED"),
            Self::PartiallyFilled => write!(f, "PARTIALLY_FILLED"),
            Self::Stopped => write!(f, "STOPPED"),
            Self::Cancelled => write!(f, "CANCELLED"),
            Self::Expired => write!(f, "EXPIRED"),
        }
    }
}

/// Why an order was stopped by the book rather than by its own lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderReason {
    /// Matching halted on a resting order from the same party.
    SelfTrading,
}

/// Hidden-size parameters of an iceberg order.
///
/// Only `peak_size` is ever displayed at once. While resting, whenever the
/// displayed part drops below `minimum_visible_size` it is topped back up to
/// `peak_size` from `reserved_remaining`, and the order moves to the back of
/// its queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IcebergOrder {
    pub peak_size: u64,
    pub minimum_visible_size: u64,
    /// Hidden volume not yet displayed.
    pub reserved_remaining: u64,
}

impl IcebergOrder {
    #[must_use]
    pub fn new(peak_size: u64, minimum_visible_size: u64) -> Self {
        Self {
            peak_size,
            minimum_visible_size,
            reserved_remaining: 0,
        }
    }
}

/// An order as seen by the matching core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub market_id: MarketId,
    pub party: PartyId,
    pub side: Side,
    pub price: u64,
    pub size: u64,
    pub remaining: u64,
    pub time_in_force: TimeInForce,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub reason: Option<OrderReason>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    /// Zero unless `time_in_force` is GTT.
    pub expires_at: Timestamp,
    /// Book batch counter at the time the order was last touched.
    pub batch_id: u64,
    /// Set for iceberg orders; `remaining` is then the displayed part only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iceberg: Option<IcebergOrder>,
}

impl Order {
    /// A GTC limit order with `remaining == size`.
    #[must_use]
    pub fn limit(
        id: impl Into<OrderId>,
        market_id: impl Into<MarketId>,
        party: impl Into<PartyId>,
        side: Side,
        price: u64,
        size: u64,
    ) -> Self {
        Self {
            id: id.into(),
            market_id: market_id.into(),
            party: party.into(),
            side,
            price,
            size,
            remaining: size,
            time_in_force: TimeInForce::Gtc,
            order_type: OrderType::Limit,
            status: OrderStatus::Active,
            reason: None,
            created_at: Timestamp::ZERO,
            updated_at: Timestamp::ZERO,
            expires_at: Timestamp::ZERO,
            batch_id: 0,
            iceberg: None,
        }
    }

    #[must_use]
    pub fn with_time_in_force(mut self, tif: TimeInForce) -> Self {
        self.time_in_force = tif;
        self
    }

    /// Turn the order into a GTT order expiring at `expires_at`.
    #[must_use]
    pub fn with_expiry(mut self, expires_at: Timestamp) -> Self {
        self.time_in_force = TimeInForce::Gtt;
        self.expires_at = expires_at;
        self
    }

    #[must_use]
    pub fn with_type(mut self, order_type: OrderType) -> Self {
        self.order_type = order_type;
        self
    }

    #[must_use]
    pub fn with_created_at(mut self, ts: Timestamp) -> Self {
        self.created_at = ts;
        self.updated_at = ts;
        self
    }

    #[must_use]
    pub fn with_remaining(mut self, remaining: u64) -> Self {
        self.remaining = remaining;
        self
    }

    /// Turn the order into an iceberg showing at most `peak_size` at once.
    #[must_use]
    pub fn with_iceberg(mut self, peak_size: u64, minimum_visible_size: u64) -> Self {
        self.iceberg = Some(IcebergOrder::new(peak_size, minimum_visible_size));
        self
    }

    /// Hidden iceberg volume, zero for plain orders.
    #[must_use]
    pub fn reserved(&self) -> u64 {
        self.iceberg.map_or(0, |i| i.reserved_remaining)
    }

    /// Displayed plus hidden volume.
    #[must_use]
    pub fn true_remaining(&self) -> u64 {
        self.remaining + self.reserved()
    }

    #[must_use]
    pub fn is_filled(&self) -> bool {
        self.true_remaining() == 0
    }

    #[must_use]
    pub fn filled(&self) -> u64 {
        self.size.saturating_sub(self.true_remaining())
    }

    /// Move all hidden volume into `remaining`. Icebergs trade with their
    /// full size when they aggress.
    pub fn reveal_all(&mut self) {
        if let Some(iceberg) = self.iceberg.as_mut() {
            self.remaining += iceberg.reserved_remaining;
            iceberg.reserved_remaining = 0;
        }
    }

    /// Split `remaining` into a displayed peak and a hidden reserve.
    pub fn set_peaks(&mut self) {
        self.reveal_all();
        if let Some(iceberg) = self.iceberg.as_mut() {
            let visible = self.remaining.min(iceberg.peak_size);
            iceberg.reserved_remaining = self.remaining - visible;
            self.remaining = visible;
        }
    }

    /// Whether the displayed part fell below its minimum while hidden volume
    /// remains.
    #[must_use]
    pub fn needs_refresh(&self) -> bool {
        self.iceberg.is_some_and(|i| {
            i.reserved_remaining > 0 && self.remaining < i.minimum_visible_size
        })
    }

    /// Top the displayed part back up to the peak from the reserve.
    pub fn refresh(&mut self) {
        if let Some(iceberg) = self.iceberg.as_mut() {
            let refill = iceberg
                .peak_size
                .saturating_sub(self.remaining)
                .min(iceberg.reserved_remaining);
            self.remaining += refill;
            iceberg.reserved_remaining -= refill;
        }
    }

    #[must_use]
    pub fn is_persistent(&self) -> bool {
        self.time_in_force.is_persistent()
    }

    /// Market and network orders ignore the price limit when matching.
    #[must_use]
    pub fn ignores_price(&self) -> bool {
        matches!(self.order_type, OrderType::Market | OrderType::Network)
    }

    /// Whether a resting order at `level_price` satisfies this order's limit.
    #[must_use]
    pub fn accepts_price(&self, level_price: u64) -> bool {
        if self.ignores_price() {
            return true;
        }
        match self.side {
            Side::Buy => level_price <= self.price,
            Side::Sell => level_price >= self.price,
        }
    }
}

/// Test helpers.
#[cfg(any(test, feature = "test-helpers"))]
impl Order {
    /// Market used by [`Order::fixture`].
    pub const FIXTURE_MARKET: &'static str = "TEST/MARKET";

    /// A GTC limit order in [`Order::FIXTURE_MARKET`].
    pub fn fixture(id: &str, party: &str, side: Side, price: u64, size: u64) -> Self {
        Self::limit(id, Self::FIXTURE_MARKET, party, side, price, size)
    }
}
