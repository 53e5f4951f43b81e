//! Error types for the tickbook order book.
//!
//! All errors use the `TB_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by category:
//! - 1xx: Validation errors (order rejected before touching the book)
//! - 2xx: Integrity errors (request references state the book does not hold)
//! - 3xx: Trading-mode errors
//! - 8xx: Snapshot errors
//! - 9xx: Defects (impossible states; processing must halt)
//!
//! Insufficient liquidity is not an error: closeout queries return
//! [`CloseoutPrice`](crate::CloseoutPrice) and unfillable FOK orders come
//! back `Stopped`.

use thiserror::Error;

use crate::{MarketId, OrderId, PartyId, Side, Timestamp};

/// Central error enum for all book operations.
#[derive(Debug, Error)]
pub enum BookError {
    // =================================================================
    // Validation Errors (1xx)
    // =================================================================
    #[error("TB_ERR_100: Order has an empty ID")]
    EmptyOrderId,

    #[error("TB_ERR_101: Order {0} has an empty market ID")]
    EmptyMarketId(OrderId),

    #[error("TB_ERR_102: Order {0} has an empty party ID")]
    EmptyPartyId(OrderId),

    /// Remaining is zero or larger than size.
    #[error("TB_ERR_103: Order {id} has invalid remaining {remaining} for size {size}")]
    InvalidRemaining { id: OrderId, remaining: u64, size: u64 },

    #[error("TB_ERR_104: GTT order {0} has no expiry")]
    MissingExpiry(OrderId),

    #[error("TB_ERR_105: Order {0} of this type cannot be GTT")]
    GttNotAllowed(OrderId),

    #[error("TB_ERR_106: Market order {0} must be IOC or FOK")]
    InvalidMarketTimeInForce(OrderId),

    #[error("TB_ERR_107: Network order {0} must be FOK")]
    InvalidNetworkTimeInForce(OrderId),

    /// `created_at` precedes the latest timestamp the book has seen.
    #[error("TB_ERR_108: Order {id} out of sequence: created at {created_at}, book at {latest}")]
    OutOfSequence {
        id: OrderId,
        created_at: Timestamp,
        latest: Timestamp,
    },

    #[error("TB_ERR_109: Requested volume must be positive")]
    InvalidVolume,

    #[error("TB_ERR_110: Order {0} has a zero price")]
    ZeroPrice(OrderId),

    /// Peak or minimum visible size is zero, or the minimum exceeds the peak.
    #[error("TB_ERR_111: Order {0} has invalid iceberg parameters")]
    InvalidIceberg(OrderId),

    #[error("TB_ERR_112: Order {0} cannot be an iceberg; only resting limit orders can")]
    IcebergNotAllowed(OrderId),

    // =================================================================
    // Integrity Errors (2xx)
    // =================================================================
    #[error("TB_ERR_200: Order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("TB_ERR_201: Order already exists: {0}")]
    DuplicateOrder(OrderId),

    #[error("TB_ERR_202: Market mismatch: book {book}, order {order}")]
    MarketMismatch { book: MarketId, order: MarketId },

    /// Cancel/amend named a side or price that does not match the resting order.
    #[error("TB_ERR_203: Order {id} is not resting on {side} at {price}")]
    SideOrPriceMismatch { id: OrderId, side: Side, price: u64 },

    #[error("TB_ERR_204: Amend of {id} changes party from {original} to {amended}")]
    AmendPartyChanged {
        id: OrderId,
        original: PartyId,
        amended: PartyId,
    },

    #[error("TB_ERR_205: Amend of {0} changes price; cancel and resubmit instead")]
    AmendPriceChanged(OrderId),

    #[error("TB_ERR_206: Amend of {id} raises volume {amended} above resting {resting}")]
    AmendSizeIncrease { id: OrderId, resting: u64, amended: u64 },

    #[error("TB_ERR_207: Amend of {0} changes creation sequence")]
    AmendSequenceChanged(OrderId),

    #[error("TB_ERR_208: Amend of {0} changes side or order identity")]
    AmendIdentityChanged(OrderId),

    // =================================================================
    // Trading-Mode Errors (3xx)
    // =================================================================
    #[error("TB_ERR_300: Book is not in auction")]
    NotInAuction,

    #[error("TB_ERR_301: Book is already in auction")]
    AlreadyInAuction,

    #[error("TB_ERR_302: GFA order {0} submitted outside an auction")]
    GfaOutsideAuction(OrderId),

    #[error("TB_ERR_303: GFN order {0} submitted during an auction")]
    GfnDuringAuction(OrderId),

    // =================================================================
    // Snapshot Errors (8xx)
    // =================================================================
    #[error("TB_ERR_800: Snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TB_ERR_801: Unsupported snapshot version {0}")]
    UnsupportedSnapshot(u32),

    // =================================================================
    // Defects (9xx)
    // =================================================================
    /// An invariant the book relies on does not hold. Never retried.
    #[error("TB_ERR_900: Invariant violated: {reason}")]
    Invariant { reason: String },
}

impl BookError {
    pub fn invariant(reason: impl Into<String>) -> Self {
        Self::Invariant {
            reason: reason.into(),
        }
    }

    /// Defects must stop processing on every replica.
    #[must_use]
    pub fn is_defect(&self) -> bool {
        matches!(self, Self::Invariant { .. })
    }

    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::EmptyOrderId
                | Self::EmptyMarketId(_)
                | Self::EmptyPartyId(_)
                | Self::InvalidRemaining { .. }
                | Self::MissingExpiry(_)
                | Self::GttNotAllowed(_)
                | Self::InvalidMarketTimeInForce(_)
                | Self::InvalidNetworkTimeInForce(_)
                | Self::OutOfSequence { .. }
                | Self::InvalidVolume
                | Self::ZeroPrice(_)
                | Self::InvalidIceberg(_)
                | Self::IcebergNotAllowed(_)
        )
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, BookError>;
