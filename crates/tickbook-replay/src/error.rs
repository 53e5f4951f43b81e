//! Errors surfaced by the apply loop.

use thiserror::Error;
use tickbook_types::{BookError, MarketId};

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("TB_ERR_400: Unknown market: {0}")]
    UnknownMarket(MarketId),

    #[error("TB_ERR_401: Market already open: {0}")]
    MarketExists(MarketId),

    /// The book refused the command. Every replica refuses it identically,
    /// so the loop records it and moves on.
    #[error("TB_ERR_402: Command {sequence} rejected: {source}")]
    Rejected {
        sequence: u64,
        #[source]
        source: BookError,
    },

    #[error("TB_ERR_403: Snapshot could not be restored: {0}")]
    Snapshot(String),

    /// A book invariant broke. Nothing more is applied.
    #[error("TB_ERR_901: Replay halted at command {sequence}: {reason}")]
    Halted { sequence: u64, reason: String },
}

impl ReplayError {
    #[must_use]
    pub fn is_halt(&self) -> bool {
        matches!(self, Self::Halted { .. })
    }
}

pub type Result<T> = std::result::Result<T, ReplayError>;
