//! The single-writer apply loop.
//!
//! [`Replayer`] owns one [`OrderBook`] per market and is the only thing that
//! mutates them. Each command is applied to completion, its events are
//! forwarded to the [`Broker`], and the touched book's state hash is folded
//! into a running chain hash. Two replicas that applied the same commands
//! hold the same chain hash; the first command after which they differ is
//! the first divergence.
//!
//! A command the book rejects (validation, integrity, wrong mode) is still
//! sequenced and hashed, since every replica rejects it the same way. A
//! defect stops the loop for good.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tickbook_matching::OrderBook;
use tickbook_types::{BookConfig, BookError, BookEvent, MarketId, MatchingBook, constants};
use tracing::{debug, error, info, warn};

use crate::broker::Broker;
use crate::command::Command;
use crate::error::{ReplayError, Result};

/// Record of one applied command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    pub sequence: u64,
    pub market_id: MarketId,
    /// Hash of the touched book after the command.
    pub state_hash: [u8; 32],
    pub chain_hash: [u8; 32],
    pub events: usize,
}

/// Serializable state of every book plus the replay position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplaySnapshot {
    pub sequence: u64,
    /// Hex-encoded chain hash at `sequence`.
    pub chain_hash: String,
    /// One snapshot per market, ordered by market ID.
    pub books: Vec<MatchingBook>,
}

impl ReplaySnapshot {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| ReplayError::Snapshot(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| ReplayError::Snapshot(e.to_string()))
    }
}

pub struct Replayer<B: Broker> {
    config: BookConfig,
    books: BTreeMap<MarketId, OrderBook>,
    broker: B,
    /// Commands sequenced so far.
    sequence: u64,
    chain_hash: [u8; 32],
    /// Sequence and reason of the defect that stopped the loop.
    halted: Option<(u64, String)>,
}

impl<B: Broker> Replayer<B> {
    #[must_use]
    pub fn new(config: BookConfig, broker: B) -> Self {
        Self {
            config,
            books: BTreeMap::new(),
            broker,
            sequence: 0,
            chain_hash: [0u8; 32],
            halted: None,
        }
    }

    /// Resume from a snapshot. Books are rebuilt with `config`.
    pub fn restore(config: BookConfig, snapshot: ReplaySnapshot, broker: B) -> Result<Self> {
        let chain = hex::decode(&snapshot.chain_hash)
            .map_err(|e| ReplayError::Snapshot(format!("chain hash: {e}")))?;
        let chain_hash: [u8; 32] = chain
            .try_into()
            .map_err(|_| ReplayError::Snapshot("chain hash is not 32 bytes".into()))?;

        let mut books = BTreeMap::new();
        for book in snapshot.books {
            let market_id = book.market_id.clone();
            let restored = OrderBook::from_snapshot(config.clone(), book)
                .map_err(|e| ReplayError::Snapshot(e.to_string()))?;
            if books.insert(market_id.clone(), restored).is_some() {
                return Err(ReplayError::Snapshot(format!("market {market_id} listed twice")));
            }
        }

        info!(
            sequence = snapshot.sequence,
            markets = books.len(),
            chain = %snapshot.chain_hash,
            "replayer restored"
        );
        Ok(Self {
            config,
            books,
            broker,
            sequence: snapshot.sequence,
            chain_hash,
            halted: None,
        })
    }

    /// Apply one command.
    ///
    /// Returns [`ReplayError::Rejected`] if the book refused it (the command
    /// still counts), and [`ReplayError::Halted`] on a defect or once halted.
    pub fn apply(&mut self, command: Command) -> Result<Applied> {
        if let Some((sequence, reason)) = &self.halted {
            return Err(ReplayError::Halted {
                sequence: *sequence,
                reason: reason.clone(),
            });
        }

        let sequence = self.sequence + 1;
        let market_id = command.market_id().clone();
        let name = command.name();

        let outcome = match self.execute(command) {
            Err(ReplayError::Halted { reason, .. }) => {
                error!(sequence, market = %market_id, command = name, %reason, "replay halted");
                self.halted = Some((sequence, reason.clone()));
                return Err(ReplayError::Halted { sequence, reason });
            }
            other => other,
        };

        self.sequence = sequence;
        let state_hash = self
            .books
            .get(&market_id)
            .map_or([0u8; 32], OrderBook::state_hash);
        self.chain_hash = chain(&self.chain_hash, sequence, &market_id, &state_hash);

        match outcome {
            Ok(events) => {
                let count = events.len();
                self.broker.send_batch(events);
                debug!(
                    sequence,
                    market = %market_id,
                    command = name,
                    events = count,
                    state = %hex::encode(state_hash),
                    "command applied"
                );
                Ok(Applied {
                    sequence,
                    market_id,
                    state_hash,
                    chain_hash: self.chain_hash,
                    events: count,
                })
            }
            Err(ReplayError::Rejected { source, .. }) => {
                warn!(sequence, market = %market_id, command = name, error = %source, "command rejected");
                Err(ReplayError::Rejected { sequence, source })
            }
            Err(e) => {
                warn!(sequence, market = %market_id, command = name, error = %e, "command rejected");
                Err(e)
            }
        }
    }

    /// Apply commands in order, skipping rejected ones. Stops at a halt.
    /// Returns the number of rejected commands.
    pub fn run<I>(&mut self, commands: I) -> Result<usize>
    where
        I: IntoIterator<Item = Command>,
    {
        let mut rejected = 0;
        for command in commands {
            match self.apply(command) {
                Ok(_) => {}
                Err(e) if e.is_halt() => return Err(e),
                Err(_) => rejected += 1,
            }
        }
        Ok(rejected)
    }

    fn execute(&mut self, command: Command) -> Result<Vec<BookEvent>> {
        if let Command::OpenMarket { market_id } = command {
            if self.books.contains_key(&market_id) {
                return Err(ReplayError::MarketExists(market_id));
            }
            info!(market = %market_id, "market opened");
            let book = OrderBook::new(market_id.clone(), self.config.clone());
            self.books.insert(market_id, book);
            return Ok(Vec::new());
        }

        let market_id = command.market_id().clone();
        let book = self
            .books
            .get_mut(&market_id)
            .ok_or(ReplayError::UnknownMarket(market_id))?;
        apply_to_book(book, command).map_err(|source| {
            if source.is_defect() {
                ReplayError::Halted {
                    sequence: 0,
                    reason: source.to_string(),
                }
            } else {
                ReplayError::Rejected {
                    sequence: 0,
                    source,
                }
            }
        })
    }

    #[must_use]
    pub fn snapshot(&self) -> ReplaySnapshot {
        ReplaySnapshot {
            sequence: self.sequence,
            chain_hash: hex::encode(self.chain_hash),
            books: self.books.values().map(OrderBook::snapshot).collect(),
        }
    }

    #[must_use]
    pub fn book(&self, market_id: &MarketId) -> Option<&OrderBook> {
        self.books.get(market_id)
    }

    pub fn markets(&self) -> impl Iterator<Item = &MarketId> {
        self.books.keys()
    }

    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    #[must_use]
    pub fn chain_hash(&self) -> [u8; 32] {
        self.chain_hash
    }

    #[must_use]
    pub fn chain_hash_hex(&self) -> String {
        hex::encode(self.chain_hash)
    }

    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    #[must_use]
    pub fn broker(&self) -> &B {
        &self.broker
    }

    pub fn broker_mut(&mut self) -> &mut B {
        &mut self.broker
    }

    pub fn into_broker(self) -> B {
        self.broker
    }
}

/// Run one command against its book and collect events in broker order:
/// removed orders first, then per confirmation the passive updates, the
/// aggressor update and its trades.
fn apply_to_book(
    book: &mut OrderBook,
    command: Command,
) -> std::result::Result<Vec<BookEvent>, BookError> {
    let events = match command {
        Command::OpenMarket { .. } => Vec::new(),
        Command::Submit { order } => BookEvent::from_confirmation(&book.submit_order(order)?),
        Command::Cancel { order } => vec![BookEvent::from_cancellation(&book.cancel_order(&order)?)],
        Command::Amend { original, amended } => {
            vec![BookEvent::OrderUpdated(book.amend_order(&original, amended)?)]
        }
        Command::RemoveExpired { now, .. } => {
            BookEvent::from_removed(&book.remove_expired_orders(now)?)
        }
        Command::EnterAuction { .. } => BookEvent::from_removed(&book.enter_auction()?),
        Command::LeaveAuction { now, .. } => {
            let (confirmations, removed) = book.leave_auction(now)?;
            let mut events = BookEvent::from_removed(&removed);
            events.extend(confirmations.iter().flat_map(BookEvent::from_confirmation));
            events
        }
        Command::RemoveDistressed { parties, .. } => {
            BookEvent::from_removed(&book.remove_distressed_orders(&parties)?)
        }
        Command::CancelAll { party, .. } => book
            .cancel_all_orders(&party)?
            .iter()
            .map(BookEvent::from_cancellation)
            .collect(),
    };
    Ok(events)
}

fn chain(
    previous: &[u8; 32],
    sequence: u64,
    market_id: &MarketId,
    state_hash: &[u8; 32],
) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(constants::REPLAY_HASH_DOMAIN);
    hasher.update(previous);
    hasher.update(sequence.to_be_bytes());
    hasher.update((market_id.as_str().len() as u64).to_be_bytes());
    hasher.update(market_id.as_str().as_bytes());
    hasher.update(state_hash);
    hasher.finalize().into()
}
