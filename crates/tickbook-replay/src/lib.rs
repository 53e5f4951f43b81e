//! # tickbook-replay
//!
//! **Single-writer apply loop for tickbook order books.**
//!
//! The transaction layer agrees on one ordered stream of [`Command`]s. The
//! [`Replayer`] applies them one at a time to per-market books, forwards the
//! resulting events to a [`Broker`] in a fixed order, and folds each book's
//! state hash into a chain hash that replicas can compare.
//!
//! A book defect halts the loop: no further command is applied, on any
//! replica, until an operator intervenes.

pub mod broker;
pub mod command;
pub mod error;
pub mod replayer;

pub use broker::{Broker, RecordingBroker};
pub use command::Command;
pub use error::{ReplayError, Result};
pub use replayer::{Applied, ReplaySnapshot, Replayer};
