//! # Ledger Types
//!
//! Data model shared by the blockfile storage engine and everything that
//! hands it blocks or reads them back.
//!
//! - [`Block`] - a numbered, hash-chained batch of transaction envelopes
//! - [`Envelope`] - one opaque transaction with its identifier
//! - [`BlockchainInfo`] - height plus head and previous hashes

pub mod entities;

pub use entities::{short_hex, Block, BlockchainInfo, Envelope, Hash, TxId};
