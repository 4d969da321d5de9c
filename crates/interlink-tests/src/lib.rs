//! Property and concurrency test suite for interlink.
//!
//! Integration tests drive the derivation store and the chains database
//! through arbitrary append, rewind and invalidation sequences and check that
//! the ledger invariants hold afterwards.

pub mod helpers;
