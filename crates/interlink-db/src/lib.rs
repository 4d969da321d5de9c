//! # interlink-db
//! Persistent safety databases of the interlink supervisor.
//!
//! - [`fromda`]: per-chain derivation link store (L2 block derived from L1 block)
//! - [`chains`]: multi-chain coordinator over log, local-safe and cross-safe stores
//! - [`config`]: data directory layout

pub mod chains;
pub mod config;
pub mod fromda;

pub use chains::ChainsDb;
pub use config::DbConfig;
pub use fromda::{DerivationDb, EntryStore, FileEntryStore, LinkEntry, MemEntryStore};
