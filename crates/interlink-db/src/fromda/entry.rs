//! Fixed-width binary encoding of derivation links.
//!
//! Every record is [`ENTRY_SIZE`] bytes, so record `i` lives at byte offset
//! `i * ENTRY_SIZE` and truncation is a plain file length change.
//!
//! Layout (big-endian integers):
//! `kind(1) || zero(3) || from.number(8) || from.time(8) || from.hash(32)
//!  || derived.number(8) || derived.time(8) || derived.hash(32)`

use std::fmt;

use interlink_core::{BlockSeal, DbError, DerivedBlockSealPair, Hash256};

/// Size of one encoded link in bytes.
pub const ENTRY_SIZE: usize = 100;

/// Record kind of a regular link.
const KIND_LINK: u8 = 0;
/// Record kind of an invalidated placeholder link.
const KIND_INVALIDATED: u8 = 1;

const SEAL_SIZE: usize = 8 + 8 + 32;
const FROM_OFFSET: usize = 4;
const DERIVED_OFFSET: usize = FROM_OFFSET + SEAL_SIZE;

/// One raw record as stored on disk.
pub type Entry = [u8; ENTRY_SIZE];

/// A single ledger record: `derived` was produced while processing L1 block
/// `derived_from`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct LinkEntry {
    pub derived_from: BlockSeal,
    pub derived: BlockSeal,
    /// Placeholder for a derived block proven invalid; never built upon.
    pub invalidated: bool,
}

impl LinkEntry {
    pub fn pair(&self) -> DerivedBlockSealPair {
        DerivedBlockSealPair { derived_from: self.derived_from, derived: self.derived }
    }

    /// The pair, unless this entry is an invalidated placeholder.
    pub fn seal_or_err(&self) -> Result<DerivedBlockSealPair, DbError> {
        if self.invalidated {
            return Err(DbError::AwaitReplacementBlock(format!(
                "entry {self} is invalidated and awaits a replacement"
            )));
        }
        Ok(self.pair())
    }

    pub fn encode(&self) -> Entry {
        let mut out = [0u8; ENTRY_SIZE];
        out[0] = if self.invalidated { KIND_INVALIDATED } else { KIND_LINK };
        write_seal(&mut out[FROM_OFFSET..DERIVED_OFFSET], &self.derived_from);
        write_seal(&mut out[DERIVED_OFFSET..], &self.derived);
        out
    }

    pub fn decode(raw: &Entry) -> Result<Self, DbError> {
        let invalidated = match raw[0] {
            KIND_LINK => false,
            KIND_INVALIDATED => true,
            other => {
                return Err(DbError::DataCorruption(format!("unknown entry kind {other}")));
            }
        };
        if raw[1..FROM_OFFSET] != [0u8; 3] {
            return Err(DbError::DataCorruption("non-zero entry padding".into()));
        }
        Ok(Self {
            derived_from: read_seal(&raw[FROM_OFFSET..DERIVED_OFFSET]),
            derived: read_seal(&raw[DERIVED_OFFSET..]),
            invalidated,
        })
    }
}

impl fmt::Display for LinkEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LinkEntry(derivedFrom: {}, derived: {}", self.derived_from, self.derived)?;
        if self.invalidated {
            write!(f, ", invalidated")?;
        }
        write!(f, ")")
    }
}

fn write_seal(buf: &mut [u8], seal: &BlockSeal) {
    buf[0..8].copy_from_slice(&seal.number.to_be_bytes());
    buf[8..16].copy_from_slice(&seal.timestamp.to_be_bytes());
    buf[16..SEAL_SIZE].copy_from_slice(seal.hash.as_bytes());
}

fn read_seal(buf: &[u8]) -> BlockSeal {
    let mut number = [0u8; 8];
    let mut timestamp = [0u8; 8];
    let mut hash = [0u8; 32];
    number.copy_from_slice(&buf[0..8]);
    timestamp.copy_from_slice(&buf[8..16]);
    hash.copy_from_slice(&buf[16..SEAL_SIZE]);
    BlockSeal {
        hash: Hash256(hash),
        number: u64::from_be_bytes(number),
        timestamp: u64::from_be_bytes(timestamp),
    }
}
