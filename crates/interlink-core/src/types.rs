//! Core block identity types shared by the derivation store and the
//! chains database.
//!
//! A block is known at three levels of detail:
//! - [`BlockId`]: hash and number, the chain identity of a block
//! - [`BlockSeal`]: identity plus timestamp, what the ledgers persist
//! - [`BlockRef`]: seal plus parent hash, used for continuity checks

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A 32-byte hash value.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The zero hash (32 zero bytes). Used as "no hash" marker.
    pub const ZERO: Self = Self([0u8; 32]);

    /// Return the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Check if this is the zero hash.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for Hash256 {
    type Err = hex::FromHexError;

    /// Parse a 64-digit hex string, with or without `0x` prefix.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let mut out = [0u8; 32];
        hex::decode_to_slice(s, &mut out)?;
        Ok(Self(out))
    }
}

/// Identifier of an L2 chain tracked by the supervisor.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ChainId(pub u64);

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ChainId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Chain identity of a block: hash and number, without timestamp.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct BlockId {
    pub hash: Hash256,
    pub number: u64,
}

impl BlockId {
    pub fn new(hash: Hash256, number: u64) -> Self {
        Self { hash, number }
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hash, self.number)
    }
}

/// A sealed block: identity plus timestamp.
///
/// Independent of ancestry. The all-zero seal stands for "no block".
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct BlockSeal {
    pub hash: Hash256,
    pub number: u64,
    pub timestamp: u64,
}

impl BlockSeal {
    pub fn new(hash: Hash256, number: u64, timestamp: u64) -> Self {
        Self { hash, number, timestamp }
    }

    pub fn id(&self) -> BlockId {
        BlockId::new(self.hash, self.number)
    }

    /// Whether this is the zeroed placeholder seal.
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }

    /// Build a [`BlockRef`] for this seal with the given parent.
    ///
    /// Only the parent hash is taken from `parent`; the caller asserts it
    /// really is the parent block.
    pub fn force_with_parent(&self, parent: BlockId) -> BlockRef {
        BlockRef {
            hash: self.hash,
            number: self.number,
            parent_hash: parent.hash,
            time: self.timestamp,
        }
    }
}

impl From<BlockRef> for BlockSeal {
    fn from(r: BlockRef) -> Self {
        r.seal()
    }
}

impl fmt::Display for BlockSeal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockSeal(hash:{}, number:{}, time:{})", self.hash, self.number, self.timestamp)
    }
}

/// A block reference as reported by a chain indexer: seal plus parent hash.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct BlockRef {
    pub hash: Hash256,
    pub number: u64,
    pub parent_hash: Hash256,
    pub time: u64,
}

impl BlockRef {
    pub fn id(&self) -> BlockId {
        BlockId::new(self.hash, self.number)
    }

    pub fn seal(&self) -> BlockSeal {
        BlockSeal::new(self.hash, self.number, self.time)
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

impl fmt::Display for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BlockRef(hash:{}, number:{}, parent:{}, time:{})",
            self.hash, self.number, self.parent_hash, self.time
        )
    }
}

/// An L2 block sealed together with the L1 block it was derived from.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct DerivedBlockSealPair {
    pub derived_from: BlockSeal,
    pub derived: BlockSeal,
}

impl fmt::Display for DerivedBlockSealPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} derived from {}", self.derived, self.derived_from)
    }
}

/// Like [`DerivedBlockSealPair`], with full block references.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct DerivedBlockRefPair {
    pub derived_from: BlockRef,
    pub derived: BlockRef,
}

impl DerivedBlockRefPair {
    pub fn seals(&self) -> DerivedBlockSealPair {
        DerivedBlockSealPair {
            derived_from: self.derived_from.seal(),
            derived: self.derived.seal(),
        }
    }
}

impl fmt::Display for DerivedBlockRefPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} derived from {}", self.derived, self.derived_from)
    }
}

/// A cross-chain message executed by a log, as recorded by a log store.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ExecutingMessage {
    /// Chain the initiating message lives on.
    pub chain: ChainId,
    /// Block number of the initiating message.
    pub block_num: u64,
    /// Log index of the initiating message within its block.
    pub log_idx: u32,
    /// Timestamp of the initiating block.
    pub timestamp: u64,
    /// Hash of the initiating log.
    pub hash: Hash256,
}
