//! Derivation link store ("derived-from" database).
//!
//! An append-only, truncatable ledger of [`LinkEntry`] records for one chain.
//! Each record says which L2 block was derived while processing which L1
//! block. Both block numbers are non-decreasing in record order, which makes
//! every lookup a binary search over the record index.
//!
//! Consistency checks live in [`update`]; read-only queries live here.
//! Every public operation takes the store's [`RwLock`]: writers hold it for
//! the whole validate-then-append sequence.

pub mod entry;
pub mod store;
mod update;

use std::cmp::Ordering;
use std::path::Path;

use parking_lot::RwLock;
use tracing::debug;

use interlink_core::traits::{CrossDerivedFromStorage, LocalDerivedFromStorage};
use interlink_core::{
    BlockId, BlockRef, BlockSeal, DbError, DerivedBlockRefPair, DerivedBlockSealPair, Hash256,
};

pub use entry::{ENTRY_SIZE, LinkEntry};
pub use store::{EntryStore, FileEntryStore, MemEntryStore};

/// Derivation link database over an [`EntryStore`].
pub struct DerivationDb<S: EntryStore = FileEntryStore> {
    inner: RwLock<Inner<S>>,
}

/// Lock-free core of the database. Callers hold the outer lock.
struct Inner<S> {
    store: S,
}

impl DerivationDb<FileEntryStore> {
    /// Open or create a file-backed database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DbError> {
        let store = FileEntryStore::open(path)?;
        Ok(Self::new(store))
    }
}

impl DerivationDb<MemEntryStore> {
    /// Create an empty in-memory database.
    pub fn in_memory() -> Self {
        Self::new(MemEntryStore::new())
    }
}

impl<S: EntryStore> DerivationDb<S> {
    pub fn new(store: S) -> Self {
        Self { inner: RwLock::new(Inner { store }) }
    }

    /// Number of recorded links, including an invalidated placeholder.
    pub fn entry_count(&self) -> u64 {
        self.inner.read().store.size()
    }

    /// All links in record order.
    pub fn entries(&self) -> Result<Vec<LinkEntry>, DbError> {
        let inner = self.inner.read();
        (0..inner.store.size()).map(|i| inner.read_at(i)).collect()
    }

    /// The first recorded pair.
    pub fn first(&self) -> Result<DerivedBlockSealPair, DbError> {
        let inner = self.inner.read();
        if inner.store.size() == 0 {
            return Err(DbError::Future("no entries".into()));
        }
        inner.read_at(0)?.seal_or_err()
    }

    /// The last recorded pair.
    pub fn latest(&self) -> Result<DerivedBlockSealPair, DbError> {
        self.inner.read().latest()?.seal_or_err()
    }

    /// The last pair, only if it is an invalidated placeholder.
    pub fn invalidated(&self) -> Result<DerivedBlockSealPair, DbError> {
        let link = self.inner.read().latest()?;
        if !link.invalidated {
            return Err(DbError::Conflict(format!("last entry {link} is not invalidated")));
        }
        Ok(link.pair())
    }

    /// The last L2 block derived from the given L1 block.
    pub fn last_derived_at(&self, derived_from: BlockId) -> Result<BlockSeal, DbError> {
        let (_, link) = self.inner.read().last_derived_at(derived_from.number)?;
        if link.derived_from.id() != derived_from {
            return Err(DbError::Conflict(format!(
                "searched for last derived-from {derived_from} but found {}",
                link.derived_from
            )));
        }
        if link.invalidated {
            return Err(DbError::AwaitReplacementBlock(format!(
                "last block derived from {derived_from} is invalidated"
            )));
        }
        Ok(link.derived)
    }

    /// Ok if `derived` is recorded as derived (and not invalidated).
    pub fn is_derived(&self, derived: BlockId) -> Result<(), DbError> {
        let (_, link) = self.inner.read().first_derived_from(derived.number)?;
        if link.derived.id() != derived {
            return Err(DbError::Conflict(format!(
                "found {}, but expected {derived}",
                link.derived
            )));
        }
        if link.invalidated {
            return Err(DbError::AwaitReplacementBlock(format!("{derived} is invalidated")));
        }
        Ok(())
    }

    /// The first L1 block that `derived` was derived from.
    pub fn derived_from(&self, derived: BlockId) -> Result<BlockSeal, DbError> {
        let (_, link) = self.inner.read().first_derived_from(derived.number)?;
        if link.derived.id() != derived {
            return Err(DbError::Conflict(format!(
                "searched for first derived {derived} but found {}",
                link.derived
            )));
        }
        Ok(link.derived_from)
    }

    /// The pair recorded right after the exact `(derived_from, derived)` pair.
    pub fn first_after(
        &self,
        derived_from: BlockId,
        derived: BlockId,
    ) -> Result<DerivedBlockSealPair, DbError> {
        let inner = self.inner.read();
        let (idx, link) = inner.lookup(derived_from.number, derived.number)?;
        if link.derived_from.id() != derived_from {
            return Err(DbError::Conflict(format!(
                "found derived-from {}, but expected {derived_from}",
                link.derived_from
            )));
        }
        if link.derived.id() != derived {
            return Err(DbError::Conflict(format!(
                "found derived {}, but expected {derived}",
                link.derived
            )));
        }
        inner.read_after(idx)?.seal_or_err()
    }

    /// The L1 block after `derived_from`.
    pub fn next_derived_from(&self, derived_from: BlockId) -> Result<BlockSeal, DbError> {
        let inner = self.inner.read();
        let (idx, link) = inner.last_derived_at(derived_from.number)?;
        if link.derived_from.id() != derived_from {
            return Err(DbError::Conflict(format!(
                "searched for derived-from {derived_from} but found {}",
                link.derived_from
            )));
        }
        let next = inner.read_after(idx)?;
        if link.derived_from.number.checked_add(1) != Some(next.derived_from.number) {
            return Err(DbError::DataCorruption(format!(
                "expected the derived-from block right after {}, but found {}",
                link.derived_from, next.derived_from
            )));
        }
        Ok(next.derived_from)
    }

    /// The pair after the last occurrence of `derived`.
    pub fn next_derived(&self, derived: BlockId) -> Result<DerivedBlockSealPair, DbError> {
        let inner = self.inner.read();
        let (idx, link) = inner.last_derived_from(derived.number)?;
        if link.derived.id() != derived {
            return Err(DbError::Conflict(format!(
                "searched for derived {derived} but found {}",
                link.derived
            )));
        }
        inner.read_after(idx)?.seal_or_err()
    }

    /// The L1 block before `derived_from`. Zeroed for the first entry.
    pub fn previous_derived_from(&self, derived_from: BlockId) -> Result<BlockSeal, DbError> {
        self.inner.read().previous_derived_from(derived_from)
    }

    /// The L2 block before `derived`. Zeroed for the first entry.
    pub fn previous_derived(&self, derived: BlockId) -> Result<BlockSeal, DbError> {
        let inner = self.inner.read();
        let (idx, link) = inner.first_derived_from(derived.number)?;
        if link.derived.id() != derived {
            return Err(DbError::Conflict(format!(
                "found {}, but expected {derived}",
                link.derived
            )));
        }
        if idx == 0 {
            return Ok(BlockSeal::default());
        }
        Ok(inner.read_at(idx - 1)?.derived)
    }

    /// Flush and release the underlying store.
    pub fn close(&self) -> Result<(), DbError> {
        self.inner.write().store.close()
    }
}

impl<S: EntryStore> Inner<S> {
    fn read_at(&self, idx: u64) -> Result<LinkEntry, DbError> {
        LinkEntry::decode(&self.store.read(idx)?)
    }

    /// Read the record after `idx`; `Future` if there is none yet.
    fn read_after(&self, idx: u64) -> Result<LinkEntry, DbError> {
        let next = idx + 1;
        if next >= self.store.size() {
            return Err(DbError::Future(format!("no entry after index {idx} yet")));
        }
        self.read_at(next)
    }

    fn latest(&self) -> Result<LinkEntry, DbError> {
        let idx = self
            .store
            .last_entry_idx()
            .ok_or_else(|| DbError::Future("no entries".into()))?;
        self.read_at(idx)
    }

    /// Lowest index whose key compares `>= target`, i.e. `cmp(entry) != Less`.
    ///
    /// Requires `cmp` to be monotone over the record order.
    fn partition_point<F>(&self, cmp: &F) -> Result<u64, DbError>
    where
        F: Fn(&LinkEntry) -> Ordering,
    {
        let (mut lo, mut hi) = (0u64, self.store.size());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if cmp(&self.read_at(mid)?) == Ordering::Less {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo)
    }

    /// First entry whose key equals the target of `cmp`.
    fn find_first<F>(&self, what: &str, cmp: F) -> Result<(u64, LinkEntry), DbError>
    where
        F: Fn(&LinkEntry) -> Ordering,
    {
        let size = self.store.size();
        if size == 0 {
            return Err(DbError::Future(format!("no entries, looking for {what}")));
        }
        let idx = self.partition_point(&cmp)?;
        if idx == size {
            return Err(DbError::Future(format!("{what} is beyond the last entry")));
        }
        let link = self.read_at(idx)?;
        if cmp(&link) != Ordering::Equal {
            return Err(DbError::NotFound(format!("{what}: closest entry is {link}")));
        }
        Ok((idx, link))
    }

    /// Last entry whose key equals the target of `cmp`.
    fn find_last<F>(&self, what: &str, cmp: F) -> Result<(u64, LinkEntry), DbError>
    where
        F: Fn(&LinkEntry) -> Ordering,
    {
        let size = self.store.size();
        if size == 0 {
            return Err(DbError::Future(format!("no entries, looking for {what}")));
        }
        // First index strictly above the target, then step back one.
        let above = self.partition_point(&|e: &LinkEntry| match cmp(e) {
            Ordering::Equal => Ordering::Less,
            other => other,
        })?;
        if above == 0 {
            return Err(DbError::NotFound(format!("{what} is before the first entry")));
        }
        let link = self.read_at(above - 1)?;
        match cmp(&link) {
            Ordering::Equal => Ok((above - 1, link)),
            _ if above == size => Err(DbError::Future(format!("{what} is beyond the last entry"))),
            _ => Err(DbError::NotFound(format!("{what}: closest entry is {link}"))),
        }
    }

    /// The entry with exactly these two numbers.
    fn lookup(&self, derived_from: u64, derived: u64) -> Result<(u64, LinkEntry), DbError> {
        self.find_first(&format!("link {derived} derived from {derived_from}"), |e| {
            (e.derived_from.number, e.derived.number).cmp(&(derived_from, derived))
        })
    }

    /// First entry in which L2 block `derived` appears.
    fn first_derived_from(&self, derived: u64) -> Result<(u64, LinkEntry), DbError> {
        self.find_first(&format!("derived block {derived}"), |e| e.derived.number.cmp(&derived))
    }

    /// Last entry in which L2 block `derived` appears.
    fn last_derived_from(&self, derived: u64) -> Result<(u64, LinkEntry), DbError> {
        self.find_last(&format!("derived block {derived}"), |e| e.derived.number.cmp(&derived))
    }

    /// First entry derived from L1 block `derived_from`.
    fn first_derived_at(&self, derived_from: u64) -> Result<(u64, LinkEntry), DbError> {
        self.find_first(&format!("derived-from block {derived_from}"), |e| {
            e.derived_from.number.cmp(&derived_from)
        })
    }

    /// Last entry derived from L1 block `derived_from`.
    fn last_derived_at(&self, derived_from: u64) -> Result<(u64, LinkEntry), DbError> {
        self.find_last(&format!("derived-from block {derived_from}"), |e| {
            e.derived_from.number.cmp(&derived_from)
        })
    }

    fn previous_derived_from(&self, derived_from: BlockId) -> Result<BlockSeal, DbError> {
        let (idx, link) = self.first_derived_at(derived_from.number)?;
        if link.derived_from.id() != derived_from {
            return Err(DbError::Conflict(format!(
                "found {}, but expected {derived_from}",
                link.derived_from
            )));
        }
        if idx == 0 {
            return Ok(BlockSeal::default());
        }
        Ok(self.read_at(idx - 1)?.derived_from)
    }

    /// Discard all entries after `position`, and `position` itself if `inclusive`.
    fn truncate(&mut self, position: u64, inclusive: bool) -> Result<(), DbError> {
        let keep = if inclusive { position } else { position + 1 };
        self.store.truncate(keep)?;
        debug!(entries = keep, "truncated derivation links");
        Ok(())
    }
}

impl<S: EntryStore> LocalDerivedFromStorage for DerivationDb<S> {
    fn first(&self) -> Result<DerivedBlockSealPair, DbError> {
        DerivationDb::first(self)
    }

    fn latest(&self) -> Result<DerivedBlockSealPair, DbError> {
        DerivationDb::latest(self)
    }

    fn invalidated(&self) -> Result<DerivedBlockSealPair, DbError> {
        DerivationDb::invalidated(self)
    }

    fn add_derived(&self, derived_from: &BlockRef, derived: &BlockRef) -> Result<(), DbError> {
        DerivationDb::add_derived(self, derived_from, derived)
    }

    fn replace_invalidated_block(
        &self,
        replacement: &BlockRef,
        invalidated: Hash256,
    ) -> Result<DerivedBlockSealPair, DbError> {
        DerivationDb::replace_invalidated_block(self, replacement, invalidated)
    }

    fn rewind_and_invalidate(&self, invalidated: &DerivedBlockRefPair) -> Result<(), DbError> {
        DerivationDb::rewind_and_invalidate(self, invalidated)
    }

    fn last_derived_at(&self, derived_from: BlockId) -> Result<BlockSeal, DbError> {
        DerivationDb::last_derived_at(self, derived_from)
    }

    fn is_derived(&self, derived: BlockId) -> Result<(), DbError> {
        DerivationDb::is_derived(self, derived)
    }

    fn derived_from(&self, derived: BlockId) -> Result<BlockSeal, DbError> {
        DerivationDb::derived_from(self, derived)
    }

    fn first_after(
        &self,
        derived_from: BlockId,
        derived: BlockId,
    ) -> Result<DerivedBlockSealPair, DbError> {
        DerivationDb::first_after(self, derived_from, derived)
    }

    fn next_derived_from(&self, derived_from: BlockId) -> Result<BlockSeal, DbError> {
        DerivationDb::next_derived_from(self, derived_from)
    }

    fn next_derived(&self, derived: BlockId) -> Result<DerivedBlockSealPair, DbError> {
        DerivationDb::next_derived(self, derived)
    }

    fn previous_derived_from(&self, derived_from: BlockId) -> Result<BlockSeal, DbError> {
        DerivationDb::previous_derived_from(self, derived_from)
    }

    fn previous_derived(&self, derived: BlockId) -> Result<BlockSeal, DbError> {
        DerivationDb::previous_derived(self, derived)
    }

    fn rewind_to_l2(&self, derived: u64) -> Result<(), DbError> {
        DerivationDb::rewind_to_l2(self, derived)
    }
}

impl<S: EntryStore> CrossDerivedFromStorage for DerivationDb<S> {}

#[cfg(test)]
pub(crate) mod testutil {
    use interlink_core::{BlockRef, Hash256};

    /// Deterministic hash for block `number` on fork `fork` of chain `tag`.
    pub fn hash(tag: u8, number: u64, fork: u8) -> Hash256 {
        let mut out = [0u8; 32];
        out[0] = tag;
        out[1] = fork;
        out[24..].copy_from_slice(&number.to_be_bytes());
        Hash256(out)
    }

    /// Block ref on fork `fork` whose parent is on the same fork (fork 0 below the fork point).
    pub fn block(tag: u8, number: u64, fork: u8, parent_fork: u8) -> BlockRef {
        BlockRef {
            hash: hash(tag, number, fork),
            number,
            parent_hash: if number == 0 { Hash256::ZERO } else { hash(tag, number - 1, parent_fork) },
            time: 1_000 + number * 2,
        }
    }

    /// L1 block `number` on the canonical fork.
    pub fn l1(number: u64) -> BlockRef {
        block(1, number, 0, 0)
    }

    /// L2 block `number` on the canonical fork.
    pub fn l2(number: u64) -> BlockRef {
        block(2, number, 0, 0)
    }
}
