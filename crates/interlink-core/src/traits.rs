//! Trait interfaces for the interlink databases.
//!
//! These traits define the contracts between the chains database and its
//! collaborators:
//! - [`LogStorage`]: per-chain event log and block seals (external engine)
//! - [`LocalDerivedFromStorage`]: local-safe derivation links (interlink-db implements)
//! - [`CrossDerivedFromStorage`]: cross-safe derivation links (interlink-db implements)
//! - [`DependencySet`]: which chains exist (external provider)
//! - [`Emitter`]: outgoing side of the event bus (external transport)

use std::collections::HashMap;

use crate::error::DbError;
use crate::events::SuperEvent;
use crate::types::{
    BlockId, BlockRef, BlockSeal, ChainId, DerivedBlockRefPair, DerivedBlockSealPair,
    ExecutingMessage, Hash256,
};

/// Per-chain store of logs and block seals.
///
/// Implementations do their own internal locking; all methods take `&self`.
pub trait LogStorage: Send + Sync {
    /// Record one log of the block being built on top of `parent_block`.
    fn add_log(
        &self,
        log_hash: Hash256,
        parent_block: BlockId,
        log_idx: u32,
        exec_msg: Option<ExecutingMessage>,
    ) -> Result<(), DbError>;

    /// Finalize the log set of `block`.
    fn seal_block(&self, parent_hash: Hash256, block: BlockId, timestamp: u64) -> Result<(), DbError>;

    /// Truncate everything after `new_head`.
    fn rewind(&self, new_head: BlockId) -> Result<(), DbError>;

    /// The last fully sealed block, or `None` if nothing was sealed yet.
    fn latest_sealed_block(&self) -> Option<BlockId>;

    /// Find a sealed block by number.
    ///
    /// # Errors
    ///
    /// - [`DbError::Future`] if the block is too new to tell
    fn find_sealed_block(&self, number: u64) -> Result<BlockSeal, DbError>;

    /// Check that `log_hash` is recorded at `block_num`/`log_idx`.
    ///
    /// Returns the seal of the including block; the seal may be zeroed if the
    /// block is not fully known yet.
    ///
    /// # Errors
    ///
    /// - [`DbError::Future`] if the log is out of reach
    /// - [`DbError::Conflict`] if the log contradicts the canonical chain
    fn contains(&self, block_num: u64, log_idx: u32, log_hash: Hash256) -> Result<BlockSeal, DbError>;

    /// Accumulate the executing messages of a block.
    ///
    /// Returns the block ref, the number of logs and the executing messages by log index.
    fn open_block(
        &self,
        block_num: u64,
    ) -> Result<(BlockRef, u32, HashMap<u32, ExecutingMessage>), DbError>;

    /// Release underlying resources.
    fn close(&self) -> Result<(), DbError>;
}

/// Store of L2-derived-from-L1 links for the local-safe tier.
pub trait LocalDerivedFromStorage: Send + Sync {
    /// The first recorded pair.
    fn first(&self) -> Result<DerivedBlockSealPair, DbError>;

    /// The last recorded pair.
    ///
    /// # Errors
    ///
    /// - [`DbError::Future`] if nothing is recorded
    /// - [`DbError::AwaitReplacementBlock`] if the last entry is invalidated
    fn latest(&self) -> Result<DerivedBlockSealPair, DbError>;

    /// The last pair, if it is an invalidated placeholder.
    fn invalidated(&self) -> Result<DerivedBlockSealPair, DbError>;

    /// Append a derivation link with full consistency checks.
    fn add_derived(&self, derived_from: &BlockRef, derived: &BlockRef) -> Result<(), DbError>;

    /// Replace the invalidated last entry with `replacement`.
    fn replace_invalidated_block(
        &self,
        replacement: &BlockRef,
        invalidated: Hash256,
    ) -> Result<DerivedBlockSealPair, DbError>;

    /// Rewind to just before `invalidated` and freeze the store with an invalidated placeholder.
    fn rewind_and_invalidate(&self, invalidated: &DerivedBlockRefPair) -> Result<(), DbError>;

    /// Last L2 block derived from the given L1 block.
    fn last_derived_at(&self, derived_from: BlockId) -> Result<BlockSeal, DbError>;

    /// Ok if the L2 block is recorded as derived.
    fn is_derived(&self, derived: BlockId) -> Result<(), DbError>;

    /// First L1 block the L2 block was derived from.
    fn derived_from(&self, derived: BlockId) -> Result<BlockSeal, DbError>;

    /// The pair recorded right after the given pair.
    fn first_after(
        &self,
        derived_from: BlockId,
        derived: BlockId,
    ) -> Result<DerivedBlockSealPair, DbError>;

    /// The L1 block following `derived_from`.
    fn next_derived_from(&self, derived_from: BlockId) -> Result<BlockSeal, DbError>;

    /// The pair following the last occurrence of `derived`.
    fn next_derived(&self, derived: BlockId) -> Result<DerivedBlockSealPair, DbError>;

    /// The L1 block preceding `derived_from`; zeroed for the first entry.
    fn previous_derived_from(&self, derived_from: BlockId) -> Result<BlockSeal, DbError>;

    /// The L2 block preceding `derived`; zeroed for the first entry.
    fn previous_derived(&self, derived: BlockId) -> Result<BlockSeal, DbError>;

    /// Rewind to the first entry that derived the given L2 block number.
    fn rewind_to_l2(&self, derived: u64) -> Result<(), DbError>;
}

/// Store of derivation links for the cross-safe tier.
///
/// Same surface as [`LocalDerivedFromStorage`] today; kept distinct so the
/// two can diverge once cross-chain reorgs are handled.
pub trait CrossDerivedFromStorage: LocalDerivedFromStorage {}

/// Which chains are part of the interop dependency set.
pub trait DependencySet: Send + Sync {
    /// All chains in the set.
    fn chains(&self) -> Vec<ChainId>;

    /// Whether `chain` is part of the set.
    ///
    /// Default implementation scans [`chains`](Self::chains).
    fn has_chain(&self, chain: ChainId) -> bool {
        self.chains().contains(&chain)
    }
}

/// A fixed list of chains.
impl DependencySet for Vec<ChainId> {
    fn chains(&self) -> Vec<ChainId> {
        self.clone()
    }
}

/// Outgoing side of the event bus.
pub trait Emitter: Send + Sync {
    fn emit(&self, event: SuperEvent);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder(Mutex<Vec<SuperEvent>>);

    impl Emitter for Recorder {
        fn emit(&self, event: SuperEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    #[test]
    fn vec_dependency_set_has_chain() {
        let set = vec![ChainId(10), ChainId(8453)];
        assert!(set.has_chain(ChainId(10)));
        assert!(!set.has_chain(ChainId(1)));
        assert_eq!(set.chains().len(), 2);
    }

    #[test]
    fn emitter_is_object_safe() {
        let rec = Recorder(Mutex::new(Vec::new()));
        let em: &dyn Emitter = &rec;
        em.emit(SuperEvent::FinalizedL1Update { finalized_l1: BlockRef::default() });
        let events = rec.0.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name(), "finalized-l1-update");
    }
}
