//! Domain events exchanged between the chains database and the rest of the
//! supervisor.
//!
//! The set is closed: listeners match on the variants they handle and
//! report whether they recognised the event, so a router can chain several
//! listeners over the same stream.

use serde::{Deserialize, Serialize};

use crate::types::{BlockRef, BlockSeal, ChainId, DerivedBlockRefPair, DerivedBlockSealPair, Hash256};

/// A replacement for an L2 block that was found invalid.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockReplacement {
    pub replacement: BlockRef,
    pub invalidated: Hash256,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum SuperEvent {
    // --- consumed by the chains database ---
    /// First known-good block pair from which a chain is tracked.
    Anchor { chain: ChainId, anchor: DerivedBlockRefPair },
    /// The node derived a new local-safe block.
    LocalDerived { chain: ChainId, derived: DerivedBlockRefPair },
    /// L1 finality advanced.
    FinalizedL1Request { finalized_l1: BlockRef },
    /// An invalidated block has a replacement.
    ReplaceBlock { chain: ChainId, replacement: BlockReplacement },

    // --- emitted by the chains database ---
    LocalUnsafeUpdate { chain: ChainId, new_local_unsafe: BlockSeal },
    CrossUnsafeUpdate { chain: ChainId, new_cross_unsafe: BlockSeal },
    LocalSafeUpdate { chain: ChainId, new_local_safe: DerivedBlockSealPair },
    CrossSafeUpdate { chain: ChainId, new_cross_safe: DerivedBlockSealPair },
    FinalizedL1Update { finalized_l1: BlockRef },
    /// A local-derived update could not be applied; the node must be reset.
    LocalSafeOutOfSync { chain: ChainId, reason: String },
}

impl SuperEvent {
    /// Short name of the variant, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            SuperEvent::Anchor { .. } => "anchor",
            SuperEvent::LocalDerived { .. } => "local-derived",
            SuperEvent::FinalizedL1Request { .. } => "finalized-l1-request",
            SuperEvent::ReplaceBlock { .. } => "replace-block",
            SuperEvent::LocalUnsafeUpdate { .. } => "local-unsafe-update",
            SuperEvent::CrossUnsafeUpdate { .. } => "cross-unsafe-update",
            SuperEvent::LocalSafeUpdate { .. } => "local-safe-update",
            SuperEvent::CrossSafeUpdate { .. } => "cross-safe-update",
            SuperEvent::FinalizedL1Update { .. } => "finalized-l1-update",
            SuperEvent::LocalSafeOutOfSync { .. } => "local-safe-out-of-sync",
        }
    }
}
