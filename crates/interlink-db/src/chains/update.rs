//! Write path of the chains database. Successful updates are announced
//! through the attached emitter.

use tracing::{debug, info, warn};

use interlink_core::{
    BlockId, BlockRef, BlockSeal, ChainId, DbError, DerivedBlockRefPair, ExecutingMessage, Hash256,
    SuperEvent,
};

use super::ChainsDb;

impl ChainsDb {
    /// Record one log of the block building on `parent_block`.
    pub fn add_log(
        &self,
        chain: ChainId,
        log_hash: Hash256,
        parent_block: BlockId,
        log_idx: u32,
        exec_msg: Option<ExecutingMessage>,
    ) -> Result<(), DbError> {
        self.log_db(chain)?
            .add_log(log_hash, parent_block, log_idx, exec_msg)
            .map_err(|e| e.in_chain(chain))
    }

    /// Seal `block` in the log store, making it the new local-unsafe head.
    pub fn seal_block(&self, chain: ChainId, block: &BlockRef) -> Result<(), DbError> {
        self.log_db(chain)?
            .seal_block(block.parent_hash, block.id(), block.time)
            .map_err(|e| e.in_chain(chain))?;
        debug!(%chain, block = %block, "sealed block");
        self.emit(SuperEvent::LocalUnsafeUpdate {
            chain,
            new_local_unsafe: block.seal(),
        });
        Ok(())
    }

    /// Truncate the log store to `head`.
    pub fn rewind_log(&self, chain: ChainId, head: BlockId) -> Result<(), DbError> {
        self.log_db(chain)?.rewind(head).map_err(|e| e.in_chain(chain))?;
        info!(%chain, head = %head, "rewound log db");
        Ok(())
    }

    pub fn update_cross_unsafe(&self, chain: ChainId, cross_unsafe: BlockSeal) -> Result<(), DbError> {
        let tracker = self.cross_unsafe_tracker(chain)?;
        *tracker.write() = cross_unsafe;
        debug!(%chain, cross_unsafe = %cross_unsafe, "updated cross-unsafe");
        self.emit(SuperEvent::CrossUnsafeUpdate {
            chain,
            new_cross_unsafe: cross_unsafe,
        });
        Ok(())
    }

    /// Append a cross-safe link: `last_derived` is cross-safe as of L1 block `derived_from`.
    pub fn update_cross_safe(
        &self,
        chain: ChainId,
        derived_from: &BlockRef,
        last_derived: &BlockRef,
    ) -> Result<(), DbError> {
        self.cross_db(chain)?
            .add_derived(derived_from, last_derived)
            .map_err(|e| e.in_chain(chain))?;
        info!(%chain, derived_from = %derived_from, derived = %last_derived, "updated cross-safe");
        let pair = DerivedBlockRefPair {
            derived_from: *derived_from,
            derived: *last_derived,
        };
        self.emit(SuperEvent::CrossSafeUpdate {
            chain,
            new_cross_safe: pair.seals(),
        });
        Ok(())
    }

    /// Append a local-safe link.
    ///
    /// Failures are not returned: the chain is reported out of sync through
    /// [`SuperEvent::LocalSafeOutOfSync`] so the node can be reset.
    pub fn update_local_safe(&self, chain: ChainId, derived_from: &BlockRef, last_derived: &BlockRef) {
        let result = self
            .local_db(chain)
            .and_then(|db| db.add_derived(derived_from, last_derived));
        match result {
            Ok(()) => {
                info!(%chain, derived_from = %derived_from, derived = %last_derived, "updated local-safe");
                let pair = DerivedBlockRefPair {
                    derived_from: *derived_from,
                    derived: *last_derived,
                };
                self.emit(SuperEvent::LocalSafeUpdate {
                    chain,
                    new_local_safe: pair.seals(),
                });
            }
            Err(e) => {
                warn!(%chain, derived_from = %derived_from, derived = %last_derived, err = %e,
                    "failed to update local-safe");
                self.emit(SuperEvent::LocalSafeOutOfSync {
                    chain,
                    reason: e.to_string(),
                });
            }
        }
    }

    /// Rewind the local-safe store to the first link that derived L2 block `derived`.
    pub fn rewind_local_safe_to_l2(&self, chain: ChainId, derived: u64) -> Result<(), DbError> {
        self.local_db(chain)?
            .rewind_to_l2(derived)
            .map_err(|e| e.in_chain(chain))?;
        info!(%chain, derived, "rewound local-safe");
        Ok(())
    }

    /// Rewind the cross-safe store to the first link that derived L2 block `derived`.
    pub fn rewind_cross_safe_to_l2(&self, chain: ChainId, derived: u64) -> Result<(), DbError> {
        self.cross_db(chain)?
            .rewind_to_l2(derived)
            .map_err(|e| e.in_chain(chain))?;
        info!(%chain, derived, "rewound cross-safe");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::testutil::{MockLogStore, arc_emitter};
    use super::*;
    use crate::fromda::DerivationDb;
    use crate::fromda::testutil::{l1, l2};
    use interlink_core::ErrorKind;

    const A: ChainId = ChainId(10);

    fn chains_db() -> ChainsDb {
        let db = ChainsDb::new(Arc::new(vec![A]));
        db.add_log_db(A, Arc::new(MockLogStore::default()));
        db.add_local_derived_from_db(A, Arc::new(DerivationDb::in_memory()));
        db.add_cross_derived_from_db(A, Arc::new(DerivationDb::in_memory()));
        db.add_cross_unsafe_tracker(A);
        db
    }

    #[test]
    fn seal_block_emits_local_unsafe() {
        let db = chains_db();
        let em = arc_emitter();
        db.attach_emitter(em.clone());
        db.seal_block(A, &l2(0)).unwrap();
        let events = em.events.lock();
        assert_eq!(
            events[0],
            SuperEvent::LocalUnsafeUpdate { chain: A, new_local_unsafe: l2(0).seal() }
        );
    }

    #[test]
    fn add_log_and_rewind_reach_log_store() {
        let store = Arc::new(MockLogStore::default());
        let db = chains_db();
        db.add_log_db(A, store.clone());
        db.add_log(A, Hash256::ZERO, l2(0).id(), 0, None).unwrap();
        db.rewind_log(A, l2(0).id()).unwrap();
        assert_eq!(*store.rewinds.lock(), vec![l2(0).id()]);
    }

    #[test]
    fn updates_on_unknown_chain_fail() {
        let db = chains_db();
        let other = ChainId(11);
        assert_eq!(db.seal_block(other, &l2(0)).unwrap_err().kind(), ErrorKind::UnknownChain);
        assert_eq!(
            db.update_cross_unsafe(other, l2(0).seal()).unwrap_err().kind(),
            ErrorKind::UnknownChain
        );
        assert_eq!(
            db.update_cross_safe(other, &l1(0), &l2(0)).unwrap_err().kind(),
            ErrorKind::UnknownChain
        );
        assert_eq!(db.rewind_local_safe_to_l2(other, 0).unwrap_err().kind(), ErrorKind::UnknownChain);
    }

    #[test]
    fn local_safe_on_unknown_chain_reports_out_of_sync() {
        let db = chains_db();
        let em = arc_emitter();
        db.attach_emitter(em.clone());
        db.update_local_safe(ChainId(11), &l1(0), &l2(0));
        assert_eq!(em.names(), vec!["local-safe-out-of-sync"]);
    }

    #[test]
    fn cross_safe_rejects_gap() {
        let db = chains_db();
        db.update_cross_safe(A, &l1(0), &l2(0)).unwrap();
        let err = db.update_cross_safe(A, &l1(1), &l2(3)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfOrder);
        assert!(err.to_string().starts_with("chain 10: "));
    }

    #[test]
    fn cross_unsafe_emits() {
        let db = chains_db();
        let em = arc_emitter();
        db.attach_emitter(em.clone());
        db.update_cross_unsafe(A, l2(2).seal()).unwrap();
        assert_eq!(em.names(), vec!["cross-unsafe-update"]);
    }

    #[test]
    fn rewind_safe_tiers_to_l2() {
        let db = chains_db();
        for n in 0..4 {
            db.update_local_safe(A, &l1(n), &l2(n));
            db.update_cross_safe(A, &l1(n), &l2(n)).unwrap();
        }
        db.rewind_local_safe_to_l2(A, 1).unwrap();
        db.rewind_cross_safe_to_l2(A, 2).unwrap();
        assert_eq!(db.local_safe(A).unwrap().derived, l2(1).seal());
        assert_eq!(db.cross_safe(A).unwrap().derived, l2(2).seal());
        assert!(db.rewind_local_safe_to_l2(A, 5).unwrap_err().is_future());
    }
}
