//! Read-only views over the per-chain stores.

use std::collections::HashMap;

use interlink_core::{
    BlockId, BlockRef, BlockSeal, ChainId, DbError, DerivedBlockSealPair, ExecutingMessage, Hash256,
};

use super::ChainsDb;

impl ChainsDb {
    /// The last sealed block of the log store.
    ///
    /// # Errors
    ///
    /// - [`DbError::Future`] if nothing has been sealed yet
    pub fn local_unsafe(&self, chain: ChainId) -> Result<BlockSeal, DbError> {
        let log_db = self.log_db(chain)?;
        let head = log_db
            .latest_sealed_block()
            .ok_or_else(|| DbError::Future("no local-unsafe block sealed yet".into()).in_chain(chain))?;
        log_db.find_sealed_block(head.number).map_err(|e| e.in_chain(chain))
    }

    /// Cross-unsafe head. Until cross-unsafe progress is recorded this is the
    /// cross-safe derived block, which is always at least as safe.
    pub fn cross_unsafe(&self, chain: ChainId) -> Result<BlockSeal, DbError> {
        let current = *self.cross_unsafe_tracker(chain)?.read();
        if current.is_zero() {
            return Ok(self.cross_safe(chain)?.derived);
        }
        Ok(current)
    }

    pub fn local_safe(&self, chain: ChainId) -> Result<DerivedBlockSealPair, DbError> {
        self.local_db(chain)?.latest().map_err(|e| e.in_chain(chain))
    }

    pub fn cross_safe(&self, chain: ChainId) -> Result<DerivedBlockSealPair, DbError> {
        self.cross_db(chain)?.latest().map_err(|e| e.in_chain(chain))
    }

    /// The finalized L1 block; zeroed until the first notification.
    pub fn finalized_l1(&self) -> BlockRef {
        *self.finalized_l1.read()
    }

    /// The last L2 block cross-safe derived from the finalized L1 block.
    ///
    /// # Errors
    ///
    /// - [`DbError::Future`] if no finalized L1 block is known yet
    pub fn finalized(&self, chain: ChainId) -> Result<BlockSeal, DbError> {
        let finalized_l1 = self.finalized_l1();
        if finalized_l1.is_zero() {
            return Err(DbError::Future("no finalized L1 signal, cannot determine L2 finality yet".into())
                .in_chain(chain));
        }
        self.cross_db(chain)?
            .last_derived_at(finalized_l1.id())
            .map_err(|e| e.in_chain(chain))
    }

    /// The first L1 block `derived` was local-safe derived from.
    pub fn local_derived_from(&self, chain: ChainId, derived: BlockId) -> Result<BlockSeal, DbError> {
        self.local_db(chain)?.derived_from(derived).map_err(|e| e.in_chain(chain))
    }

    /// The first L1 block `derived` was cross-safe derived from.
    pub fn cross_derived_from(&self, chain: ChainId, derived: BlockId) -> Result<BlockSeal, DbError> {
        self.cross_db(chain)?.derived_from(derived).map_err(|e| e.in_chain(chain))
    }

    pub fn find_sealed_block(&self, chain: ChainId, number: u64) -> Result<BlockSeal, DbError> {
        self.log_db(chain)?.find_sealed_block(number).map_err(|e| e.in_chain(chain))
    }

    /// Check that a log is recorded; returns the seal of the including block.
    pub fn contains(
        &self,
        chain: ChainId,
        block_num: u64,
        log_idx: u32,
        log_hash: Hash256,
    ) -> Result<BlockSeal, DbError> {
        self.log_db(chain)?
            .contains(block_num, log_idx, log_hash)
            .map_err(|e| e.in_chain(chain))
    }

    pub fn open_block(
        &self,
        chain: ChainId,
        block_num: u64,
    ) -> Result<(BlockRef, u32, HashMap<u32, ExecutingMessage>), DbError> {
        self.log_db(chain)?.open_block(block_num).map_err(|e| e.in_chain(chain))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::testutil::MockLogStore;
    use super::*;
    use crate::fromda::DerivationDb;
    use crate::fromda::testutil::{l1, l2};
    use interlink_core::{ErrorKind, SuperEvent};

    const A: ChainId = ChainId(10);

    fn chains_db() -> ChainsDb {
        let db = ChainsDb::new(Arc::new(vec![A]));
        db.add_local_derived_from_db(A, Arc::new(DerivationDb::in_memory()));
        db.add_cross_derived_from_db(A, Arc::new(DerivationDb::in_memory()));
        db.add_cross_unsafe_tracker(A);
        db
    }

    #[test]
    fn unknown_chain_is_reported() {
        let db = ChainsDb::new(Arc::new(vec![A]));
        for err in [
            db.local_unsafe(A).unwrap_err(),
            db.local_safe(A).unwrap_err(),
            db.cross_safe(A).unwrap_err(),
            db.cross_unsafe(A).unwrap_err(),
            db.find_sealed_block(A, 0).unwrap_err(),
        ] {
            assert_eq!(err.kind(), ErrorKind::UnknownChain);
        }
        assert!(matches!(db.local_safe(A).unwrap_err(), DbError::UnknownChain(c) if c == A));
    }

    #[test]
    fn local_unsafe_reads_last_seal() {
        let db = chains_db();
        db.add_log_db(A, Arc::new(MockLogStore::default()));
        assert!(db.local_unsafe(A).unwrap_err().is_future());
        db.seal_block(A, &l2(0)).unwrap();
        db.seal_block(A, &l2(1)).unwrap();
        assert_eq!(db.local_unsafe(A).unwrap(), l2(1).seal());
        assert_eq!(db.find_sealed_block(A, 0).unwrap(), l2(0).seal());
        assert_eq!(db.contains(A, 1, 0, Hash256::ZERO).unwrap(), l2(1).seal());
        assert_eq!(db.open_block(A, 1).unwrap().0, l2(1));
    }

    #[test]
    fn cross_unsafe_falls_back_to_cross_safe() {
        let db = chains_db();
        db.update_cross_safe(A, &l1(0), &l2(0)).unwrap();
        assert_eq!(db.cross_unsafe(A).unwrap(), l2(0).seal());

        db.update_cross_unsafe(A, l2(4).seal()).unwrap();
        assert_eq!(db.cross_unsafe(A).unwrap(), l2(4).seal());
    }

    #[test]
    fn finalized_requires_finalized_l1() {
        let db = chains_db();
        for n in 0..4 {
            db.update_cross_safe(A, &l1(n), &l2(n)).unwrap();
        }
        assert!(db.finalized_l1().is_zero());
        assert!(db.finalized(A).unwrap_err().is_future());

        db.on_event(&SuperEvent::FinalizedL1Request { finalized_l1: l1(2) });
        assert_eq!(db.finalized_l1(), l1(2));
        assert_eq!(db.finalized(A).unwrap(), l2(2).seal());
    }

    #[test]
    fn derived_from_per_tier() {
        let db = chains_db();
        db.update_local_safe(A, &l1(0), &l2(0));
        db.update_local_safe(A, &l1(1), &l2(1));
        db.update_cross_safe(A, &l1(0), &l2(0)).unwrap();

        assert_eq!(db.local_derived_from(A, l2(1).id()).unwrap(), l1(1).seal());
        assert_eq!(db.cross_derived_from(A, l2(0).id()).unwrap(), l1(0).seal());
        assert!(db.cross_derived_from(A, l2(1).id()).unwrap_err().is_future());
    }
}
