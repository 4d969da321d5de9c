//! Write path of the derivation link store: append with consistency checks,
//! rewinds, and the invalidate-then-replace protocol.

use tracing::{debug, warn};

use interlink_core::{BlockRef, BlockSeal, DbError, DerivedBlockRefPair, DerivedBlockSealPair, Hash256};

use super::entry::LinkEntry;
use super::store::EntryStore;
use super::{DerivationDb, Inner};

/// Which number space a transition check is about; only used in messages.
#[derive(Clone, Copy)]
enum Space {
    Derived,
    DerivedFrom,
}

impl Space {
    fn name(self) -> &'static str {
        match self {
            Space::Derived => "derived",
            Space::DerivedFrom => "derived-from",
        }
    }
}

impl<S: EntryStore> DerivationDb<S> {
    /// Append a derivation link: `derived` was derived while processing `derived_from`.
    ///
    /// # Errors
    ///
    /// - [`DbError::Conflict`] on a hash or parent mismatch, or when the last entry is invalidated
    /// - [`DbError::OutOfOrder`] on a gap or regression in either number space
    pub fn add_derived(&self, derived_from: &BlockRef, derived: &BlockRef) -> Result<(), DbError> {
        self.inner.write().add_link(derived_from, derived, Hash256::ZERO)
    }

    /// Roll back to `target`, dropping `target` itself too if `including` is set.
    pub fn rewind(&self, target: &DerivedBlockSealPair, including: bool) -> Result<(), DbError> {
        self.inner.write().rewind(target, including)
    }

    /// Rewind to the first entry where L2 block `derived` was derived, keeping it.
    pub fn rewind_to_l2(&self, derived: u64) -> Result<(), DbError> {
        let mut inner = self.inner.write();
        let (_, link) = inner.first_derived_from(derived)?;
        inner.rewind(&link.pair(), false)
    }

    /// Rewind to the last entry derived from L1 block `derived_from`, keeping it.
    pub fn rewind_to_l1(&self, derived_from: u64) -> Result<(), DbError> {
        let mut inner = self.inner.write();
        let (_, link) = inner.last_derived_at(derived_from)?;
        inner.rewind(&link.pair(), false)
    }

    /// Roll back to just before `invalidated` and append an invalidated
    /// placeholder for it. No other entry can be appended until the
    /// placeholder is rewound or replaced.
    ///
    /// The placeholder is checked against the entry before `invalidated`
    /// first; on error the ledger is left untouched.
    pub fn rewind_and_invalidate(&self, invalidated: &DerivedBlockRefPair) -> Result<(), DbError> {
        let mut inner = self.inner.write();
        let idx = inner.locate(&invalidated.seals())?;
        let prev = match idx.checked_sub(1) {
            Some(prev_idx) => Some(inner.read_at(prev_idx)?),
            None => None,
        };
        let link = check_link(
            prev.as_ref(),
            &invalidated.derived_from,
            &invalidated.derived,
            invalidated.derived.hash,
        )
        .and_then(|link| {
            link.ok_or_else(|| DbError::Conflict("placeholder repeats the previous entry".into()))
        })
        .map_err(|e| match e {
            DbError::Conflict(msg) => {
                DbError::Conflict(format!("failed to add invalidation entry {invalidated}: {msg}"))
            }
            other => other,
        })?;
        inner.truncate(idx, true)?;
        inner.append(&link)
    }

    /// Replace the invalidated last entry with `replacement`, derived from the
    /// same L1 block.
    ///
    /// The replacement is checked against the entry before the placeholder;
    /// on error the placeholder stays and the ledger remains frozen.
    ///
    /// # Errors
    ///
    /// - [`DbError::Future`] if the store is empty
    /// - [`DbError::Conflict`] if the last entry is not an invalidated placeholder for `invalidated`,
    ///   or if `replacement` does not fit after the entry before it
    pub fn replace_invalidated_block(
        &self,
        replacement: &BlockRef,
        invalidated: Hash256,
    ) -> Result<DerivedBlockSealPair, DbError> {
        let mut inner = self.inner.write();
        warn!(replacement = %replacement, invalidated = %invalidated, "replacing invalidated block");

        // The last entry is where the block started to be considered invalid.
        let last_idx = inner
            .store
            .last_entry_idx()
            .ok_or_else(|| DbError::Future("no entries to replace".into()))?;
        let last = inner.read_at(last_idx)?;
        if !last.invalidated {
            return Err(DbError::Conflict(format!(
                "cannot replace block {}, that was not invalidated, with block {replacement}",
                last.derived
            )));
        }
        if last.derived.hash != invalidated {
            return Err(DbError::Conflict(format!(
                "cannot replace invalidated {invalidated}, db contains {}",
                last.derived
            )));
        }
        if replacement.hash == invalidated {
            return Err(DbError::Conflict(format!(
                "replacement {replacement} is the invalidated block itself"
            )));
        }
        // The first entry is never invalidated, so there always is a predecessor.
        let prev_idx = last_idx.checked_sub(1).ok_or_else(|| {
            DbError::DataCorruption(format!("invalidated entry {last} has no predecessor"))
        })?;
        let prev = inner.read_at(prev_idx)?;
        let prev_derived_from = inner.previous_derived_from(last.derived_from.id())?;

        let pair = DerivedBlockRefPair {
            derived_from: last.derived_from.force_with_parent(prev_derived_from.id()),
            derived: *replacement,
        };
        let link = check_link(Some(&prev), &pair.derived_from, &pair.derived, invalidated)
            .and_then(|link| {
                link.ok_or_else(|| DbError::Conflict("replacement repeats the previous entry".into()))
            })
            .map_err(|e| match e {
                DbError::Conflict(msg) => DbError::Conflict(format!(
                    "failed to add {} as replacement at {}: {msg}",
                    pair.derived, pair.derived_from
                )),
                other => other,
            })?;
        inner.truncate(last_idx, true)?;
        inner.append(&link)?;
        Ok(pair.seals())
    }
}

impl<S: EntryStore> Inner<S> {
    /// Index of the entry matching `target`; `Conflict` if its hashes differ.
    fn locate(&self, target: &DerivedBlockSealPair) -> Result<u64, DbError> {
        let (idx, link) = self.lookup(target.derived_from.number, target.derived.number)?;
        if link.derived_from.hash != target.derived_from.hash {
            return Err(DbError::Conflict(format!(
                "found derived-from {}, but expected {}",
                link.derived_from, target.derived_from
            )));
        }
        if link.derived.hash != target.derived.hash {
            return Err(DbError::Conflict(format!(
                "found derived {}, but expected {}",
                link.derived, target.derived
            )));
        }
        Ok(idx)
    }

    /// Truncate to the entry matching `target`.
    fn rewind(&mut self, target: &DerivedBlockSealPair, including: bool) -> Result<(), DbError> {
        let idx = self.locate(target)?;
        self.truncate(idx, including)
    }

    /// Validate and append one link.
    ///
    /// A non-zero `invalidated` hash marks the link as an invalidated
    /// placeholder when it equals `derived.hash`, and otherwise allows a
    /// same-height replacement of the block with that hash.
    pub(super) fn add_link(
        &mut self,
        derived_from: &BlockRef,
        derived: &BlockRef,
        invalidated: Hash256,
    ) -> Result<(), DbError> {
        let last = match self.store.size() {
            0 => None,
            _ => Some(self.latest()?),
        };
        match check_link(last.as_ref(), derived_from, derived, invalidated)? {
            Some(link) => self.append(&link),
            None => Ok(()),
        }
    }

    fn append(&mut self, link: &LinkEntry) -> Result<(), DbError> {
        self.store.append(&[link.encode()])?;
        debug!(entries = self.store.size(), link = %link, "appended derivation link");
        Ok(())
    }
}

/// Check that a link may follow `last` (`None` for an empty ledger) without
/// touching the store. Returns `None` when the link repeats `last`.
fn check_link(
    last: Option<&LinkEntry>,
    derived_from: &BlockRef,
    derived: &BlockRef,
    invalidated: Hash256,
) -> Result<Option<LinkEntry>, DbError> {
    let link = LinkEntry {
        derived_from: derived_from.seal(),
        derived: derived.seal(),
        invalidated: !invalidated.is_zero() && derived.hash == invalidated,
    };

    // Any block may start the ledger, except an invalidated one.
    let Some(last) = last else {
        if link.invalidated {
            return Err(DbError::Conflict(format!(
                "first entry {link} cannot be an invalidated entry"
            )));
        }
        return Ok(Some(link));
    };

    if last.invalidated {
        return Err(DbError::Conflict(format!(
            "cannot build {link} on top of invalidated entry {last}"
        )));
    }

    if last.derived.id() == derived.id() && last.derived_from.id() == derived_from.id() {
        // Repeat of known data; the ID does not cover the timestamp.
        if last.derived.timestamp != derived.time {
            warn!(derived = %derived, last_derived = %last.derived,
                "derived block already exists with different timestamp");
        }
        if last.derived_from.timestamp != derived_from.time {
            warn!(derived_from = %derived_from, last_derived_from = %last.derived_from,
                "derived-from block already exists with different timestamp");
        }
        return Ok(None);
    }

    // The L2 chain is sequential; a block repeats when its L1 block was empty.
    if last.derived.number == derived.number && !invalidated.is_zero() {
        if last.derived.hash != invalidated {
            return Err(DbError::Conflict(format!(
                "inserting block {} that invalidates {invalidated} at height {}, but expected {}",
                derived.hash, last.derived.number, last.derived.hash
            )));
        }
    } else {
        check_transition(Space::Derived, &last.derived, derived, &link)?;
    }

    // Many L2 blocks may share an L1 block, but L1 blocks are also sequential.
    check_transition(Space::DerivedFrom, &last.derived_from, derived_from, &link)?;

    Ok(Some(link))
}

/// Three-way rule shared by both number spaces: same height must be the same
/// block, height + 1 must build on the last block, anything else is out of order.
fn check_transition(
    space: Space,
    last: &BlockSeal,
    next: &BlockRef,
    link: &LinkEntry,
) -> Result<(), DbError> {
    let name = space.name();
    if next.number == last.number {
        if next.hash != last.hash {
            return Err(DbError::Conflict(format!(
                "{name} block {next} conflicts with known {name} block {last} at same height, adding {link}"
            )));
        }
    } else if last.number.checked_add(1) == Some(next.number) {
        if next.parent_hash != last.hash {
            return Err(DbError::Conflict(format!(
                "{name} block {next} (parent {}) does not build on {last}, adding {link}",
                next.parent_hash
            )));
        }
    } else if next.number > last.number {
        return Err(DbError::OutOfOrder(format!(
            "cannot add {link}, last {name} block {last} is too far behind"
        )));
    } else {
        return Err(DbError::OutOfOrder(format!(
            "{name} block {next} is older than current {name} block {last}, adding {link}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{block, hash, l1, l2};
    use super::super::MemEntryStore;
    use super::*;
    use interlink_core::ErrorKind;

    fn db() -> DerivationDb<MemEntryStore> {
        DerivationDb::in_memory()
    }

    fn seeded(links: &[(u64, u64)]) -> DerivationDb<MemEntryStore> {
        let db = db();
        for &(from, derived) in links {
            db.add_derived(&l1(from), &l2(derived)).unwrap();
        }
        db
    }

    fn pair(from: &BlockRef, derived: &BlockRef) -> DerivedBlockRefPair {
        DerivedBlockRefPair { derived_from: *from, derived: *derived }
    }

    // --- append ---

    #[test]
    fn genesis_then_next() {
        let db = seeded(&[(0, 0)]);
        db.add_derived(&l1(1), &l2(1)).unwrap();
        assert_eq!(db.entry_count(), 2);
    }

    #[test]
    fn same_height_other_hash_conflicts() {
        let db = seeded(&[(0, 0), (1, 1)]);
        let z = block(2, 1, 7, 0);
        let err = db.add_derived(&l1(1), &z).unwrap_err();
        assert!(err.is_conflict(), "{err}");
        assert_eq!(db.entry_count(), 2);
    }

    #[test]
    fn empty_l1_block_repeats_l2() {
        let db = seeded(&[(0, 0), (1, 1)]);
        db.add_derived(&l1(2), &l2(1)).unwrap();
        assert_eq!(db.entry_count(), 3);
        assert_eq!(db.latest().unwrap().derived, l2(1).seal());
    }

    #[test]
    fn duplicate_append_is_noop() {
        let db = seeded(&[(0, 0), (1, 1)]);
        db.add_derived(&l1(1), &l2(1)).unwrap();
        assert_eq!(db.entry_count(), 2);
    }

    #[test]
    fn duplicate_with_other_timestamp_is_noop() {
        let db = seeded(&[(0, 0), (1, 1)]);
        let mut from = l1(1);
        from.time += 100;
        let mut derived = l2(1);
        derived.time += 5;
        db.add_derived(&from, &derived).unwrap();
        assert_eq!(db.entry_count(), 2);
        assert_eq!(db.latest().unwrap().derived.timestamp, l2(1).time);
    }

    #[test]
    fn derived_wrong_parent_conflicts() {
        let db = seeded(&[(0, 0)]);
        let orphan = block(2, 1, 0, 9);
        assert!(db.add_derived(&l1(1), &orphan).unwrap_err().is_conflict());
    }

    #[test]
    fn derived_from_wrong_parent_conflicts() {
        let db = seeded(&[(0, 0)]);
        let orphan = block(1, 1, 0, 9);
        assert!(db.add_derived(&orphan, &l2(1)).unwrap_err().is_conflict());
    }

    #[test]
    fn derived_from_same_height_other_hash_conflicts() {
        let db = seeded(&[(0, 0), (1, 1)]);
        let other = block(1, 1, 3, 0);
        assert!(db.add_derived(&other, &l2(2)).unwrap_err().is_conflict());
    }

    #[test]
    fn derived_gap_is_out_of_order() {
        let db = seeded(&[(0, 0)]);
        let err = db.add_derived(&l1(1), &l2(2)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfOrder);
    }

    #[test]
    fn derived_regression_is_out_of_order() {
        let db = seeded(&[(0, 0), (1, 1), (1, 2)]);
        let err = db.add_derived(&l1(2), &l2(1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfOrder);
    }

    #[test]
    fn derived_from_gap_is_out_of_order() {
        let db = seeded(&[(0, 0)]);
        let err = db.add_derived(&l1(2), &l2(1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfOrder);
    }

    #[test]
    fn derived_from_regression_is_out_of_order() {
        let db = seeded(&[(0, 0), (1, 1)]);
        let err = db.add_derived(&l1(0), &l2(2)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfOrder);
    }

    #[test]
    fn max_height_tip_rejects_without_overflow() {
        let top = |tag: u8| BlockRef {
            hash: hash(tag, u64::MAX, 0),
            number: u64::MAX,
            parent_hash: hash(tag, u64::MAX - 1, 0),
            time: 5_000,
        };
        let db = db();
        db.add_derived(&top(1), &top(2)).unwrap();

        let err = db.add_derived(&top(1), &l2(5)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfOrder);
        let err = db.add_derived(&l1(5), &top(2)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfOrder);
        assert_eq!(db.entry_count(), 1);
    }

    #[test]
    fn first_entry_may_start_anywhere() {
        let db = db();
        db.add_derived(&l1(100), &l2(50)).unwrap();
        db.add_derived(&l1(101), &l2(51)).unwrap();
        assert_eq!(db.entry_count(), 2);
    }

    // --- rewind ---

    #[test]
    fn rewind_keeps_target() {
        let db = seeded(&[(0, 0), (1, 1), (2, 2), (3, 3)]);
        let target = pair(&l1(1), &l2(1)).seals();
        db.rewind(&target, false).unwrap();
        assert_eq!(db.entry_count(), 2);
        assert_eq!(db.latest().unwrap(), target);
    }

    #[test]
    fn rewind_including_drops_target() {
        let db = seeded(&[(0, 0), (1, 1), (2, 2)]);
        db.rewind(&pair(&l1(1), &l2(1)).seals(), true).unwrap();
        assert_eq!(db.entry_count(), 1);
    }

    #[test]
    fn rewind_hash_mismatch_conflicts() {
        let db = seeded(&[(0, 0), (1, 1), (2, 2)]);
        let target = DerivedBlockSealPair {
            derived_from: l1(1).seal(),
            derived: BlockSeal::new(hash(2, 1, 5), 1, 0),
        };
        assert!(db.rewind(&target, false).unwrap_err().is_conflict());
        assert_eq!(db.entry_count(), 3);
    }

    #[test]
    fn rewind_beyond_end_is_future() {
        let db = seeded(&[(0, 0), (1, 1)]);
        let target = pair(&l1(5), &l2(5)).seals();
        assert!(db.rewind(&target, false).unwrap_err().is_future());
    }

    #[test]
    fn rewind_to_l2_keeps_first_occurrence() {
        let db = seeded(&[(0, 0), (1, 1), (2, 1), (3, 2)]);
        db.rewind_to_l2(1).unwrap();
        assert_eq!(db.entry_count(), 2);
        assert_eq!(db.latest().unwrap().derived_from, l1(1).seal());
    }

    #[test]
    fn rewind_to_l1_keeps_last_of_block() {
        let db = seeded(&[(0, 0), (1, 1), (1, 2), (2, 3)]);
        db.rewind_to_l1(1).unwrap();
        assert_eq!(db.entry_count(), 3);
        assert_eq!(db.latest().unwrap().derived, l2(2).seal());
    }

    // --- invalidate / replace ---

    #[test]
    fn invalidate_freezes_store() {
        let db = seeded(&[(0, 0), (1, 1), (2, 2)]);
        db.rewind_and_invalidate(&pair(&l1(2), &l2(2))).unwrap();
        assert_eq!(db.entry_count(), 3);
        let inv = db.invalidated().unwrap();
        assert_eq!(inv.derived, l2(2).seal());
        assert_eq!(db.latest().unwrap_err().kind(), ErrorKind::AwaitReplacementBlock);

        let err = db.add_derived(&l1(3), &l2(3)).unwrap_err();
        assert!(err.is_conflict());
        let err = db.add_derived(&l1(2), &l2(2)).unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn invalidate_first_entry_rejected() {
        let db = seeded(&[(0, 0)]);
        let err = db.rewind_and_invalidate(&pair(&l1(0), &l2(0))).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(db.entry_count(), 1);
        assert_eq!(db.latest().unwrap(), pair(&l1(0), &l2(0)).seals());
    }

    #[test]
    fn rejected_invalidation_keeps_ledger() {
        let db = seeded(&[(0, 0), (1, 1), (2, 2)]);
        // Same seal as the stored entry, but it does not build on L2 #1.
        let mut bad = l2(2);
        bad.parent_hash = hash(2, 1, 7);
        let err = db.rewind_and_invalidate(&pair(&l1(2), &bad)).unwrap_err();
        assert!(err.is_conflict(), "{err}");

        assert_eq!(db.entry_count(), 3);
        assert_eq!(db.latest().unwrap(), pair(&l1(2), &l2(2)).seals());
        assert!(db.invalidated().unwrap_err().is_conflict());
        db.add_derived(&l1(3), &l2(3)).unwrap();
    }

    #[test]
    fn replace_round_trip() {
        let db = seeded(&[(0, 0), (1, 1), (2, 2)]);
        db.rewind_and_invalidate(&pair(&l1(2), &l2(2))).unwrap();

        let replacement = block(2, 2, 9, 0);
        let result = db.replace_invalidated_block(&replacement, l2(2).hash).unwrap();
        assert_eq!(result.derived, replacement.seal());
        assert_eq!(result.derived_from, l1(2).seal());
        assert_eq!(db.entry_count(), 3);
        assert_eq!(db.latest().unwrap(), result);
        assert!(db.is_derived(l2(2).id()).unwrap_err().is_conflict());
        db.is_derived(replacement.id()).unwrap();

        // Ledger is writable again and continues from the replacement.
        db.add_derived(&l1(3), &block(2, 3, 9, 9)).unwrap();
        assert_eq!(db.entry_count(), 4);
    }

    #[test]
    fn replace_with_repeated_l2_height() {
        // L2 #1 was derived from L1 #1 and repeated in L1 #2; it is invalidated at L1 #2.
        let db = seeded(&[(0, 0), (1, 1), (2, 1)]);
        db.rewind_and_invalidate(&pair(&l1(2), &l2(1))).unwrap();
        assert_eq!(db.entry_count(), 3);
        let replacement = block(2, 1, 4, 0);
        let result = db.replace_invalidated_block(&replacement, l2(1).hash).unwrap();
        assert_eq!(result.derived_from, l1(2).seal());
        assert_eq!(db.entry_count(), 3);
        assert_eq!(db.entries().unwrap()[2].derived, replacement.seal());
    }

    #[test]
    fn replace_without_invalidation_conflicts() {
        let db = seeded(&[(0, 0), (1, 1)]);
        let err = db.replace_invalidated_block(&block(2, 1, 4, 0), l2(1).hash).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(db.entry_count(), 2);
    }

    #[test]
    fn replace_hash_mismatch_conflicts() {
        let db = seeded(&[(0, 0), (1, 1), (2, 2)]);
        db.rewind_and_invalidate(&pair(&l1(2), &l2(2))).unwrap();
        let err = db.replace_invalidated_block(&block(2, 2, 4, 0), hash(2, 2, 8)).unwrap_err();
        assert!(err.is_conflict());
        assert!(db.invalidated().is_ok());
    }

    #[test]
    fn rejected_replacement_keeps_ledger_frozen() {
        let db = seeded(&[(0, 0), (1, 1), (2, 2)]);
        let bad = pair(&l1(2), &l2(2));
        db.rewind_and_invalidate(&bad).unwrap();

        // Parent is on another fork of L2 #1.
        let orphan = block(2, 2, 7, 3);
        let err = db.replace_invalidated_block(&orphan, l2(2).hash).unwrap_err();
        assert!(err.is_conflict(), "{err}");

        assert_eq!(db.entry_count(), 3);
        assert_eq!(db.invalidated().unwrap(), bad.seals());
        assert!(db.add_derived(&l1(2), &l2(2)).unwrap_err().is_conflict());
        assert!(db.add_derived(&l1(3), &l2(3)).unwrap_err().is_conflict());

        // A valid replacement still goes through afterwards.
        let replacement = block(2, 2, 9, 0);
        db.replace_invalidated_block(&replacement, l2(2).hash).unwrap();
        assert_eq!(db.latest().unwrap().derived, replacement.seal());
    }

    #[test]
    fn replacement_with_invalidated_hash_conflicts() {
        let db = seeded(&[(0, 0), (1, 1), (2, 2)]);
        db.rewind_and_invalidate(&pair(&l1(2), &l2(2))).unwrap();
        let err = db.replace_invalidated_block(&l2(2), l2(2).hash).unwrap_err();
        assert!(err.is_conflict());
        assert!(db.invalidated().is_ok());
    }

    #[test]
    fn replace_on_empty_is_future() {
        let err = db().replace_invalidated_block(&l2(0), l2(0).hash).unwrap_err();
        assert!(err.is_future());
    }

    #[test]
    fn rewind_clears_invalidation() {
        let db = seeded(&[(0, 0), (1, 1), (2, 2)]);
        db.rewind_and_invalidate(&pair(&l1(2), &l2(2))).unwrap();
        db.rewind(&pair(&l1(1), &l2(1)).seals(), false).unwrap();
        db.add_derived(&l1(2), &l2(2)).unwrap();
        assert_eq!(db.latest().unwrap().derived, l2(2).seal());
    }

    #[test]
    fn invalidation_hash_must_match_last_derived() {
        let db = seeded(&[(0, 0), (1, 1)]);
        let mut inner = db.inner.write();
        let err = inner
            .add_link(&l1(1), &block(2, 1, 3, 0), hash(2, 1, 6))
            .unwrap_err();
        assert!(err.is_conflict());
    }
}
