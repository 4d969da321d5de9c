//! Multi-chain safety database.
//!
//! [`ChainsDb`] owns, per chain, a log store (local-unsafe data), a
//! cross-unsafe tracker, a local-safe and a cross-safe derivation store,
//! plus the process-wide finalized L1 block. Every registry is a
//! [`DashMap`], so work on one chain never waits on another; each store does
//! its own locking. Stores are cloned out of the registries before use, so no
//! map guard is held while a store works.
//!
//! Cross-chain validity is not checked here: callers decide what is
//! cross-safe, this database only keeps each chain's ledgers consistent.

mod query;
mod update;

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use interlink_core::traits::{
    CrossDerivedFromStorage, DependencySet, Emitter, LocalDerivedFromStorage, LogStorage,
};
use interlink_core::{
    BlockRef, BlockSeal, ChainId, DbError, DerivedBlockRefPair, Hash256, SuperEvent,
};

use crate::config::DbConfig;
use crate::fromda::DerivationDb;

/// Stores and safety state for all tracked chains.
pub struct ChainsDb {
    /// Local-unsafe: the sequence of block seals and logs.
    log_dbs: DashMap<ChainId, Arc<dyn LogStorage>>,
    /// Cross-unsafe progress. A zeroed value falls back to cross-safe.
    cross_unsafe: DashMap<ChainId, Arc<RwLock<BlockSeal>>>,
    /// Local-safe: what we optimistically know about L2 blocks derived from L1.
    local_dbs: DashMap<ChainId, Arc<dyn LocalDerivedFromStorage>>,
    /// Cross-safe: L2 blocks known to only have cross-L2 valid dependencies.
    cross_dbs: DashMap<ChainId, Arc<dyn CrossDerivedFromStorage>>,
    /// L1 finality progress. Zeroed until the first notification; L2
    /// finality queries fail until then.
    finalized_l1: RwLock<BlockRef>,
    dep_set: Arc<dyn DependencySet>,
    /// Signals database changes to other listeners.
    emitter: RwLock<Option<Arc<dyn Emitter>>>,
}

impl ChainsDb {
    pub fn new(dep_set: Arc<dyn DependencySet>) -> Self {
        Self {
            log_dbs: DashMap::new(),
            cross_unsafe: DashMap::new(),
            local_dbs: DashMap::new(),
            cross_dbs: DashMap::new(),
            finalized_l1: RwLock::new(BlockRef::default()),
            dep_set,
            emitter: RwLock::new(None),
        }
    }

    pub fn attach_emitter(&self, emitter: Arc<dyn Emitter>) {
        *self.emitter.write() = Some(emitter);
    }

    /// Emit through the attached emitter, if any.
    fn emit(&self, event: SuperEvent) {
        let emitter = self.emitter.read().clone();
        match emitter {
            Some(em) => em.emit(event),
            None => debug!(event = event.name(), "no emitter attached, dropping event"),
        }
    }

    /// React to a domain event. Returns whether the event was recognised.
    pub fn on_event(&self, event: &SuperEvent) -> bool {
        match event {
            SuperEvent::Anchor { chain, anchor } => {
                self.maybe_init_events_db(*chain, anchor);
                self.maybe_init_safe_db(*chain, anchor);
            }
            SuperEvent::LocalDerived { chain, derived } => {
                self.update_local_safe(*chain, &derived.derived_from, &derived.derived);
            }
            SuperEvent::FinalizedL1Request { finalized_l1 } => {
                self.on_finalized_l1(finalized_l1);
            }
            SuperEvent::ReplaceBlock { chain, replacement } => {
                self.on_replace_block(*chain, &replacement.replacement, replacement.invalidated);
            }
            _ => return false,
        }
        true
    }

    pub fn add_log_db(&self, chain: ChainId, log_db: Arc<dyn LogStorage>) {
        if self.log_dbs.insert(chain, log_db).is_some() {
            warn!(%chain, "overwriting existing log db for chain");
        }
    }

    pub fn add_local_derived_from_db(&self, chain: ChainId, db: Arc<dyn LocalDerivedFromStorage>) {
        if self.local_dbs.insert(chain, db).is_some() {
            warn!(%chain, "overwriting existing local derived-from db for chain");
        }
    }

    pub fn add_cross_derived_from_db(&self, chain: ChainId, db: Arc<dyn CrossDerivedFromStorage>) {
        if self.cross_dbs.insert(chain, db).is_some() {
            warn!(%chain, "overwriting existing cross derived-from db for chain");
        }
    }

    pub fn add_cross_unsafe_tracker(&self, chain: ChainId) {
        let tracker = Arc::new(RwLock::new(BlockSeal::default()));
        if self.cross_unsafe.insert(chain, tracker).is_some() {
            warn!(%chain, "overwriting existing cross-unsafe tracker for chain");
        }
    }

    /// Open the file-backed local-safe and cross-safe stores of `chain` under
    /// `config.data_dir` and register them with a fresh cross-unsafe tracker.
    ///
    /// The log store is engine-specific and registered separately with
    /// [`add_log_db`](Self::add_log_db).
    pub fn open_chain(&self, config: &DbConfig, chain: ChainId) -> Result<(), DbError> {
        if !self.dep_set.has_chain(chain) {
            warn!(%chain, "opening databases for chain outside the dependency set");
        }
        let local = DerivationDb::open(config.local_safe_path(chain)).map_err(|e| e.in_chain(chain))?;
        let cross = DerivationDb::open(config.cross_safe_path(chain)).map_err(|e| e.in_chain(chain))?;
        info!(
            %chain,
            local_entries = local.entry_count(),
            cross_entries = cross.entry_count(),
            "opened derivation databases"
        );
        self.add_local_derived_from_db(chain, Arc::new(local));
        self.add_cross_derived_from_db(chain, Arc::new(cross));
        self.add_cross_unsafe_tracker(chain);
        Ok(())
    }

    /// Prepare to resume recording events after a restart.
    ///
    /// Rewinds every log store to its last sealed block, so recording resumes
    /// with the first log of the next block. Empty stores are skipped. The
    /// first failing chain aborts the scan.
    pub fn resume_from_last_sealed_block(&self) -> Result<(), DbError> {
        for (chain, log_db) in self.log_db_snapshot() {
            let Some(head) = log_db.latest_sealed_block() else {
                info!(%chain, "resuming, but found no db contents");
                continue;
            };
            info!(%chain, head = %head, "resuming, starting from last sealed block");
            log_db.rewind(head).map_err(|e| e.in_chain(chain))?;
        }
        Ok(())
    }

    pub fn dependency_set(&self) -> Arc<dyn DependencySet> {
        Arc::clone(&self.dep_set)
    }

    /// Chains of the dependency set that lack a log store or a local-safe store.
    pub fn missing_chains(&self) -> Vec<ChainId> {
        let mut missing: Vec<ChainId> = self
            .dep_set
            .chains()
            .into_iter()
            .filter(|c| !self.log_dbs.contains_key(c) || !self.local_dbs.contains_key(c))
            .collect();
        missing.sort();
        missing
    }

    /// Close every log store, collecting all failures.
    pub fn close(&self) -> Result<(), DbError> {
        let errors: Vec<DbError> = self
            .log_db_snapshot()
            .into_iter()
            .filter_map(|(chain, log_db)| log_db.close().err().map(|e| e.in_chain(chain)))
            .collect();
        match DbError::join(errors) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Registered log stores, cloned out of the registry.
    fn log_db_snapshot(&self) -> Vec<(ChainId, Arc<dyn LogStorage>)> {
        self.log_dbs
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect()
    }

    fn log_db(&self, chain: ChainId) -> Result<Arc<dyn LogStorage>, DbError> {
        self.log_dbs
            .get(&chain)
            .map(|r| Arc::clone(r.value()))
            .ok_or(DbError::UnknownChain(chain))
    }

    fn local_db(&self, chain: ChainId) -> Result<Arc<dyn LocalDerivedFromStorage>, DbError> {
        self.local_dbs
            .get(&chain)
            .map(|r| Arc::clone(r.value()))
            .ok_or(DbError::UnknownChain(chain))
    }

    fn cross_db(&self, chain: ChainId) -> Result<Arc<dyn CrossDerivedFromStorage>, DbError> {
        self.cross_dbs
            .get(&chain)
            .map(|r| Arc::clone(r.value()))
            .ok_or(DbError::UnknownChain(chain))
    }

    fn cross_unsafe_tracker(&self, chain: ChainId) -> Result<Arc<RwLock<BlockSeal>>, DbError> {
        self.cross_unsafe
            .get(&chain)
            .map(|r| Arc::clone(r.value()))
            .ok_or(DbError::UnknownChain(chain))
    }

    /// Seed an empty log store with the anchor's derived block.
    fn maybe_init_events_db(&self, chain: ChainId, anchor: &DerivedBlockRefPair) {
        match self.open_block(chain, 0) {
            Err(e) if e.is_future() => {
                debug!(%chain, "events db is empty, initializing from anchor");
                if let Err(e) = self.seal_block(chain, &anchor.derived) {
                    warn!(%chain, err = %e, "failed to initialize events db");
                }
            }
            Err(e) => warn!(%chain, err = %e, "failed to check if events db is initialized"),
            Ok(_) => debug!(%chain, "events db already initialized"),
        }
    }

    /// Seed empty local-safe and cross-safe stores with the anchor pair.
    fn maybe_init_safe_db(&self, chain: ChainId, anchor: &DerivedBlockRefPair) {
        match self.local_safe(chain) {
            Err(e) if e.is_future() => {
                info!(%chain, anchor = %anchor, "safe db is empty, initializing from anchor");
                if let Err(e) = self.update_cross_safe(chain, &anchor.derived_from, &anchor.derived) {
                    warn!(%chain, err = %e, "failed to initialize cross-safe db");
                }
                self.update_local_safe(chain, &anchor.derived_from, &anchor.derived);
            }
            Err(e) => warn!(%chain, err = %e, "failed to check if safe db is initialized"),
            Ok(_) => debug!(%chain, "safe db already initialized"),
        }
    }

    fn on_finalized_l1(&self, finalized: &BlockRef) {
        {
            let mut current = self.finalized_l1.write();
            if !current.is_zero() && current.number > finalized.number {
                warn!(
                    current = %*current,
                    received = %finalized,
                    "ignoring finalized L1 older than the current one"
                );
                return;
            }
            *current = *finalized;
        }
        info!(finalized_l1 = %finalized, "updated finalized L1");
        self.emit(SuperEvent::FinalizedL1Update { finalized_l1: *finalized });
    }

    fn on_replace_block(&self, chain: ChainId, replacement: &BlockRef, invalidated: Hash256) {
        let local = match self.local_db(chain) {
            Ok(db) => db,
            Err(e) => {
                warn!(%chain, err = %e, "cannot find local db for replacement block");
                return;
            }
        };
        match local.replace_invalidated_block(replacement, invalidated) {
            Ok(result) => {
                info!(%chain, replacement = %replacement, invalidated = %invalidated, "replaced block");
                self.emit(SuperEvent::LocalSafeUpdate { chain, new_local_safe: result });
            }
            Err(e) => {
                warn!(%chain, replacement = %replacement, invalidated = %invalidated, err = %e,
                    "cannot replace invalidated block");
            }
        }
    }
}
