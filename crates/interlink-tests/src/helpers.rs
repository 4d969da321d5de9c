//! Shared test helpers for the integration tests.

use std::collections::HashMap;

use parking_lot::{Mutex, RwLock};

use interlink_core::traits::{Emitter, LogStorage};
use interlink_core::{
    BlockId, BlockRef, BlockSeal, DbError, ExecutingMessage, Hash256, SuperEvent,
};

/// Deterministic hash for block `number` on fork `fork` of chain `tag`.
pub fn hash(tag: u8, number: u64, fork: u8) -> Hash256 {
    let mut out = [0u8; 32];
    out[0] = tag;
    out[1] = fork;
    out[24..].copy_from_slice(&number.to_be_bytes());
    Hash256(out)
}

/// Block `number` on `fork`, built on block `number - 1` of `parent_fork`.
pub fn block(tag: u8, number: u64, fork: u8, parent_fork: u8) -> BlockRef {
    BlockRef {
        hash: hash(tag, number, fork),
        number,
        parent_hash: if number == 0 {
            Hash256::ZERO
        } else {
            hash(tag, number - 1, parent_fork)
        },
        time: 1_000 + number * 2,
    }
}

/// Canonical L1 block.
pub fn l1(number: u64) -> BlockRef {
    block(1, number, 0, 0)
}

/// Canonical L2 block.
pub fn l2(number: u64) -> BlockRef {
    block(2, number, 0, 0)
}

/// Sealed block with its logs, as kept by [`MemLogStore`].
#[derive(Clone, Debug)]
struct SealedBlock {
    block: BlockRef,
    logs: Vec<(Hash256, Option<ExecutingMessage>)>,
}

/// Minimal in-memory log store.
///
/// Logs are buffered until the block is sealed; sealing requires the block to
/// build on the previous seal.
#[derive(Default)]
pub struct MemLogStore {
    inner: RwLock<LogInner>,
}

#[derive(Default)]
struct LogInner {
    sealed: Vec<SealedBlock>,
    pending: Vec<(Hash256, Option<ExecutingMessage>)>,
}

impl MemLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sealed_count(&self) -> usize {
        self.inner.read().sealed.len()
    }
}

impl LogInner {
    fn get(&self, number: u64) -> Result<&SealedBlock, DbError> {
        let first = self
            .sealed
            .first()
            .ok_or_else(|| DbError::Future("no blocks sealed".into()))?;
        if number < first.block.number {
            return Err(DbError::NotFound(format!("block {number} is before the first seal")));
        }
        self.sealed
            .get((number - first.block.number) as usize)
            .ok_or_else(|| DbError::Future(format!("block {number} is not sealed yet")))
    }
}

impl LogStorage for MemLogStore {
    fn add_log(
        &self,
        log_hash: Hash256,
        parent_block: BlockId,
        log_idx: u32,
        exec_msg: Option<ExecutingMessage>,
    ) -> Result<(), DbError> {
        let mut inner = self.inner.write();
        if let Some(last) = inner.sealed.last() {
            if last.block.id() != parent_block {
                return Err(DbError::Conflict(format!(
                    "log builds on {parent_block}, but last sealed block is {}",
                    last.block
                )));
            }
        }
        if log_idx as usize != inner.pending.len() {
            return Err(DbError::OutOfOrder(format!(
                "expected log index {}, got {log_idx}",
                inner.pending.len()
            )));
        }
        inner.pending.push((log_hash, exec_msg));
        Ok(())
    }

    fn seal_block(&self, parent_hash: Hash256, block: BlockId, timestamp: u64) -> Result<(), DbError> {
        let mut inner = self.inner.write();
        if let Some(last) = inner.sealed.last() {
            if last.block.hash != parent_hash || last.block.number + 1 != block.number {
                return Err(DbError::Conflict(format!(
                    "block {block} does not build on {}",
                    last.block
                )));
            }
        }
        let logs = std::mem::take(&mut inner.pending);
        inner.sealed.push(SealedBlock {
            block: BlockRef {
                hash: block.hash,
                number: block.number,
                parent_hash,
                time: timestamp,
            },
            logs,
        });
        Ok(())
    }

    fn rewind(&self, new_head: BlockId) -> Result<(), DbError> {
        let mut inner = self.inner.write();
        let head = inner.get(new_head.number)?;
        if head.block.hash != new_head.hash {
            return Err(DbError::Conflict(format!(
                "cannot rewind to {new_head}, found {}",
                head.block
            )));
        }
        let keep = (new_head.number - inner.sealed[0].block.number + 1) as usize;
        inner.sealed.truncate(keep);
        inner.pending.clear();
        Ok(())
    }

    fn latest_sealed_block(&self) -> Option<BlockId> {
        self.inner.read().sealed.last().map(|s| s.block.id())
    }

    fn find_sealed_block(&self, number: u64) -> Result<BlockSeal, DbError> {
        Ok(self.inner.read().get(number)?.block.seal())
    }

    fn contains(&self, block_num: u64, log_idx: u32, log_hash: Hash256) -> Result<BlockSeal, DbError> {
        let inner = self.inner.read();
        let sealed = inner.get(block_num)?;
        match sealed.logs.get(log_idx as usize) {
            Some((h, _)) if *h == log_hash => Ok(sealed.block.seal()),
            Some((h, _)) => Err(DbError::Conflict(format!(
                "log {log_idx} of block {block_num} is {h}, not {log_hash}"
            ))),
            None => Err(DbError::NotFound(format!("block {block_num} has no log {log_idx}"))),
        }
    }

    fn open_block(
        &self,
        block_num: u64,
    ) -> Result<(BlockRef, u32, HashMap<u32, ExecutingMessage>), DbError> {
        let inner = self.inner.read();
        let sealed = inner.get(block_num)?;
        let exec_msgs = sealed
            .logs
            .iter()
            .enumerate()
            .filter_map(|(i, (_, msg))| msg.map(|m| (i as u32, m)))
            .collect();
        Ok((sealed.block, sealed.logs.len() as u32, exec_msgs))
    }

    fn close(&self) -> Result<(), DbError> {
        Ok(())
    }
}

/// Emitter that keeps every event.
#[derive(Default)]
pub struct RecordingEmitter {
    events: Mutex<Vec<SuperEvent>>,
}

impl RecordingEmitter {
    pub fn events(&self) -> Vec<SuperEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events.lock().iter().filter(|e| e.name() == name).count()
    }
}

impl Emitter for RecordingEmitter {
    fn emit(&self, event: SuperEvent) {
        self.events.lock().push(event);
    }
}
