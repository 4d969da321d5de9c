//! Append-only, truncatable storage of fixed-size records.
//!
//! Provides the [`EntryStore`] trait with a file-backed implementation for
//! production and an in-memory one for tests.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, warn};

use interlink_core::DbError;

use super::entry::{ENTRY_SIZE, Entry};

/// Randomly addressable sequence of fixed-size records.
///
/// Not internally synchronized for writes: the owning database serializes
/// mutations behind its own lock.
pub trait EntryStore: Send + Sync {
    /// Number of records.
    fn size(&self) -> u64;

    /// Read the record at `idx`.
    ///
    /// # Errors
    ///
    /// - [`DbError::Future`] if `idx >= size()`
    fn read(&self, idx: u64) -> Result<Entry, DbError>;

    /// Append records after the current last one.
    fn append(&mut self, entries: &[Entry]) -> Result<(), DbError>;

    /// Keep only the first `keep` records.
    fn truncate(&mut self, keep: u64) -> Result<(), DbError>;

    /// Flush and release resources.
    fn close(&mut self) -> Result<(), DbError>;

    /// Index of the last record, or `None` when empty.
    fn last_entry_idx(&self) -> Option<u64> {
        self.size().checked_sub(1)
    }
}

/// Record store backed by a single file.
pub struct FileEntryStore {
    path: PathBuf,
    file: Mutex<File>,
    size: u64,
}

impl FileEntryStore {
    /// Open or create the store at `path`, creating parent directories.
    ///
    /// A trailing partial record, left by a crash in the middle of an
    /// append, is dropped.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DbError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        let len = file.metadata()?.len();
        let entry_size = ENTRY_SIZE as u64;
        let size = len / entry_size;
        if len % entry_size != 0 {
            warn!(
                path = %path.display(),
                bytes = len % entry_size,
                "dropping partially written trailing entry"
            );
            file.set_len(size * entry_size)?;
            file.sync_all()?;
        }
        debug!(path = %path.display(), entries = size, "opened entry store");
        Ok(Self { path, file: Mutex::new(file), size })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EntryStore for FileEntryStore {
    fn size(&self) -> u64 {
        self.size
    }

    fn read(&self, idx: u64) -> Result<Entry, DbError> {
        if idx >= self.size {
            return Err(DbError::Future(format!(
                "entry {idx} is beyond the last entry (size {})",
                self.size
            )));
        }
        let mut out = [0u8; ENTRY_SIZE];
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(idx * ENTRY_SIZE as u64))?;
        file.read_exact(&mut out)?;
        Ok(out)
    }

    fn append(&mut self, entries: &[Entry]) -> Result<(), DbError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut buf = Vec::with_capacity(entries.len() * ENTRY_SIZE);
        for e in entries {
            buf.extend_from_slice(e);
        }
        let offset = self.size * ENTRY_SIZE as u64;
        let file = self.file.get_mut();
        let written = file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| file.write_all(&buf))
            .and_then(|_| file.sync_data());
        if let Err(e) = written {
            // Undo a partial write so the next append starts at a record boundary.
            if let Err(undo) = file.set_len(offset) {
                warn!(path = %self.path.display(), err = %undo, "failed to undo partial append");
            }
            return Err(e.into());
        }
        self.size += entries.len() as u64;
        Ok(())
    }

    fn truncate(&mut self, keep: u64) -> Result<(), DbError> {
        if keep > self.size {
            return Err(DbError::Future(format!(
                "cannot truncate to {keep} entries, only {} present",
                self.size
            )));
        }
        let file = self.file.get_mut();
        file.set_len(keep * ENTRY_SIZE as u64)?;
        file.sync_all()?;
        self.size = keep;
        Ok(())
    }

    fn close(&mut self) -> Result<(), DbError> {
        self.file.get_mut().sync_all()?;
        Ok(())
    }
}

/// In-memory record store for tests and ephemeral databases.
#[derive(Default)]
pub struct MemEntryStore {
    entries: Vec<Entry>,
}

impl MemEntryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EntryStore for MemEntryStore {
    fn size(&self) -> u64 {
        self.entries.len() as u64
    }

    fn read(&self, idx: u64) -> Result<Entry, DbError> {
        usize::try_from(idx)
            .ok()
            .and_then(|i| self.entries.get(i))
            .copied()
            .ok_or_else(|| {
                DbError::Future(format!(
                    "entry {idx} is beyond the last entry (size {})",
                    self.entries.len()
                ))
            })
    }

    fn append(&mut self, entries: &[Entry]) -> Result<(), DbError> {
        self.entries.extend_from_slice(entries);
        Ok(())
    }

    fn truncate(&mut self, keep: u64) -> Result<(), DbError> {
        if keep > self.size() {
            return Err(DbError::Future(format!(
                "cannot truncate to {keep} entries, only {} present",
                self.entries.len()
            )));
        }
        self.entries.truncate(keep as usize);
        Ok(())
    }

    fn close(&mut self) -> Result<(), DbError> {
        Ok(())
    }
}
