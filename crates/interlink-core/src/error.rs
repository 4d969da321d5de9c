//! Error types for the interlink databases.
use thiserror::Error;

use crate::types::ChainId;

/// Error kinds of the derivation store and the chains database.
///
/// The first three kinds are validation outcomes and are never retried
/// internally. Callers usually react to [`DbError::Future`] by retrying
/// later, and to [`DbError::Conflict`] by escalating.
#[derive(Error, Debug)]
pub enum DbError {
    /// Requested data lies beyond what has been recorded yet.
    #[error("future data: {0}")]
    Future(String),
    /// Recorded data disagrees with what the caller asserted or attempted to append.
    #[error("conflicting data: {0}")]
    Conflict(String),
    /// An append would create a gap or regression in a numbering space.
    #[error("out of order: {0}")]
    OutOfOrder(String),
    /// The entry is an invalidated placeholder awaiting a replacement block.
    #[error("awaiting replacement block: {0}")]
    AwaitReplacementBlock(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("data corruption: {0}")]
    DataCorruption(String),
    #[error("unknown chain: {0}")]
    UnknownChain(ChainId),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("chain {chain}: {source}")]
    Chain {
        chain: ChainId,
        #[source]
        source: Box<DbError>,
    },
    #[error("{}", join_messages(.0))]
    Joined(Vec<DbError>),
}

/// Discriminant of a [`DbError`], with per-chain context stripped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Future,
    Conflict,
    OutOfOrder,
    AwaitReplacementBlock,
    NotFound,
    DataCorruption,
    UnknownChain,
    Io,
    Joined,
}

impl DbError {
    /// Wrap this error with the chain it occurred on.
    pub fn in_chain(self, chain: ChainId) -> Self {
        DbError::Chain { chain, source: Box::new(self) }
    }

    /// The underlying error kind, looking through [`DbError::Chain`] wrappers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DbError::Future(_) => ErrorKind::Future,
            DbError::Conflict(_) => ErrorKind::Conflict,
            DbError::OutOfOrder(_) => ErrorKind::OutOfOrder,
            DbError::AwaitReplacementBlock(_) => ErrorKind::AwaitReplacementBlock,
            DbError::NotFound(_) => ErrorKind::NotFound,
            DbError::DataCorruption(_) => ErrorKind::DataCorruption,
            DbError::UnknownChain(_) => ErrorKind::UnknownChain,
            DbError::Io(_) => ErrorKind::Io,
            DbError::Chain { source, .. } => source.kind(),
            DbError::Joined(_) => ErrorKind::Joined,
        }
    }

    pub fn is_future(&self) -> bool {
        self.kind() == ErrorKind::Future
    }

    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }

    /// Combine errors without dropping any. Returns `None` for an empty list.
    pub fn join(mut errors: Vec<DbError>) -> Option<DbError> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(DbError::Joined(errors)),
        }
    }
}

fn join_messages(errors: &[DbError]) -> String {
    errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; ")
}
