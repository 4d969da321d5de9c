//! # interlink-core
//! Foundation types, errors and storage traits for the interlink supervisor
//! database.

pub mod error;
pub mod events;
pub mod traits;
pub mod types;

pub use error::{DbError, ErrorKind};
pub use events::{BlockReplacement, SuperEvent};
pub use types::{
    BlockId, BlockRef, BlockSeal, ChainId, DerivedBlockRefPair, DerivedBlockSealPair,
    ExecutingMessage, Hash256,
};
