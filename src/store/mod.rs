//! Record storage: the backing-store contract, the composite key codec,
//! the typed two-namespace collection layer, the node decoder, and the
//! finalizer that hashes and persists tries.

mod collection;
pub mod decode;
mod finalizer;
mod key;
mod kv;

pub use collection::Collection;
pub use finalizer::Finalizer;
pub use key::StorageKey;
pub use kv::{KeyValueStore, MemoryStore, StoreIterator, WriteBatch};

use thiserror::Error;

use crate::merkle::rlp::RlpError;

/// Storage-layer failures.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A stored-node placeholder pointed at a record that is not there.
    #[error("missing stored node at path {path} version {version}")]
    MissingNode { path: String, version: u32 },

    /// A leaf fast-path scan found no live value record.
    #[error("no value record under prefix {prefix} at version {version}")]
    MissingLeaf { prefix: String, version: u32 },

    /// No root record exists at or below the requested version.
    #[error("no root record at or below version {0}")]
    MissingRoot(u32),

    /// RLP-level parse failure.
    #[error(transparent)]
    Encoding(#[from] RlpError),

    /// Structurally invalid record contents.
    #[error("malformed record: {0}")]
    BadRecord(String),

    /// The underlying store failed.
    #[error("storage backend: {0}")]
    Backend(String),
}
