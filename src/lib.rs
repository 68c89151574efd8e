//! # stratadb
//!
//! A versioned, path-addressed Merkle Patricia Trie storage engine for
//! fixed-width (32-byte) keys, as used by account-state and per-account
//! storage tries on an Ethereum-style ledger.
//!
//! The trie produces the same root hash as a conventional hexary trie over
//! the same entries while storing records under keys that encode
//! (path, version), so a value is one point lookup away when its path and
//! version are known, commits never rewrite unchanged subtrees, and
//! historical versions stay readable until explicitly pruned.
//!
//! ## Modules
//!
//! - `data` - nibble-path primitives
//! - `merkle` - node model, RLP codec, integrity hashing, reference trie
//! - `store` - storage-key codec, typed record storage, decoder, finalizer
//! - `trie` - the versioned trie engine
//! - `convert` - one-shot migration of classical tries into this layout
//! - `blob_log` - append-only numbered blob storage
//! - `chain` - chain-metadata migration and pruned snapshots

pub mod blob_log;
pub mod chain;
pub mod convert;
pub mod data;
pub mod merkle;
pub mod store;
pub mod trie;

pub use blob_log::{BlobLog, BlobLogError};
pub use merkle::{keccak256, ReferenceTrie, EMPTY_ROOT};
pub use store::{Collection, KeyValueStore, MemoryStore, StoreError, WriteBatch};
pub use trie::{TrieError, VersionedTrie, KEY_SIZE};
