//! Node model, RLP codec, and integrity hashing.
//!
//! This module holds everything needed to turn trie contents into the
//! canonical root hash: the versioned in-memory node shapes, the RLP
//! encoder/decoder, the classical integrity-node reconstruction, and a
//! conventional reference trie used as an oracle and migration source.

mod integrity;
mod node;
mod reference;
pub mod rlp;

pub use integrity::{keccak256, IntegrityNode, EMPTY_ROOT, FULL_NODE_SLOTS, HASH_SIZE};
pub use node::{
    BranchNode, LeafNode, Node, OverlayNode, StoredNode, TombstoneSet, BRANCH_WIDTH, TOMBSTONE,
};
pub use reference::{RefNode, ReferenceTrie};
