//! Canonical integrity representation of trie nodes.
//!
//! The root hash of the engine must equal the hash of a conventional hexary
//! Merkle Patricia Trie over the same entries. Integrity nodes are the
//! classical node shapes (leaf, extension, 17-slot full node) that the
//! finalizer reconstructs bottom-up purely for hashing: a subtree whose RLP
//! encoding reaches 32 bytes collapses to its Keccak-256 hash, smaller
//! subtrees stay inline inside their parent.

use primitive_types::H256;
use tiny_keccak::{Hasher, Keccak};

use super::rlp::RlpEncoder;

/// Hash size (Keccak-256).
pub const HASH_SIZE: usize = 32;

/// The root hash of an empty trie: keccak256 of the RLP empty string.
pub const EMPTY_ROOT: H256 = H256([
    0x56, 0xe8, 0x1f, 0x17, 0x1b, 0xcc, 0x55, 0xa6, 0xff, 0x83, 0x45, 0xe6, 0x92, 0xc0, 0xf8,
    0x6e, 0x5b, 0x48, 0xe0, 0x1b, 0x99, 0x6c, 0xad, 0xc0, 0x01, 0x62, 0x2f, 0xb5, 0xe3, 0x63,
    0xb4, 0x21,
]);

/// Computes the Keccak-256 hash of `data`.
pub fn keccak256(data: &[u8]) -> H256 {
    let mut hasher = Keccak::v256();
    hasher.update(data);
    let mut out = [0u8; HASH_SIZE];
    hasher.finalize(&mut out);
    H256(out)
}

/// Number of slots in a classical full node: 16 children plus the value slot.
pub const FULL_NODE_SLOTS: usize = 17;

/// A node of the canonical hexary trie, already collapsed: children whose
/// encoding reached the hash threshold appear as `Hash`, smaller ones are
/// embedded structurally.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IntegrityNode {
    /// A missing subtree.
    Empty,
    /// A collapsed subtree, referenced by the hash of its encoding.
    Hash(H256),
    /// A value-bearing node; `key` is the hex-prefix encoded remainder path.
    Leaf { key: Vec<u8>, value: Vec<u8> },
    /// A shared-prefix node pointing at a full node.
    Extension {
        key: Vec<u8>,
        child: Box<IntegrityNode>,
    },
    /// The 17-slot branching node. The value slot is always empty for
    /// fixed-width keys but is encoded for hash compatibility.
    Full {
        children: Box<[IntegrityNode; FULL_NODE_SLOTS]>,
    },
}

impl IntegrityNode {
    /// Creates a full node with all slots empty.
    pub fn empty_full() -> Self {
        IntegrityNode::Full {
            children: Box::new(std::array::from_fn(|_| IntegrityNode::Empty)),
        }
    }

    /// RLP-encodes the node.
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = RlpEncoder::new();
        self.encode_into(&mut enc);
        enc.into_bytes()
    }

    fn encode_into(&self, enc: &mut RlpEncoder) {
        match self {
            IntegrityNode::Empty => enc.encode_empty(),
            IntegrityNode::Hash(hash) => enc.encode_bytes(hash.as_bytes()),
            IntegrityNode::Leaf { key, value } => enc.encode_list(|e| {
                e.encode_bytes(key);
                e.encode_bytes(value);
            }),
            IntegrityNode::Extension { key, child } => enc.encode_list(|e| {
                e.encode_bytes(key);
                child.encode_into(e);
            }),
            IntegrityNode::Full { children } => enc.encode_list(|e| {
                for child in children.iter() {
                    child.encode_into(e);
                }
            }),
        }
    }

    /// The hash of the node's encoding.
    pub fn hash(&self) -> H256 {
        keccak256(&self.encode())
    }

    /// Collapses an encoding into the form a parent embeds: the hash when the
    /// encoding reached the threshold, the structure itself otherwise.
    pub fn collapsed(self, encoding: &[u8]) -> IntegrityNode {
        if encoding.len() >= HASH_SIZE {
            IntegrityNode::Hash(keccak256(encoding))
        } else {
            self
        }
    }
}
