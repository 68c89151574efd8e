//! Finalization: canonical hashing and record emission.
//!
//! One bottom-up pass reconstructs the classical integrity form of every
//! node to compute the root hash. In store mode the same pass stages the
//! version's records into a single batch: a compact versioned-branch record
//! per branch, a value record per leaf, and a tombstone value record per
//! accumulated deletion. The batch is submitted exactly once; a failed pass
//! writes nothing.

use primitive_types::H256;

use super::collection::Collection;
use super::decode::ChildMask;
use super::kv::WriteBatch;
use super::StoreError;
use crate::data::{Nibbles, KEY_NIBBLES};
use crate::merkle::rlp::RlpEncoder;
use crate::merkle::{
    keccak256, BranchNode, IntegrityNode, LeafNode, Node, EMPTY_ROOT, HASH_SIZE,
};

/// Walks a node tree computing its canonical integrity hash, optionally
/// persisting the tree's records through a [`Collection`].
pub struct Finalizer<'a> {
    storage: &'a Collection,
}

impl<'a> Finalizer<'a> {
    pub fn new(storage: &'a Collection) -> Self {
        Self { storage }
    }

    /// Finalizes the subtree rooted at `node`, which sits at `path` in its
    /// trie, and returns its integrity hash. With `store` set, all dirty
    /// records are staged into one batch and written atomically.
    pub fn finalize(&self, node: &Node, path: &Nibbles, store: bool) -> Result<H256, StoreError> {
        let mut batch = store.then(WriteBatch::new);
        let integrity = self.finalize_node(node, path, &mut batch, true)?;
        if let Some(batch) = batch {
            self.storage.write(batch)?;
        }
        match integrity {
            IntegrityNode::Hash(hash) => Ok(hash),
            other => Err(StoreError::BadRecord(format!(
                "finalization of a forced node left an inline {other:?}"
            ))),
        }
    }

    fn finalize_node(
        &self,
        node: &Node,
        path: &Nibbles,
        batch: &mut Option<WriteBatch>,
        force_hash: bool,
    ) -> Result<IntegrityNode, StoreError> {
        match node {
            Node::Empty => {
                if force_hash {
                    Ok(IntegrityNode::Hash(EMPTY_ROOT))
                } else {
                    Ok(IntegrityNode::Empty)
                }
            }
            Node::Stored(stored) => Ok(IntegrityNode::Hash(stored.hash)),
            Node::Overlay(overlay) => {
                if let Some(batch) = batch.as_mut() {
                    for (deleted_path, version) in &overlay.tombstones {
                        self.storage
                            .stage_value(batch, deleted_path, *version, crate::merkle::TOMBSTONE);
                    }
                }
                self.finalize_node(&overlay.inner, path, batch, force_hash)
            }
            Node::Leaf(leaf) => self.finalize_leaf(leaf, path, batch, force_hash),
            Node::Branch(branch) => self.finalize_branch(branch, path, batch, force_hash),
        }
    }

    fn finalize_leaf(
        &self,
        leaf: &LeafNode,
        path: &Nibbles,
        batch: &mut Option<WriteBatch>,
        force_hash: bool,
    ) -> Result<IntegrityNode, StoreError> {
        let integrity = IntegrityNode::Leaf {
            key: leaf.prefix.to_compact(),
            value: leaf.value.clone(),
        };
        let encoding = integrity.encode();

        if let Some(batch) = batch.as_mut() {
            // Only a root leaf needs a structural record; every other leaf
            // is reachable through its parent branch record.
            if force_hash {
                self.storage
                    .stage_node(batch, path, leaf.version, &encoding);
            }

            let value_path = path.join(&leaf.prefix);
            debug_assert_eq!(value_path.len(), KEY_NIBBLES);
            self.storage
                .stage_value(batch, &value_path, leaf.version, &leaf.value);
        }

        if force_hash {
            return Ok(IntegrityNode::Hash(keccak256(&encoding)));
        }
        Ok(integrity.collapsed(&encoding))
    }

    fn finalize_branch(
        &self,
        branch: &BranchNode,
        path: &Nibbles,
        batch: &mut Option<WriteBatch>,
        force_hash: bool,
    ) -> Result<IntegrityNode, StoreError> {
        let children_path = path.join(&branch.prefix);
        let mut children: [IntegrityNode; 17] = std::array::from_fn(|_| IntegrityNode::Empty);
        for (radix, child) in branch.children.iter().enumerate() {
            children[radix] =
                self.finalize_node(child, &children_path.child(radix as u8), batch, false)?;
        }
        let full = IntegrityNode::Full {
            children: Box::new(children),
        };

        let (canonical, encoding) = wrap_extension(&full, &branch.prefix);

        if encoding.len() >= HASH_SIZE || force_hash {
            if let Some(batch) = batch.as_mut() {
                let IntegrityNode::Full { children } = &full else {
                    unreachable!("branch finalization always builds a full node");
                };
                self.store_branch(branch, path, batch, children);
            }
            return Ok(IntegrityNode::Hash(keccak256(&encoding)));
        }
        Ok(canonical)
    }

    /// Stages the compact versioned record for a branch: its compact prefix,
    /// the living and leaf child masks, the living children's versions, and
    /// their integrity representations in slot order.
    fn store_branch(
        &self,
        branch: &BranchNode,
        path: &Nibbles,
        batch: &mut WriteBatch,
        integrity_children: &[IntegrityNode; 17],
    ) {
        let mut living = ChildMask::default();
        let mut leaves = ChildMask::default();
        let mut versions = Vec::new();
        let mut stored_children = Vec::new();
        for (radix, child) in branch.children.iter().enumerate() {
            if !child.is_empty() {
                living.set(radix);
                versions.push(child.version());
                stored_children.push(&integrity_children[radix]);
            }
            if child.is_leaf_like() {
                leaves.set(radix);
            }
        }

        let mut enc = RlpEncoder::new();
        enc.encode_list(|e| {
            e.encode_bytes(&branch.prefix.to_compact());
            e.encode_uint(living.0 as u64);
            e.encode_uint(leaves.0 as u64);
            e.encode_list(|e| {
                for version in &versions {
                    e.encode_uint(*version as u64);
                }
            });
            e.encode_list(|e| {
                for child in &stored_children {
                    e.encode_raw(&child.encode());
                }
            });
        });

        self.storage
            .stage_node(batch, path, branch.version, enc.as_bytes());
    }
}

/// Wraps a full node in a classical extension when the branch carries a
/// prefix, returning the canonical node and its encoding.
fn wrap_extension(full: &IntegrityNode, prefix: &Nibbles) -> (IntegrityNode, Vec<u8>) {
    let full_encoding = full.encode();
    if prefix.is_empty() {
        return (full.clone(), full_encoding);
    }

    let child = if full_encoding.len() >= HASH_SIZE {
        IntegrityNode::Hash(keccak256(&full_encoding))
    } else {
        full.clone()
    };
    let extension = IntegrityNode::Extension {
        key: prefix.to_compact(),
        child: Box::new(child),
    };
    let encoding = extension.encode();
    (extension, encoding)
}
