//! The versioned trie engine.
//!
//! A `VersionedTrie` owns an in-memory node tree rooted at a fixed-width
//! key space, lazily materializing persisted subtrees on descent and
//! rebuilding the touched path copy-on-mutate. Every record a commit writes
//! is tagged with the in-progress version, so nodes persisted by earlier
//! commits stay untouched and historical versions remain readable until
//! pruned.
//!
//! An instance is single-writer: it is owned by one logical writer at a
//! time. Instances under disjoint collection prefixes may share a store.

use std::sync::Arc;

use primitive_types::H256;
use thiserror::Error;
use tracing::{debug, trace};

use crate::data::Nibbles;
use crate::merkle::{BranchNode, Node, StoredNode, TombstoneSet, EMPTY_ROOT, TOMBSTONE};
use crate::store::{Collection, Finalizer, KeyValueStore, StoreError};

/// Width every key must have: 32 bytes, the size of a keccak256 output.
pub const KEY_SIZE: usize = 32;

/// Engine failures.
#[derive(Error, Debug)]
pub enum TrieError {
    #[error("key of {0} bytes; keys must be exactly 32 bytes")]
    InvalidKeyLength(usize),

    #[error("empty values cannot be stored")]
    EmptyValue,

    #[error("the value 0x80 is reserved as the deletion marker")]
    ReservedValue,

    #[error("subtree at {path} hashes to {actual:?}, but {expected:?} was recorded")]
    IntegrityMismatch {
        path: String,
        expected: H256,
        actual: H256,
    },

    #[error("requested root {requested:?} does not match the root {computed:?} stored for version {version}")]
    RootMismatch {
        requested: H256,
        computed: H256,
        version: u32,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of a mutation descent. A node is only swapped in when the
/// recursion reports a replacement, so failures leave the tree untouched.
enum Mutation {
    Replaced(Node),
    Unchanged,
}

/// Outcome of a removal descent. Deleted value paths travel upward until an
/// ancestor survives to carry them as an overlay.
enum Removal {
    Removed(Node, TombstoneSet),
    NotRemoved,
}

/// A versioned, path-addressed Merkle Patricia Trie over 32-byte keys.
pub struct VersionedTrie {
    /// The version in progress; committed records are tagged with it.
    version: u32,
    root: Node,
    storage: Collection,
}

impl VersionedTrie {
    /// Creates an empty trie whose first commit will produce
    /// `version + 1`.
    pub fn new_empty(prefix: Vec<u8>, db: Arc<dyn KeyValueStore>, version: u32) -> Self {
        Self {
            version: version + 1,
            root: Node::Empty,
            storage: Collection::new(prefix, db),
        }
    }

    /// Opens the trie persisted at exactly (`root_hash`, `version`),
    /// verifying the stored root against the requested hash before any
    /// operation is possible.
    pub fn open(
        prefix: Vec<u8>,
        db: Arc<dyn KeyValueStore>,
        root_hash: H256,
        version: u32,
    ) -> Result<Self, TrieError> {
        let mut trie = Self::new_empty(prefix, db, version);
        if root_hash != EMPTY_ROOT {
            trie.root = trie.storage.load_node(&Nibbles::new(), version)?;
        }
        trie.verify_root(root_hash, version)?;
        Ok(trie)
    }

    /// Opens the newest persisted trie at or below `version`, verifying it
    /// against `root_hash`.
    pub fn open_latest(
        prefix: Vec<u8>,
        db: Arc<dyn KeyValueStore>,
        root_hash: H256,
        version: u32,
    ) -> Result<Self, TrieError> {
        let mut trie = Self::new_empty(prefix, db, version);
        if root_hash != EMPTY_ROOT {
            let (root, _) = trie.storage.load_latest_root(version)?;
            trie.root = root;
        }
        trie.verify_root(root_hash, version)?;
        Ok(trie)
    }

    fn verify_root(&self, requested: H256, version: u32) -> Result<(), TrieError> {
        let computed = self.finalizer().finalize(&self.root, &Nibbles::new(), false)?;
        if computed != requested {
            return Err(TrieError::RootMismatch {
                requested,
                computed,
                version,
            });
        }
        Ok(())
    }

    /// The version the next commit will produce.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// The current in-memory root node; exposed for structural inspection.
    pub fn root(&self) -> &Node {
        &self.root
    }

    fn finalizer(&self) -> Finalizer<'_> {
        Finalizer::new(&self.storage)
    }

    /// Returns the value mapped to `key`, or `None`.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, TrieError> {
        check_key(key)?;
        let path = Nibbles::from_key(key);
        let found = self.get_at(&self.root, &path, 0)?;
        trace!(key = %hex(key), found = found.is_some(), "get");
        Ok(found)
    }

    fn get_at(
        &self,
        node: &Node,
        path: &Nibbles,
        index: usize,
    ) -> Result<Option<Vec<u8>>, TrieError> {
        if let Some(prefix) = node.live_prefix() {
            if !prefix.is_prefix_of_at(path, index) {
                return Ok(None);
            }
        }

        match node {
            Node::Empty => Ok(None),
            Node::Leaf(leaf) => {
                if leaf.value == TOMBSTONE {
                    Ok(None)
                } else {
                    Ok(Some(leaf.value.clone()))
                }
            }
            Node::Branch(branch) => {
                let radix_at = index + branch.prefix.len();
                let radix = path.at(radix_at) as usize;
                self.get_at(&branch.children[radix], path, radix_at + 1)
            }
            Node::Overlay(overlay) => {
                if overlay.tombstones.contains_key(path) {
                    return Ok(None);
                }
                self.get_at(&overlay.inner, path, index)
            }
            Node::Stored(_) => {
                // Persisted subtrees answer value reads with one direct
                // lookup; no structural descent is needed.
                match self.storage.load_latest_value(path, self.version - 1)? {
                    Some(value) if value != TOMBSTONE => Ok(Some(value)),
                    _ => Ok(None),
                }
            }
        }
    }

    /// Maps `key` to `value`, rebuilding the touched path at the current
    /// version.
    pub fn update(&mut self, key: &[u8], value: &[u8]) -> Result<(), TrieError> {
        check_key(key)?;
        check_value(value)?;
        let path = Nibbles::from_key(key);

        let root = std::mem::take(&mut self.root);
        let outcome = self.update_at(&root, &path, 0, value);
        match outcome {
            Ok(Mutation::Replaced(new_root)) => {
                trace!(key = %hex(key), "update: replaced");
                self.root = new_root;
                Ok(())
            }
            Ok(Mutation::Unchanged) => {
                trace!(key = %hex(key), "update: unchanged");
                self.root = root;
                Ok(())
            }
            Err(err) => {
                self.root = root;
                Err(err)
            }
        }
    }

    fn update_at(
        &self,
        node: &Node,
        path: &Nibbles,
        index: usize,
        value: &[u8],
    ) -> Result<Mutation, TrieError> {
        if let Some(prefix) = node.live_prefix() {
            if !prefix.is_prefix_of_at(path, index) {
                let split = node.add_sibling(path, index, value, self.version);
                return Ok(Mutation::Replaced(split));
            }
        }

        match node {
            Node::Empty => Ok(Mutation::Replaced(Node::leaf(
                path.suffix(index),
                value.to_vec(),
                self.version,
            ))),
            Node::Leaf(leaf) => {
                if leaf.value == value {
                    return Ok(Mutation::Unchanged);
                }
                Ok(Mutation::Replaced(Node::leaf(
                    leaf.prefix.clone(),
                    value.to_vec(),
                    self.version,
                )))
            }
            Node::Branch(branch) => {
                let radix_at = index + branch.prefix.len();
                let radix = path.at(radix_at);
                let child = &branch.children[radix as usize];
                match self.update_at(child, path, radix_at + 1, value)? {
                    Mutation::Unchanged => Ok(Mutation::Unchanged),
                    Mutation::Replaced(new_child) => Ok(Mutation::Replaced(
                        self.replace_child(branch, new_child, radix, path, index)?,
                    )),
                }
            }
            Node::Overlay(overlay) => {
                match self.update_at(&overlay.inner, path, index, value)? {
                    Mutation::Unchanged => Ok(Mutation::Unchanged),
                    Mutation::Replaced(inner) => {
                        let mut tombstones = overlay.tombstones.clone();
                        tombstones.remove(path);
                        Ok(Mutation::Replaced(Node::overlay(inner, tombstones)))
                    }
                }
            }
            Node::Stored(stored) => {
                let loaded = self.load_stored(stored, path.prefix(index))?;
                self.verify_subtree(&loaded, stored, path, index)?;
                match self.update_at(&loaded, path, index, value)? {
                    Mutation::Unchanged => Ok(Mutation::Unchanged),
                    replaced => Ok(replaced),
                }
            }
        }
    }

    /// Removes `key` if present. The deletion is remembered in-memory and
    /// recorded as a tombstone value record by the next commit, so
    /// versioned reads answer "not present" at that exact path.
    pub fn remove(&mut self, key: &[u8]) -> Result<(), TrieError> {
        check_key(key)?;
        let path = Nibbles::from_key(key);

        let root = std::mem::take(&mut self.root);
        let outcome = self.remove_at(&root, &path, 0);
        match outcome {
            Ok(Removal::Removed(new_root, tombstones)) => {
                trace!(key = %hex(key), "remove: removed");
                // Deletions that emptied the whole trie still need a
                // carrier until commit records them.
                self.root = if new_root.is_empty() && !tombstones.is_empty() {
                    Node::overlay(new_root, tombstones)
                } else {
                    new_root
                };
                Ok(())
            }
            Ok(Removal::NotRemoved) => {
                trace!(key = %hex(key), "remove: not present");
                self.root = root;
                Ok(())
            }
            Err(err) => {
                self.root = root;
                Err(err)
            }
        }
    }

    fn remove_at(
        &self,
        node: &Node,
        path: &Nibbles,
        index: usize,
    ) -> Result<Removal, TrieError> {
        if let Some(prefix) = node.live_prefix() {
            if !prefix.is_prefix_of_at(path, index) {
                return Ok(Removal::NotRemoved);
            }
        }

        match node {
            Node::Empty => Ok(Removal::NotRemoved),
            Node::Leaf(_) => {
                let mut deleted = TombstoneSet::default();
                deleted.insert(path.clone(), self.version);
                Ok(Removal::Removed(Node::Empty, deleted))
            }
            Node::Branch(branch) => {
                let radix_at = index + branch.prefix.len();
                let radix = path.at(radix_at);
                let child = &branch.children[radix as usize];
                match self.remove_at(child, path, radix_at + 1)? {
                    Removal::NotRemoved => Ok(Removal::NotRemoved),
                    Removal::Removed(new_child, deleted) => {
                        let after = self.replace_child(branch, new_child, radix, path, index)?;
                        // This node survives the deletion, so it becomes the
                        // carrier for the deleted paths beneath it.
                        Ok(Removal::Removed(
                            Node::overlay(after, deleted),
                            TombstoneSet::default(),
                        ))
                    }
                }
            }
            Node::Overlay(overlay) => {
                if overlay.tombstones.contains_key(path) {
                    return Ok(Removal::NotRemoved);
                }
                match self.remove_at(&overlay.inner, path, index)? {
                    Removal::NotRemoved => Ok(Removal::NotRemoved),
                    Removal::Removed(after, deleted) => {
                        let mut all = overlay.tombstones.clone();
                        all.extend(deleted);
                        if after.is_empty() {
                            Ok(Removal::Removed(after, all))
                        } else {
                            Ok(Removal::Removed(
                                Node::overlay(after, all),
                                TombstoneSet::default(),
                            ))
                        }
                    }
                }
            }
            Node::Stored(stored) => {
                let loaded = self.load_stored(stored, path.prefix(index))?;
                self.verify_subtree(&loaded, stored, path, index)?;
                self.remove_at(&loaded, path, index)
            }
        }
    }

    /// Swaps a branch child, collapsing the branch when the mutation leaves
    /// a single living child: the survivor absorbs the branch prefix and
    /// the discriminating nibble into its own.
    fn replace_child(
        &self,
        branch: &BranchNode,
        new_child: Node,
        radix: u8,
        path: &Nibbles,
        index: usize,
    ) -> Result<Node, TrieError> {
        let mut children = branch.children.clone();
        children[radix as usize] = new_child;

        if let (Some(survivor_radix), true) = BranchNode::last_living_child(&children) {
            let survivor = std::mem::take(&mut children[survivor_radix]);
            let survivor = match survivor {
                Node::Stored(stored) => {
                    let abs = path
                        .prefix(index)
                        .join(&branch.prefix)
                        .child(survivor_radix as u8);
                    self.load_stored(&stored, abs)?
                }
                live => live,
            };
            let suffix = survivor.live_prefix().cloned().unwrap_or_default();
            let absorbed = branch.prefix.child(survivor_radix as u8).join(&suffix);
            return Ok(survivor.with_prefix(absorbed, self.version));
        }

        Ok(Node::branch(
            branch.prefix.clone(),
            children,
            self.version,
        ))
    }

    /// Materializes a stored node that sits at `abs_path`.
    fn load_stored(&self, stored: &StoredNode, abs_path: Nibbles) -> Result<Node, TrieError> {
        if stored.is_leaf {
            let leaf = self.storage.load_leaf(&abs_path, stored.version)?;
            return Ok(Node::Leaf(Box::new(leaf)));
        }
        Ok(self.storage.load_node(&abs_path, stored.version)?)
    }

    /// Confirms a freshly loaded subtree still hashes to what its parent
    /// recorded. A mismatch indicates store corruption and aborts the
    /// operation.
    fn verify_subtree(
        &self,
        loaded: &Node,
        stored: &StoredNode,
        path: &Nibbles,
        index: usize,
    ) -> Result<(), TrieError> {
        let abs_path = path.prefix(index);
        let actual = self.finalizer().finalize(loaded, &abs_path, false)?;
        if actual != stored.hash {
            return Err(TrieError::IntegrityMismatch {
                path: abs_path.to_string(),
                expected: stored.hash,
                actual,
            });
        }
        Ok(())
    }

    /// Computes the root hash without persisting anything.
    pub fn hash(&self) -> Result<H256, TrieError> {
        Ok(self.finalizer().finalize(&self.root, &Nibbles::new(), false)?)
    }

    /// Persists the in-progress version in one atomic batch and returns its
    /// root hash. The caller keeps the (hash, version) pair to reopen the
    /// trie later; the version counter then advances.
    pub fn commit(&mut self) -> Result<H256, TrieError> {
        let committed = self.version;
        let hash = self.finalizer().finalize(&self.root, &Nibbles::new(), true)?;
        self.version += 1;
        debug!(version = committed, root = ?hash, "committed trie version");
        Ok(hash)
    }

    /// Deletes records superseded below `threshold`. See
    /// [`Collection::prune`] for the exact retention rule.
    pub fn prune(&self, threshold: u32) -> Result<usize, TrieError> {
        Ok(self.storage.prune(threshold)?)
    }
}

fn check_key(key: &[u8]) -> Result<(), TrieError> {
    if key.len() != KEY_SIZE {
        return Err(TrieError::InvalidKeyLength(key.len()));
    }
    Ok(())
}

fn check_value(value: &[u8]) -> Result<(), TrieError> {
    if value.is_empty() {
        return Err(TrieError::EmptyValue);
    }
    if value == TOMBSTONE {
        return Err(TrieError::ReservedValue);
    }
    Ok(())
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
