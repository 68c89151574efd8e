//! In-memory versioned trie nodes.
//!
//! The engine works on a tree of these nodes rooted at the trie. Branches
//! carry their own prefix, subsuming what a conventional trie would express
//! as a separate extension node, and never hold a value slot because keys
//! are fixed width. Subtrees persisted by an earlier commit appear as
//! `Stored` placeholders until a descent needs their content.

use hashbrown::HashMap;
use primitive_types::H256;
use rustc_hash::FxBuildHasher;

use crate::data::Nibbles;

/// The reserved RLP empty string. Never stored as a live value; a value
/// record holding it marks the deletion of a previously present value.
pub const TOMBSTONE: &[u8] = &[0x80];

/// Number of children in a branch node.
pub const BRANCH_WIDTH: usize = 16;

/// Value paths deleted during the in-progress version, mapped to the version
/// that deleted them. Recorded as tombstone value records on commit.
pub type TombstoneSet = HashMap<Nibbles, u32, FxBuildHasher>;

/// A node of the versioned trie.
#[derive(Clone, Debug, Default)]
pub enum Node {
    /// A missing subtree.
    #[default]
    Empty,
    /// Terminates a path with an opaque value.
    Leaf(Box<LeafNode>),
    /// Sixteen-way branching node with its own prefix.
    Branch(Box<BranchNode>),
    /// Lazy placeholder for a subtree persisted under (path, version).
    Stored(StoredNode),
    /// Decorator accumulating deletions until the next commit records them.
    Overlay(Box<OverlayNode>),
}

#[derive(Clone, Debug)]
pub struct LeafNode {
    /// Remaining nibbles of the key, terminator included.
    pub prefix: Nibbles,
    pub value: Vec<u8>,
    pub version: u32,
}

#[derive(Clone, Debug)]
pub struct BranchNode {
    /// Nibbles shared by every key under this node.
    pub prefix: Nibbles,
    pub children: [Node; BRANCH_WIDTH],
    pub version: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StoredNode {
    /// Integrity hash recorded when the subtree was persisted.
    pub hash: H256,
    /// Whether the persisted subtree is a single leaf, which is loaded
    /// through the value namespace instead of a structural record.
    pub is_leaf: bool,
    pub version: u32,
}

#[derive(Clone, Debug)]
pub struct OverlayNode {
    pub inner: Node,
    pub tombstones: TombstoneSet,
}

impl Node {
    pub fn leaf(prefix: Nibbles, value: Vec<u8>, version: u32) -> Self {
        Node::Leaf(Box::new(LeafNode {
            prefix,
            value,
            version,
        }))
    }

    pub fn branch(prefix: Nibbles, children: [Node; BRANCH_WIDTH], version: u32) -> Self {
        Node::Branch(Box::new(BranchNode {
            prefix,
            children,
            version,
        }))
    }

    pub fn stored(hash: H256, is_leaf: bool, version: u32) -> Self {
        Node::Stored(StoredNode {
            hash,
            is_leaf,
            version,
        })
    }

    /// Wraps `inner` with a tombstone set, unwrapping instead when the set
    /// is empty.
    pub fn overlay(inner: Node, tombstones: TombstoneSet) -> Self {
        if tombstones.is_empty() {
            return inner;
        }
        Node::Overlay(Box::new(OverlayNode { inner, tombstones }))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Node::Empty)
    }

    /// The version tag of the node.
    ///
    /// # Panics
    /// Panics on `Empty`, which is never versioned.
    pub fn version(&self) -> u32 {
        match self {
            Node::Empty => panic!("empty nodes carry no version"),
            Node::Leaf(n) => n.version,
            Node::Branch(n) => n.version,
            Node::Stored(n) => n.version,
            Node::Overlay(n) => n.inner.version(),
        }
    }

    /// The prefix of a live (materialized) node; `None` for `Empty` and
    /// `Stored`, which carry no prefix of their own.
    pub fn live_prefix(&self) -> Option<&Nibbles> {
        match self {
            Node::Leaf(n) => Some(&n.prefix),
            Node::Branch(n) => Some(&n.prefix),
            Node::Overlay(n) => n.inner.live_prefix(),
            Node::Empty | Node::Stored(_) => None,
        }
    }

    /// Rebuilds the node with a different prefix and version. Only valid on
    /// live nodes.
    pub fn with_prefix(&self, prefix: Nibbles, version: u32) -> Node {
        match self {
            Node::Leaf(n) => Node::leaf(prefix, n.value.clone(), version),
            Node::Branch(n) => Node::branch(prefix, n.children.clone(), version),
            Node::Overlay(n) => {
                Node::overlay(n.inner.with_prefix(prefix, version), n.tombstones.clone())
            }
            Node::Empty | Node::Stored(_) => {
                panic!("cannot replace the prefix of a non-live node")
            }
        }
    }

    /// Splits this live node at the point where its prefix diverges from
    /// `path[index..]`, producing a branch over the common prefix with the
    /// shortened node on one side and a fresh leaf on the other.
    pub fn add_sibling(&self, path: &Nibbles, index: usize, value: &[u8], version: u32) -> Node {
        match self {
            Node::Empty => Node::leaf(path.suffix(index), value.to_vec(), version),
            Node::Leaf(n) => split_at_divergence(
                &n.prefix,
                |at| Node::leaf(n.prefix.suffix(at), n.value.clone(), version),
                path,
                index,
                value,
                version,
            ),
            Node::Branch(n) => split_at_divergence(
                &n.prefix,
                |at| Node::branch(n.prefix.suffix(at), n.children.clone(), version),
                path,
                index,
                value,
                version,
            ),
            Node::Overlay(n) => {
                let split = n.inner.add_sibling(path, index, value, version);
                if !n.tombstones.contains_key(path) {
                    return Node::overlay(split, n.tombstones.clone());
                }
                let mut remaining = n.tombstones.clone();
                remaining.remove(path);
                Node::overlay(split, remaining)
            }
            Node::Stored(_) => panic!("stored nodes must be loaded before splitting"),
        }
    }

    /// Whether the subtree bottoms out in a single leaf.
    pub fn is_leaf_like(&self) -> bool {
        match self {
            Node::Leaf(_) => true,
            Node::Stored(n) => n.is_leaf,
            Node::Overlay(n) => n.inner.is_leaf_like(),
            _ => false,
        }
    }
}

fn split_at_divergence(
    prefix: &Nibbles,
    shorten: impl FnOnce(usize) -> Node,
    path: &Nibbles,
    index: usize,
    value: &[u8],
    version: u32,
) -> Node {
    let remaining = path.suffix(index);
    let shared = remaining.common_prefix_len(prefix);
    let mut children: [Node; BRANCH_WIDTH] = Default::default();
    children[prefix.at(shared) as usize] = shorten(shared + 1);
    children[remaining.at(shared) as usize] =
        Node::leaf(remaining.suffix(shared + 1), value.to_vec(), version);
    Node::branch(remaining.prefix(shared), children, version)
}

impl BranchNode {
    /// The index of the last living child, and whether it is the only one.
    pub fn last_living_child(children: &[Node; BRANCH_WIDTH]) -> (Option<usize>, bool) {
        let mut index = None;
        let mut only = false;
        for (i, child) in children.iter().enumerate() {
            if !child.is_empty() {
                only = index.is_none();
                index = Some(i);
            }
        }
        (index, only)
    }

    /// Number of non-empty children.
    pub fn living_count(&self) -> usize {
        self.children.iter().filter(|c| !c.is_empty()).count()
    }
}
