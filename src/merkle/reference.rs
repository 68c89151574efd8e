//! In-memory classical hexary Merkle Patricia Trie.
//!
//! This is the conventional formulation: separate leaf, extension, and
//! branch nodes built from a flat key-value map, hashed per the yellow-paper
//! rules. The versioned engine must produce the same root hash, so this
//! trie doubles as the independent oracle in tests and as the iteration
//! source for one-shot migrations into the versioned layout.
//!
//! Uses hashbrown with FxHash: keys are usually keccak256 outputs, already
//! uniformly distributed, and none of the input is adversarial.

use hashbrown::HashMap;
use primitive_types::H256;
use rayon::prelude::*;
use rustc_hash::FxBuildHasher;

use super::integrity::{keccak256, EMPTY_ROOT, HASH_SIZE};
use super::rlp::RlpEncoder;
use crate::data::{Nibbles, TERMINATOR};

type FastHashMap<K, V> = HashMap<K, V, FxBuildHasher>;

/// Threshold above which branch children are built on the rayon pool.
const PARALLEL_THRESHOLD: usize = 64;

/// A structural node of the classical trie. Children are held inline; the
/// hash-or-embed collapse happens at encoding time.
#[derive(Clone, Debug)]
pub enum RefNode {
    /// `path` is the key remainder in nibbles, without the terminator.
    Leaf { path: Vec<u8>, value: Vec<u8> },
    Extension {
        prefix: Vec<u8>,
        child: Box<RefNode>,
    },
    Branch {
        children: Box<[Option<RefNode>; 16]>,
        value: Option<Vec<u8>>,
    },
}

impl RefNode {
    /// RLP-encodes the node, embedding each child as its hash when the
    /// child's own encoding reaches 32 bytes and structurally otherwise.
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = RlpEncoder::new();
        self.encode_into(&mut enc);
        enc.into_bytes()
    }

    fn encode_into(&self, enc: &mut RlpEncoder) {
        match self {
            RefNode::Leaf { path, value } => enc.encode_list(|e| {
                let mut nibbles = path.clone();
                nibbles.push(TERMINATOR);
                e.encode_bytes(&Nibbles::from_nibbles(&nibbles).to_compact());
                e.encode_bytes(value);
            }),
            RefNode::Extension { prefix, child } => enc.encode_list(|e| {
                e.encode_bytes(&Nibbles::from_nibbles(prefix).to_compact());
                encode_child(e, child);
            }),
            RefNode::Branch { children, value } => enc.encode_list(|e| {
                for child in children.iter() {
                    match child {
                        Some(node) => encode_child(e, node),
                        None => e.encode_empty(),
                    }
                }
                match value {
                    Some(v) => e.encode_bytes(v),
                    None => e.encode_empty(),
                }
            }),
        }
    }

    /// The keccak256 hash of the node's encoding.
    pub fn hash(&self) -> H256 {
        keccak256(&self.encode())
    }
}

fn encode_child(enc: &mut RlpEncoder, child: &RefNode) {
    let encoded = child.encode();
    if encoded.len() >= HASH_SIZE {
        enc.encode_bytes(keccak256(&encoded).as_bytes());
    } else {
        enc.encode_raw(&encoded);
    }
}

/// A flat-map trie recomputing its root hash on demand.
pub struct ReferenceTrie {
    data: FastHashMap<Vec<u8>, Vec<u8>>,
    root_cache: Option<H256>,
}

impl ReferenceTrie {
    /// Creates an empty trie.
    pub fn new() -> Self {
        Self {
            data: FastHashMap::with_hasher(FxBuildHasher),
            root_cache: Some(EMPTY_ROOT),
        }
    }

    /// Creates a trie sized for the expected number of entries.
    pub fn with_capacity(expected: usize) -> Self {
        Self {
            data: FastHashMap::with_capacity_and_hasher(expected, FxBuildHasher),
            root_cache: Some(EMPTY_ROOT),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Inserts a key-value pair. An empty value removes the key, matching
    /// the conventional trie's deletion-by-empty-value behavior.
    pub fn insert(&mut self, key: &[u8], value: Vec<u8>) {
        if value.is_empty() {
            self.data.remove(key);
        } else {
            self.data.insert(key.to_vec(), value);
        }
        self.root_cache = None;
    }

    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.data.get(key).map(|v| v.as_slice())
    }

    pub fn remove(&mut self, key: &[u8]) -> Option<Vec<u8>> {
        let removed = self.data.remove(key);
        if removed.is_some() {
            self.root_cache = None;
        }
        removed
    }

    /// Iterates over all key-value pairs in map order.
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.data.iter().map(|(k, v)| (k.as_slice(), v.as_slice()))
    }

    /// All entries as (nibble-path, value), sorted by path.
    fn sorted_entries(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut entries: Vec<(Vec<u8>, Vec<u8>)> = self
            .data
            .iter()
            .map(|(k, v)| (key_nibbles(k), v.clone()))
            .collect();
        entries.par_sort_unstable_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Computes and caches the root hash.
    pub fn root_hash(&mut self) -> H256 {
        if let Some(cached) = self.root_cache {
            return cached;
        }
        let hash = match self.structural_root() {
            Some(root) => root.hash(),
            None => EMPTY_ROOT,
        };
        self.root_cache = Some(hash);
        hash
    }

    /// Builds the full structural node tree, or `None` when empty.
    pub fn structural_root(&self) -> Option<RefNode> {
        if self.data.is_empty() {
            return None;
        }
        let entries = self.sorted_entries();
        Some(build_node(&entries, 0))
    }
}

impl Default for ReferenceTrie {
    fn default() -> Self {
        Self::new()
    }
}

fn key_nibbles(key: &[u8]) -> Vec<u8> {
    let mut nibbles = Vec::with_capacity(key.len() * 2);
    for byte in key {
        nibbles.push(byte >> 4);
        nibbles.push(byte & 0x0f);
    }
    nibbles
}

/// Builds the node covering `entries`, all of which share their first
/// `depth` nibbles. Entries must be sorted by path.
fn build_node(entries: &[(Vec<u8>, Vec<u8>)], depth: usize) -> RefNode {
    if entries.len() == 1 {
        let (nibbles, value) = &entries[0];
        return RefNode::Leaf {
            path: nibbles[depth..].to_vec(),
            value: value.clone(),
        };
    }

    let shared = shared_prefix_len(entries, depth);
    if shared > 0 {
        let prefix = entries[0].0[depth..depth + shared].to_vec();
        let child = build_node(entries, depth + shared);
        return RefNode::Extension {
            prefix,
            child: Box::new(child),
        };
    }

    // Group by the discriminating nibble. Sorted input keeps groups
    // contiguous, so slice boundaries suffice.
    let mut groups: [(usize, usize); 16] = [(0, 0); 16];
    let mut branch_value = None;
    let mut current: Option<(u8, usize)> = None;
    for (i, (nibbles, value)) in entries.iter().enumerate() {
        if depth >= nibbles.len() {
            branch_value = Some(value.clone());
            continue;
        }
        let radix = nibbles[depth];
        match current {
            Some((prev, _)) if prev == radix => {}
            Some((prev, start)) => {
                groups[prev as usize] = (start, i);
                current = Some((radix, i));
            }
            None => current = Some((radix, i)),
        }
    }
    if let Some((radix, start)) = current {
        groups[radix as usize] = (start, entries.len());
    }

    let build_group = |group: &(usize, usize)| -> Option<RefNode> {
        let (start, end) = *group;
        (start < end).then(|| build_node(&entries[start..end], depth + 1))
    };

    let children: Box<[Option<RefNode>; 16]> = if entries.len() > PARALLEL_THRESHOLD {
        let built: Vec<Option<RefNode>> = groups.par_iter().map(build_group).collect();
        let mut slots: [Option<RefNode>; 16] = Default::default();
        for (slot, node) in slots.iter_mut().zip(built) {
            *slot = node;
        }
        Box::new(slots)
    } else {
        let mut slots: [Option<RefNode>; 16] = Default::default();
        for (slot, group) in slots.iter_mut().zip(groups.iter()) {
            *slot = build_group(group);
        }
        Box::new(slots)
    };

    RefNode::Branch {
        children,
        value: branch_value,
    }
}

fn shared_prefix_len(entries: &[(Vec<u8>, Vec<u8>)], depth: usize) -> usize {
    let first = &entries[0].0;
    if depth >= first.len() {
        return 0;
    }
    let mut shared = first.len() - depth;
    for (nibbles, _) in &entries[1..] {
        if depth >= nibbles.len() {
            return 0;
        }
        let limit = shared.min(nibbles.len() - depth);
        let mut i = 0;
        while i < limit && nibbles[depth + i] == first[depth + i] {
            i += 1;
        }
        shared = i;
        if shared == 0 {
            break;
        }
    }
    shared
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_empty_trie() {
        let mut trie = ReferenceTrie::new();
        assert!(trie.is_empty());
        assert_eq!(trie.root_hash(), EMPTY_ROOT);
    }

    #[test]
    fn test_single_entry_known_root() {
        let mut trie = ReferenceTrie::new();
        trie.insert(&[0u8; 32], vec![0x00]);
        assert_eq!(
            trie.root_hash(),
            H256(hex!(
                "ebcd1aff3f48f44a89c8bceb54a7e73c44edda96852b9debc4447b5ac9be19a6"
            ))
        );
    }

    #[test]
    fn test_insert_order_is_irrelevant() {
        let mut a = ReferenceTrie::new();
        let mut b = ReferenceTrie::new();
        for i in 0..50u32 {
            let key = keccak256(&i.to_be_bytes());
            a.insert(key.as_bytes(), vec![i as u8 + 1]);
        }
        for i in (0..50u32).rev() {
            let key = keccak256(&i.to_be_bytes());
            b.insert(key.as_bytes(), vec![i as u8 + 1]);
        }
        assert_eq!(a.root_hash(), b.root_hash());
    }

    #[test]
    fn test_remove_restores_previous_root() {
        let mut trie = ReferenceTrie::new();
        trie.insert(b"do", b"verb".to_vec());
        trie.insert(b"dog", b"puppy".to_vec());
        let before = trie.root_hash();

        trie.insert(b"doge", b"coin".to_vec());
        assert_ne!(trie.root_hash(), before);

        trie.remove(b"doge");
        assert_eq!(trie.root_hash(), before);
    }

    #[test]
    fn test_parallel_and_sequential_agree() {
        let mut small = ReferenceTrie::new();
        let mut large = ReferenceTrie::new();
        for i in 0..200u32 {
            let key = keccak256(&i.to_be_bytes());
            large.insert(key.as_bytes(), format!("value_{i}").into_bytes());
            if i < 10 {
                small.insert(key.as_bytes(), format!("value_{i}").into_bytes());
            }
        }
        // The large trie crosses the parallel threshold; both paths must
        // agree with a rebuilt sequential result.
        let mut rebuilt = ReferenceTrie::new();
        let entries: Vec<(Vec<u8>, Vec<u8>)> = large
            .iter()
            .map(|(k, v)| (k.to_vec(), v.to_vec()))
            .collect();
        for (k, v) in entries {
            rebuilt.insert(&k, v);
        }
        assert_eq!(large.root_hash(), rebuilt.root_hash());
        assert_ne!(small.root_hash(), large.root_hash());
    }

    #[test]
    fn test_structural_root_shape() {
        let mut trie = ReferenceTrie::new();
        let mut k2 = [0u8; 32];
        k2[0] = 0x10;
        trie.insert(&[0u8; 32], vec![0x00]);
        trie.insert(&k2, vec![0x01]);

        match trie.structural_root() {
            Some(RefNode::Branch { children, value }) => {
                assert!(value.is_none());
                assert!(children[0].is_some());
                assert!(children[1].is_some());
            }
            other => panic!("expected a top-level branch, got {other:?}"),
        }
    }
}
