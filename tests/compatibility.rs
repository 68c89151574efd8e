//! Hash-equivalence and behavioral property tests.
//!
//! The versioned trie must agree with the conventional hexary trie on
//! every root hash, for any workload of inserts, overwrites, and removals.
//! Workloads are generated from a seeded keccak stream so failures
//! reproduce exactly.

use std::sync::Arc;

use primitive_types::H256;

use stratadb::merkle::Node;
use stratadb::{keccak256, MemoryStore, ReferenceTrie, VersionedTrie, EMPTY_ROOT};

const STATE_PREFIX: &[u8] = b"s";

/// Deterministic stream of 32-byte words derived from a seed.
struct KeyStream {
    state: H256,
}

impl KeyStream {
    fn new(seed: u64) -> Self {
        Self {
            state: keccak256(&seed.to_be_bytes()),
        }
    }

    fn next_word(&mut self) -> [u8; 32] {
        let word = self.state.0;
        self.state = keccak256(&word);
        word
    }

    /// A value between 1 and 64 bytes long, never the reserved 0x80.
    fn next_value(&mut self) -> Vec<u8> {
        let word = self.next_word();
        let len = (word[0] as usize % 64) + 1;
        let mut value = word.repeat(2)[..len].to_vec();
        if value == [0x80] {
            value[0] = 0x7f;
        }
        value
    }
}

fn new_trie() -> VersionedTrie {
    VersionedTrie::new_empty(STATE_PREFIX.to_vec(), Arc::new(MemoryStore::new()), 0)
}

#[test]
fn property_roots_match_reference_during_inserts() {
    let mut stream = KeyStream::new(1);
    let mut trie = new_trie();
    let mut reference = ReferenceTrie::new();

    for step in 0..250 {
        let key = stream.next_word();
        let value = stream.next_value();
        trie.update(&key, &value).unwrap();
        reference.insert(&key, value);

        if step % 25 == 0 {
            assert_eq!(
                trie.hash().unwrap(),
                reference.root_hash(),
                "divergence after {} inserts",
                step + 1
            );
        }
    }
    assert_eq!(trie.hash().unwrap(), reference.root_hash());
}

#[test]
fn property_roots_match_reference_under_mixed_workload() {
    let mut stream = KeyStream::new(2);
    let mut trie = new_trie();
    let mut reference = ReferenceTrie::new();
    let mut keys: Vec<[u8; 32]> = Vec::new();

    for step in 0..400 {
        let choice = stream.next_word()[1] % 10;
        if choice < 5 || keys.is_empty() {
            let key = stream.next_word();
            let value = stream.next_value();
            trie.update(&key, &value).unwrap();
            reference.insert(&key, value);
            keys.push(key);
        } else if choice < 8 {
            // Overwrite an existing key.
            let key = keys[stream.next_word()[2] as usize % keys.len()];
            let value = stream.next_value();
            trie.update(&key, &value).unwrap();
            reference.insert(&key, value);
        } else {
            let key = keys.swap_remove(stream.next_word()[3] as usize % keys.len());
            trie.remove(&key).unwrap();
            reference.remove(&key);
        }

        if step % 40 == 0 {
            assert_eq!(
                trie.hash().unwrap(),
                reference.root_hash(),
                "divergence at step {step}"
            );
        }
    }
    assert_eq!(trie.hash().unwrap(), reference.root_hash());

    // Reads agree with the reference map as well.
    for key in &keys {
        assert_eq!(
            trie.get(key).unwrap().as_deref(),
            reference.get(key),
            "value mismatch for a surviving key"
        );
    }
}

#[test]
fn property_removing_everything_restores_empty_root() {
    let mut stream = KeyStream::new(3);
    let mut trie = new_trie();
    let mut keys = Vec::new();

    for _ in 0..60 {
        let key = stream.next_word();
        trie.update(&key, &[0x42]).unwrap();
        keys.push(key);
    }
    for key in &keys {
        trie.remove(key).unwrap();
    }
    assert_eq!(trie.hash().unwrap(), EMPTY_ROOT);
}

#[test]
fn property_update_is_idempotent() {
    let mut stream = KeyStream::new(4);
    let mut trie = new_trie();

    for _ in 0..50 {
        let key = stream.next_word();
        let value = stream.next_value();
        trie.update(&key, &value).unwrap();
        let once = trie.hash().unwrap();
        trie.update(&key, &value).unwrap();
        assert_eq!(trie.hash().unwrap(), once);
    }
}

#[test]
fn property_commit_preserves_the_hash() {
    let mut stream = KeyStream::new(5);
    let db: Arc<MemoryStore> = Arc::new(MemoryStore::new());
    let mut trie = VersionedTrie::new_empty(STATE_PREFIX.to_vec(), db.clone(), 0);
    let mut reference = ReferenceTrie::new();

    for _ in 0..120 {
        let key = stream.next_word();
        let value = stream.next_value();
        trie.update(&key, &value).unwrap();
        reference.insert(&key, value);
    }
    let in_memory = trie.hash().unwrap();
    let committed = trie.commit().unwrap();
    assert_eq!(in_memory, committed);
    assert_eq!(committed, reference.root_hash());

    // A reopened trie answers every key identically.
    let reopened =
        VersionedTrie::open(STATE_PREFIX.to_vec(), db, committed, 1).unwrap();
    for (key, value) in reference.iter() {
        assert_eq!(reopened.get(key).unwrap().as_deref(), Some(value));
    }
}

#[test]
fn property_version_snapshots_are_exact() {
    let mut stream = KeyStream::new(6);
    let db: Arc<MemoryStore> = Arc::new(MemoryStore::new());
    let mut trie = VersionedTrie::new_empty(STATE_PREFIX.to_vec(), db.clone(), 0);
    let mut reference = ReferenceTrie::new();
    let mut snapshots: Vec<(H256, u32, Vec<([u8; 32], Option<Vec<u8>>)>)> = Vec::new();
    let mut keys: Vec<[u8; 32]> = Vec::new();

    for version in 1..=6u32 {
        for _ in 0..25 {
            let key = stream.next_word();
            let value = stream.next_value();
            trie.update(&key, &value).unwrap();
            reference.insert(&key, value);
            keys.push(key);
        }
        if version > 1 {
            // Remove a handful of still-present keys.
            for _ in 0..6 {
                let key = keys.swap_remove(stream.next_word()[4] as usize % keys.len());
                trie.remove(&key).unwrap();
                reference.remove(&key);
                keys.push(key); // keep probing it in later snapshots
            }
        }
        let root = trie.commit().unwrap();
        let expectations = keys
            .iter()
            .map(|key| (*key, reference.get(key).map(|v| v.to_vec())))
            .collect();
        snapshots.push((root, version, expectations));
    }

    // Every snapshot reproduces exactly the values of its version,
    // including "not present" answers for keys removed by then.
    for (root, version, expectations) in &snapshots {
        let snapshot =
            VersionedTrie::open(STATE_PREFIX.to_vec(), db.clone(), *root, *version).unwrap();
        for (key, expected) in expectations {
            assert_eq!(
                snapshot.get(key).unwrap(),
                *expected,
                "wrong answer at version {version}"
            );
        }
    }
}

/// Structural audit: no branch may be left with fewer than two living
/// children, and a branch's own prefix subsumes what would otherwise be an
/// extension node.
fn audit_shape(node: &Node) {
    match node {
        Node::Branch(branch) => {
            assert!(
                branch.living_count() >= 2,
                "branch with {} living children survived",
                branch.living_count()
            );
            for child in &branch.children {
                audit_shape(child);
            }
        }
        Node::Overlay(overlay) => audit_shape(&overlay.inner),
        _ => {}
    }
}

#[test]
fn property_no_degenerate_branches_after_churn() {
    let mut stream = KeyStream::new(7);
    let mut trie = new_trie();
    let mut keys = Vec::new();

    for _ in 0..150 {
        let key = stream.next_word();
        trie.update(&key, &[0x01, 0x02]).unwrap();
        keys.push(key);
    }
    for _ in 0..120 {
        let key = keys.swap_remove(stream.next_word()[5] as usize % keys.len());
        trie.remove(&key).unwrap();
        audit_shape(trie.root());
    }
}
