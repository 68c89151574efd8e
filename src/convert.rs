//! One-shot migration of a classical trie into the versioned layout.
//!
//! Walks a [`ReferenceTrie`]'s structural nodes, folding each extension
//! into the full node it wraps and tagging everything as version 0, then
//! finalizes the converted tree straight into a [`Collection`]. An optional
//! callback observes every migrated leaf, which chain tooling uses to chase
//! per-account storage roots.

use primitive_types::H256;
use thiserror::Error;

use crate::data::{Nibbles, KEY_NIBBLES, TERMINATOR};
use crate::merkle::{Node, RefNode, ReferenceTrie, BRANCH_WIDTH, EMPTY_ROOT};
use crate::store::{Collection, Finalizer, StoreError};

/// Version every migrated record is tagged with.
const MIGRATED_VERSION: u32 = 0;

#[derive(Error, Debug)]
pub enum ConvertError {
    /// The source trie stored a value on an interior path, which a
    /// fixed-width trie cannot represent.
    #[error("branch value at depth {0}; only fixed-width keys can be migrated")]
    ValueOnInteriorPath(usize),

    /// A leaf terminated at the wrong depth for 32-byte keys.
    #[error("leaf spans {0} nibbles; only 32-byte keys can be migrated")]
    WrongKeyWidth(usize),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Observes each migrated (key, value) pair.
pub type OnLeaf<'a> = &'a mut dyn FnMut(&[u8], &[u8]);

/// Migrates `source` into `storage` at version 0, returning the root hash
/// of the migrated trie. The hash equals `source.root_hash()`.
pub fn migrate_reference_trie(
    source: &ReferenceTrie,
    storage: &Collection,
    mut on_leaf: Option<OnLeaf<'_>>,
) -> Result<H256, ConvertError> {
    let Some(structural) = source.structural_root() else {
        return Ok(EMPTY_ROOT);
    };
    let converted = convert(&structural, &Nibbles::new(), 0, &mut on_leaf)?;
    Ok(Finalizer::new(storage).finalize(&converted, &Nibbles::new(), true)?)
}

fn convert(
    node: &RefNode,
    path: &Nibbles,
    depth: usize,
    on_leaf: &mut Option<OnLeaf<'_>>,
) -> Result<Node, ConvertError> {
    match node {
        RefNode::Leaf { path: rest, value } => {
            let mut prefix = rest.clone();
            prefix.push(TERMINATOR);
            if depth + rest.len() + 1 != KEY_NIBBLES {
                return Err(ConvertError::WrongKeyWidth(depth + rest.len()));
            }
            if let Some(callback) = on_leaf.as_mut() {
                let full = path.join(&Nibbles::from_nibbles(&prefix));
                callback(&full.pack(), value);
            }
            Ok(Node::leaf(
                Nibbles::from_nibbles(&prefix),
                value.clone(),
                MIGRATED_VERSION,
            ))
        }
        RefNode::Extension { prefix, child } => {
            let RefNode::Branch { children, value } = child.as_ref() else {
                return Err(ConvertError::ValueOnInteriorPath(depth));
            };
            if value.is_some() {
                return Err(ConvertError::ValueOnInteriorPath(depth));
            }
            let below = path.join(&Nibbles::from_nibbles(prefix));
            let converted =
                convert_children(children, &below, depth + prefix.len(), on_leaf)?;
            Ok(Node::branch(
                Nibbles::from_nibbles(prefix),
                converted,
                MIGRATED_VERSION,
            ))
        }
        RefNode::Branch { children, value } => {
            if value.is_some() {
                return Err(ConvertError::ValueOnInteriorPath(depth));
            }
            let converted = convert_children(children, path, depth, on_leaf)?;
            Ok(Node::branch(Nibbles::new(), converted, MIGRATED_VERSION))
        }
    }
}

fn convert_children(
    children: &[Option<RefNode>; BRANCH_WIDTH],
    path: &Nibbles,
    depth: usize,
    on_leaf: &mut Option<OnLeaf<'_>>,
) -> Result<[Node; BRANCH_WIDTH], ConvertError> {
    let mut converted: [Node; BRANCH_WIDTH] = Default::default();
    for (radix, child) in children.iter().enumerate() {
        if let Some(child) = child {
            converted[radix] =
                convert(child, &path.child(radix as u8), depth + 1, on_leaf)?;
        }
    }
    Ok(converted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merkle::keccak256;
    use crate::store::MemoryStore;
    use crate::trie::VersionedTrie;
    use std::sync::Arc;

    #[test]
    fn test_empty_source_yields_empty_root() {
        let storage = Collection::new(b"m".to_vec(), Arc::new(MemoryStore::new()));
        let hash = migrate_reference_trie(&ReferenceTrie::new(), &storage, None).unwrap();
        assert_eq!(hash, EMPTY_ROOT);
    }

    #[test]
    fn test_migrated_trie_is_openable_and_readable() {
        let mut source = ReferenceTrie::new();
        let mut keys = Vec::new();
        for i in 0..40u32 {
            let key = keccak256(&i.to_be_bytes());
            source.insert(key.as_bytes(), vec![(i + 1) as u8; 3]);
            keys.push(key);
        }
        let expected = source.root_hash();

        let db: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let storage = Collection::new(b"m".to_vec(), db.clone());
        let migrated = migrate_reference_trie(&source, &storage, None).unwrap();
        assert_eq!(migrated, expected);

        let trie =
            VersionedTrie::open(b"m".to_vec(), db, expected, MIGRATED_VERSION).unwrap();
        for (i, key) in keys.iter().enumerate() {
            assert_eq!(
                trie.get(key.as_bytes()).unwrap(),
                Some(vec![(i + 1) as u8; 3])
            );
        }
    }

    #[test]
    fn test_callback_sees_every_leaf() {
        let mut source = ReferenceTrie::new();
        for i in 0..10u32 {
            let key = keccak256(&i.to_be_bytes());
            source.insert(key.as_bytes(), vec![0x10 + i as u8]);
        }

        let storage = Collection::new(b"m".to_vec(), Arc::new(MemoryStore::new()));
        let mut seen = Vec::new();
        let mut callback = |key: &[u8], value: &[u8]| {
            seen.push((key.to_vec(), value.to_vec()));
        };
        migrate_reference_trie(&source, &storage, Some(&mut callback)).unwrap();

        assert_eq!(seen.len(), 10);
        for (key, value) in seen {
            assert_eq!(source.get(&key), Some(value.as_slice()));
        }
    }

    #[test]
    fn test_variable_width_source_is_rejected() {
        let mut source = ReferenceTrie::new();
        source.insert(b"short", vec![0x01]);
        let storage = Collection::new(b"m".to_vec(), Arc::new(MemoryStore::new()));
        let err = migrate_reference_trie(&source, &storage, None).unwrap_err();
        assert!(matches!(err, ConvertError::WrongKeyWidth(_)));
    }
}
