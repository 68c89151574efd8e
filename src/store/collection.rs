//! Typed record storage over the backing key-value store.
//!
//! Records live in two namespaces distinguished by one byte after the
//! collection's own prefix: `n` for structural node records, `v` for value
//! records. Distinct prefixes let the account-state trie and per-account
//! storage tries share one underlying store without interfering.

use std::sync::Arc;

use tracing::debug;

use super::decode::decode_record;
use super::key::StorageKey;
use super::kv::{KeyValueStore, StoreIterator, WriteBatch};
use super::StoreError;
use crate::data::Nibbles;
use crate::merkle::{LeafNode, Node, TOMBSTONE};

const NODE_NAMESPACE: u8 = b'n';
const VALUE_NAMESPACE: u8 = b'v';

/// A prefixed, two-namespace view of a backing store holding one trie's
/// records.
pub struct Collection {
    prefix: Vec<u8>,
    db: Arc<dyn KeyValueStore>,
}

impl Collection {
    /// Creates a collection under `prefix`; an empty prefix is fine as long
    /// as no other collection shares the store.
    pub fn new(prefix: Vec<u8>, db: Arc<dyn KeyValueStore>) -> Self {
        Self { prefix, db }
    }

    fn namespaced(&self, namespace: u8, key: &[u8]) -> Vec<u8> {
        let mut full = Vec::with_capacity(self.prefix.len() + 1 + key.len());
        full.extend_from_slice(&self.prefix);
        full.push(namespace);
        full.extend_from_slice(key);
        full
    }

    /// Strips the collection prefix and namespace byte off a raw store key.
    fn strip<'k>(&self, raw: &'k [u8]) -> &'k [u8] {
        &raw[self.prefix.len() + 1..]
    }

    /// Stages a structural node record.
    pub fn stage_node(&self, batch: &mut WriteBatch, path: &Nibbles, version: u32, bytes: &[u8]) {
        let key = StorageKey::new(path, version);
        batch.put(self.namespaced(NODE_NAMESPACE, key.as_bytes()), bytes.to_vec());
    }

    /// Stages a value record; the bytes may be the reserved tombstone.
    pub fn stage_value(&self, batch: &mut WriteBatch, path: &Nibbles, version: u32, bytes: &[u8]) {
        let key = StorageKey::new(path, version);
        batch.put(
            self.namespaced(VALUE_NAMESPACE, key.as_bytes()),
            bytes.to_vec(),
        );
    }

    /// Atomically applies a staged batch.
    pub fn write(&self, batch: WriteBatch) -> Result<(), StoreError> {
        self.db.write(batch)
    }

    /// Iterates the inclusive key range of one namespace.
    fn range(
        &self,
        namespace: u8,
        start: &StorageKey,
        end: &StorageKey,
    ) -> Result<Box<dyn StoreIterator + '_>, StoreError> {
        // One zero byte past the end key makes the range inclusive.
        let mut limit = end.as_bytes().to_vec();
        limit.push(0);
        self.db.iter_range(
            &self.namespaced(namespace, start.as_bytes()),
            &self.namespaced(namespace, &limit),
        )
    }

    /// Iterates structural node records between two keys, inclusive. The
    /// cursor yields raw store keys; the collection prefix and namespace
    /// byte precede the storage-key bytes.
    pub fn scan_nodes(
        &self,
        start: &StorageKey,
        end: &StorageKey,
    ) -> Result<Box<dyn StoreIterator + '_>, StoreError> {
        self.range(NODE_NAMESPACE, start, end)
    }

    /// Iterates value records between two keys, inclusive, with the same
    /// raw-key convention as [`Collection::scan_nodes`].
    pub fn scan_values(
        &self,
        start: &StorageKey,
        end: &StorageKey,
    ) -> Result<Box<dyn StoreIterator + '_>, StoreError> {
        self.range(VALUE_NAMESPACE, start, end)
    }

    /// Point-loads and decodes the node stored at exactly (path, version).
    pub fn load_node(&self, path: &Nibbles, version: u32) -> Result<Node, StoreError> {
        let key = StorageKey::new(path, version);
        let raw = self
            .db
            .get(&self.namespaced(NODE_NAMESPACE, key.as_bytes()))?
            .ok_or_else(|| StoreError::MissingNode {
                path: path.to_string(),
                version,
            })?;
        decode_record(&raw, version)
    }

    /// Reverse-scans the root slot for the newest root at or below
    /// `max_version`. Longer-path records fall inside the scanned byte
    /// range, so keys are filtered down to the empty path.
    pub fn load_latest_root(&self, max_version: u32) -> Result<(Node, u32), StoreError> {
        let root = Nibbles::new();
        let start = StorageKey::new(&root, 0);
        let end = StorageKey::new(&root, max_version);
        let root_key_len = start.as_bytes().len();

        let mut it = self.scan_nodes(&start, &end)?;
        let mut positioned = it.last();
        while positioned {
            let key = self.strip(it.key());
            if key.len() == root_key_len {
                let storage_key = StorageKey::from_bytes(key);
                let version = storage_key.version();
                let node = decode_record(it.value(), version)?;
                return Ok((node, version));
            }
            positioned = it.prev();
        }
        Err(StoreError::MissingRoot(max_version))
    }

    /// Loads the leaf whose value record sits under `prefix` at exactly
    /// `version`, skipping tombstones. The returned leaf's prefix is
    /// relative to the queried prefix.
    pub fn load_leaf(&self, prefix: &Nibbles, version: u32) -> Result<LeafNode, StoreError> {
        let start = StorageKey::new(&prefix.fill_remaining(0x00), version);
        let end = StorageKey::new(&prefix.fill_remaining(0x0f), version);

        let mut it = self.scan_values(&start, &end)?;
        let mut positioned = it.last();
        while positioned {
            let storage_key = StorageKey::from_bytes(self.strip(it.key()));
            if storage_key.version() == version && it.value() != TOMBSTONE {
                return Ok(LeafNode {
                    prefix: storage_key.relative_path(prefix.len()),
                    value: it.value().to_vec(),
                    version,
                });
            }
            positioned = it.prev();
        }
        Err(StoreError::MissingLeaf {
            prefix: prefix.to_string(),
            version,
        })
    }

    /// The newest value record at exactly `path`, at or below `max_version`.
    /// Tombstones are returned as-is; absence means the path never held a
    /// value in that range.
    pub fn load_latest_value(
        &self,
        path: &Nibbles,
        max_version: u32,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        if !path.has_term() {
            return Err(StoreError::BadRecord(format!(
                "value path {path} lacks a terminator"
            )));
        }
        let start = StorageKey::new(path, 0);
        let end = StorageKey::new(path, max_version);
        let mut it = self.scan_values(&start, &end)?;
        if !it.last() {
            return Ok(None);
        }
        Ok(Some(it.value().to_vec()))
    }

    /// Collects the newest live value at or below `max_version` for every
    /// path in the value namespace. Paths whose newest record is a
    /// tombstone are omitted.
    pub fn latest_values(&self, max_version: u32) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let mut it = self.namespace_iter(VALUE_NAMESPACE)?;
        let mut out: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
        let mut current: Option<(Vec<u8>, Option<Vec<u8>>)> = None;

        let mut positioned = it.first();
        while positioned {
            let storage_key = StorageKey::from_bytes(self.strip(it.key()));
            let packed = storage_key.packed_path().to_vec();
            if current.as_ref().map(|(path, _)| path != &packed) == Some(true) {
                if let Some((path, Some(value))) = current.take() {
                    out.push((path, value));
                }
            }
            let newest = storage_key.version() <= max_version;
            let entry = current.get_or_insert_with(|| (packed.clone(), None));
            if newest {
                entry.1 = (it.value() != TOMBSTONE).then(|| it.value().to_vec());
            }
            positioned = it.next();
        }
        if let Some((path, Some(value))) = current {
            out.push((path, value));
        }
        Ok(out)
    }

    fn namespace_iter(&self, namespace: u8) -> Result<Box<dyn StoreIterator + '_>, StoreError> {
        let start = self.namespaced(namespace, &[]);
        let end = self.namespaced(namespace + 1, &[]);
        self.db.iter_range(&start, &end)
    }

    /// Removes records made obsolete by newer versions.
    ///
    /// Walks each namespace in key order keeping a stack of candidates:
    /// records below `threshold` whose (path, odd-flag) slot may still be
    /// overwritten. A later record in the identical slot deletes the
    /// candidate. A record below the threshold with no successor survives,
    /// so opening any version at or above the threshold keeps working.
    pub fn prune(&self, threshold: u32) -> Result<usize, StoreError> {
        let mut batch = WriteBatch::new();
        for namespace in [NODE_NAMESPACE, VALUE_NAMESPACE] {
            self.prune_namespace(namespace, threshold, &mut batch)?;
        }
        let removed = batch.len();
        debug!(removed, threshold, "pruned obsolete records");
        self.write(batch)?;
        Ok(removed)
    }

    fn prune_namespace(
        &self,
        namespace: u8,
        threshold: u32,
        batch: &mut WriteBatch,
    ) -> Result<(), StoreError> {
        let mut candidates: Vec<Vec<u8>> = Vec::new();
        let mut it = self.namespace_iter(namespace)?;
        let mut positioned = it.first();
        while positioned {
            let raw = it.key().to_vec();
            let current = StorageKey::from_bytes(self.strip(&raw));

            while let Some(last_raw) = candidates.last() {
                let last = StorageKey::from_bytes(self.strip(last_raw));
                if current.path_and_flag() == last.path_and_flag() {
                    // A newer record in the same slot supersedes it.
                    if let Some(obsolete) = candidates.pop() {
                        batch.delete(obsolete);
                    }
                } else if current.path_and_flag().starts_with(last.path_and_flag()) {
                    // Still inside the candidate's subtree; a same-slot
                    // successor may yet appear.
                    break;
                } else {
                    // The scan moved past the slot; the record stays.
                    candidates.pop();
                }
            }

            if current.version() < threshold {
                candidates.push(raw);
            }
            positioned = it.next();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::kv::MemoryStore;

    fn collection_on(db: Arc<MemoryStore>) -> Collection {
        Collection::new(b"s".to_vec(), db)
    }

    fn value_path(byte: u8) -> Nibbles {
        Nibbles::from_key(&[byte; 32])
    }

    fn put_value(c: &Collection, path: &Nibbles, version: u32, bytes: &[u8]) {
        let mut batch = WriteBatch::new();
        c.stage_value(&mut batch, path, version, bytes);
        c.write(batch).unwrap();
    }

    #[test]
    fn test_latest_value_respects_version_ceiling() {
        let db = Arc::new(MemoryStore::new());
        let c = collection_on(db);
        let path = value_path(0xaa);
        put_value(&c, &path, 1, &[0x01]);
        put_value(&c, &path, 3, &[0x03]);

        assert_eq!(c.load_latest_value(&path, 1).unwrap(), Some(vec![0x01]));
        assert_eq!(c.load_latest_value(&path, 2).unwrap(), Some(vec![0x01]));
        assert_eq!(c.load_latest_value(&path, 9).unwrap(), Some(vec![0x03]));
        assert_eq!(c.load_latest_value(&value_path(0xbb), 9).unwrap(), None);
    }

    #[test]
    fn test_latest_value_requires_terminator() {
        let db = Arc::new(MemoryStore::new());
        let c = collection_on(db);
        let err = c
            .load_latest_value(&Nibbles::from_nibbles(&[1, 2]), 1)
            .unwrap_err();
        assert!(matches!(err, StoreError::BadRecord(_)));
    }

    #[test]
    fn test_load_leaf_skips_tombstones() {
        let db = Arc::new(MemoryStore::new());
        let c = collection_on(db);
        let live = value_path(0x11);
        let dead = value_path(0x1f);
        put_value(&c, &live, 2, &[0x42]);
        put_value(&c, &dead, 2, TOMBSTONE);

        // Both paths share the first nibble.
        let prefix = Nibbles::from_nibbles(&[0x1]);
        let leaf = c.load_leaf(&prefix, 2).unwrap();
        assert_eq!(leaf.value, vec![0x42]);
        assert_eq!(leaf.prefix, live.suffix(1));
        assert_eq!(leaf.version, 2);

        // Nothing at another version.
        assert!(c.load_leaf(&prefix, 3).is_err());
    }

    #[test]
    fn test_latest_values_filters_and_dedups() {
        let db = Arc::new(MemoryStore::new());
        let c = collection_on(db);
        let a = value_path(0x01);
        let b = value_path(0x02);
        let d = value_path(0x03);
        put_value(&c, &a, 1, &[0xa1]);
        put_value(&c, &a, 2, &[0xa2]);
        put_value(&c, &b, 1, &[0xb1]);
        put_value(&c, &b, 2, TOMBSTONE);
        put_value(&c, &d, 3, &[0xd3]);

        let at2 = c.latest_values(2).unwrap();
        assert_eq!(at2.len(), 1);
        assert_eq!(at2[0].0, vec![0x01; 32]);
        assert_eq!(at2[0].1, vec![0xa2]);

        let at1 = c.latest_values(1).unwrap();
        assert_eq!(at1.len(), 2);

        let at3 = c.latest_values(3).unwrap();
        assert_eq!(at3.len(), 2);
    }

    #[test]
    fn test_prune_deletes_only_superseded_records() {
        let db = Arc::new(MemoryStore::new());
        let c = collection_on(db.clone());
        let a = value_path(0x01);
        let b = value_path(0x02);
        put_value(&c, &a, 1, &[0xa1]);
        put_value(&c, &a, 2, &[0xa2]);
        put_value(&c, &b, 1, &[0xb1]);

        let removed = c.prune(2).unwrap();
        assert_eq!(removed, 1);

        // a@1 was superseded by a@2 and is gone; b@1 has no successor and
        // survives even though it is below the threshold.
        assert_eq!(c.load_latest_value(&a, 1).unwrap(), None);
        assert_eq!(c.load_latest_value(&a, 2).unwrap(), Some(vec![0xa2]));
        assert_eq!(c.load_latest_value(&b, 5).unwrap(), Some(vec![0xb1]));
    }

    #[test]
    fn test_prune_ignores_records_at_or_above_threshold() {
        let db = Arc::new(MemoryStore::new());
        let c = collection_on(db);
        let a = value_path(0x01);
        put_value(&c, &a, 5, &[0x05]);
        put_value(&c, &a, 6, &[0x06]);
        assert_eq!(c.prune(5).unwrap(), 0);
        assert_eq!(c.load_latest_value(&a, 5).unwrap(), Some(vec![0x05]));
    }

    #[test]
    fn test_collections_with_distinct_prefixes_are_isolated() {
        let db = Arc::new(MemoryStore::new());
        let left = Collection::new(b"L".to_vec(), db.clone());
        let right = Collection::new(b"R".to_vec(), db);
        let path = value_path(0x77);
        put_value(&left, &path, 1, &[0x01]);

        assert_eq!(left.load_latest_value(&path, 1).unwrap(), Some(vec![0x01]));
        assert_eq!(right.load_latest_value(&path, 1).unwrap(), None);
    }
}
