//! Backing store contract and its in-memory realization.
//!
//! The engine only requires an ordered byte-addressed store with point
//! reads, atomic batches, and bidirectional range iteration. Anything
//! satisfying [`KeyValueStore`] can back a trie; [`MemoryStore`] is the
//! reference realization over a `BTreeMap`, with a flat-file load/save pair
//! so snapshot tooling can round-trip a store through disk.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use parking_lot::RwLock;

use super::StoreError;

/// A buffered group of mutations applied atomically by
/// [`KeyValueStore::write`].
#[derive(Debug, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

#[derive(Debug)]
enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push(BatchOp::Put { key, value });
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.ops.push(BatchOp::Delete { key });
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// A positioned cursor over a key range.
///
/// A fresh iterator is unpositioned; call `first`/`last` or `next`/`prev`
/// before reading `key`/`value`. The positioning calls return whether the
/// cursor landed on an entry. Dropping the iterator releases it.
pub trait StoreIterator {
    fn first(&mut self) -> bool;
    fn last(&mut self) -> bool;
    fn next(&mut self) -> bool;
    fn prev(&mut self) -> bool;

    /// # Panics
    /// May panic while the cursor is unpositioned.
    fn key(&self) -> &[u8];
    fn value(&self) -> &[u8];
}

/// An ordered byte-addressed store. Keys compare lexicographically; no
/// schema is imposed.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;
    fn delete(&self, key: &[u8]) -> Result<(), StoreError>;

    /// Applies every mutation in `batch`, all or nothing.
    fn write(&self, batch: WriteBatch) -> Result<(), StoreError>;

    /// Iterates `start..end` (end exclusive).
    fn iter_range(
        &self,
        start: &[u8],
        end: &[u8],
    ) -> Result<Box<dyn StoreIterator + '_>, StoreError>;
}

/// In-memory ordered store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }

    /// Reads a store back from the flat record file written by
    /// [`MemoryStore::write_to`].
    pub fn read_from(path: &Path) -> Result<Self, StoreError> {
        let file = File::open(path).map_err(|e| StoreError::Backend(e.to_string()))?;
        let mut reader = BufReader::new(file);
        let mut map = BTreeMap::new();
        loop {
            let key = match read_record(&mut reader)? {
                Some(key) => key,
                None => break,
            };
            let value = read_record(&mut reader)?
                .ok_or_else(|| StoreError::Backend("record file ends mid-entry".into()))?;
            map.insert(key, value);
        }
        Ok(Self {
            map: RwLock::new(map),
        })
    }

    /// Writes every entry to `path` as length-prefixed records.
    pub fn write_to(&self, path: &Path) -> Result<(), StoreError> {
        let file = File::create(path).map_err(|e| StoreError::Backend(e.to_string()))?;
        let mut writer = BufWriter::new(file);
        for (key, value) in self.map.read().iter() {
            write_record(&mut writer, key)?;
            write_record(&mut writer, value)?;
        }
        writer
            .flush()
            .map_err(|e| StoreError::Backend(e.to_string()))
    }
}

fn read_record(reader: &mut impl Read) -> Result<Option<Vec<u8>>, StoreError> {
    let mut len = [0u8; 4];
    match reader.read_exact(&mut len) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(StoreError::Backend(e.to_string())),
    }
    let mut data = vec![0u8; u32::from_be_bytes(len) as usize];
    reader
        .read_exact(&mut data)
        .map_err(|e| StoreError::Backend(e.to_string()))?;
    Ok(Some(data))
}

fn write_record(writer: &mut impl Write, data: &[u8]) -> Result<(), StoreError> {
    writer
        .write_all(&(data.len() as u32).to_be_bytes())
        .and_then(|_| writer.write_all(data))
        .map_err(|e| StoreError::Backend(e.to_string()))
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.map.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.map.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        self.map.write().remove(key);
        Ok(())
    }

    fn write(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut map = self.map.write();
        for op in batch.ops {
            match op {
                BatchOp::Put { key, value } => {
                    map.insert(key, value);
                }
                BatchOp::Delete { key } => {
                    map.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn iter_range(
        &self,
        start: &[u8],
        end: &[u8],
    ) -> Result<Box<dyn StoreIterator + '_>, StoreError> {
        // Materializes the range; the cursor then works over a stable
        // snapshot independent of later writes.
        let entries: Vec<(Vec<u8>, Vec<u8>)> = if start < end {
            self.map
                .read()
                .range(start.to_vec()..end.to_vec())
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        } else {
            Vec::new()
        };
        Ok(Box::new(SnapshotIterator {
            entries,
            pos: Position::BeforeFirst,
        }))
    }
}

enum Position {
    BeforeFirst,
    At(usize),
    AfterLast,
}

struct SnapshotIterator {
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    pos: Position,
}

impl SnapshotIterator {
    fn current(&self) -> &(Vec<u8>, Vec<u8>) {
        match self.pos {
            Position::At(i) => &self.entries[i],
            _ => panic!("iterator is not positioned"),
        }
    }
}

impl StoreIterator for SnapshotIterator {
    fn first(&mut self) -> bool {
        if self.entries.is_empty() {
            self.pos = Position::AfterLast;
            return false;
        }
        self.pos = Position::At(0);
        true
    }

    fn last(&mut self) -> bool {
        if self.entries.is_empty() {
            self.pos = Position::BeforeFirst;
            return false;
        }
        self.pos = Position::At(self.entries.len() - 1);
        true
    }

    fn next(&mut self) -> bool {
        match self.pos {
            Position::BeforeFirst => self.first(),
            Position::At(i) if i + 1 < self.entries.len() => {
                self.pos = Position::At(i + 1);
                true
            }
            Position::At(_) | Position::AfterLast => {
                self.pos = Position::AfterLast;
                false
            }
        }
    }

    fn prev(&mut self) -> bool {
        match self.pos {
            Position::AfterLast => self.last(),
            Position::At(i) if i > 0 => {
                self.pos = Position::At(i - 1);
                true
            }
            Position::At(_) | Position::BeforeFirst => {
                self.pos = Position::BeforeFirst;
                false
            }
        }
    }

    fn key(&self) -> &[u8] {
        &self.current().0
    }

    fn value(&self) -> &[u8] {
        &self.current().1
    }
}
