//! Append-only numbered blob log.
//!
//! Two files back the log: `INDEX` holds fixed 16-byte records of
//! `{offset: u64be, length: u64be}`, and `DATA` holds the concatenated
//! payloads. Items are appended at the tail and addressed by position;
//! truncation drops items from the tail. Reads and writes go through one
//! lock, so a log handle can be shared across threads.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use thiserror::Error;

const INDEX_FILE: &str = "INDEX";
const DATA_FILE: &str = "DATA";

/// Size of one serialized index entry.
const INDEX_ENTRY_LEN: u64 = 16;

#[derive(Error, Debug)]
pub enum BlobLogError {
    /// An access or truncation beyond the current item count.
    #[error("position out of range ({position} >= {items})")]
    OutOfRange { position: u64, items: u64 },

    #[error("blob log io: {0}")]
    Io(#[from] io::Error),
}

/// Metadata of one stored item.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct IndexEntry {
    offset: u64,
    length: u64,
}

impl IndexEntry {
    fn decode(bytes: &[u8; 16]) -> Self {
        Self {
            offset: u64::from_be_bytes(bytes[..8].try_into().expect("8-byte offset")),
            length: u64::from_be_bytes(bytes[8..].try_into().expect("8-byte length")),
        }
    }

    fn encode(&self) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&self.offset.to_be_bytes());
        bytes[8..].copy_from_slice(&self.length.to_be_bytes());
        bytes
    }
}

struct Inner {
    index: File,
    data: File,
    items: u64,
}

/// An append-only store of numbered binary items.
pub struct BlobLog {
    path: PathBuf,
    inner: RwLock<Inner>,
}

impl BlobLog {
    /// Opens (creating if needed) the log named `name` under `dir`. The
    /// item count is recovered from the index file's size.
    pub fn open(dir: &Path, name: &str) -> Result<Self, BlobLogError> {
        let path = dir.join(name);
        std::fs::create_dir_all(&path)?;

        let index = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path.join(INDEX_FILE))?;
        let data = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path.join(DATA_FILE))?;

        let items = index.metadata()?.len() / INDEX_ENTRY_LEN;
        Ok(Self {
            path,
            inner: RwLock::new(Inner { index, data, items }),
        })
    }

    /// Appends `bytes` as a new item and returns its position.
    pub fn append(&self, bytes: &[u8]) -> Result<u64, BlobLogError> {
        let mut inner = self.inner.write();
        let offset = inner.data.metadata()?.len();

        use io::Write;
        inner.data.write_all(bytes)?;
        let entry = IndexEntry {
            offset,
            length: bytes.len() as u64,
        };
        inner.index.write_all(&entry.encode())?;

        let position = inner.items;
        inner.items += 1;
        Ok(position)
    }

    /// Retrieves the item stored at `position`.
    pub fn get(&self, position: u64) -> Result<Vec<u8>, BlobLogError> {
        let inner = self.inner.read();
        if position >= inner.items {
            return Err(BlobLogError::OutOfRange {
                position,
                items: inner.items,
            });
        }

        let entry = read_entry(&inner.index, position)?;
        let mut bytes = vec![0u8; entry.length as usize];
        inner.data.read_exact_at(&mut bytes, entry.offset)?;
        Ok(bytes)
    }

    /// Shortens the log to `len` items. Truncating at or beyond the current
    /// length is an error.
    pub fn truncate(&self, len: u64) -> Result<(), BlobLogError> {
        let mut inner = self.inner.write();
        if len >= inner.items {
            return Err(BlobLogError::OutOfRange {
                position: len,
                items: inner.items,
            });
        }

        let data_len = if len == 0 {
            0
        } else {
            let last = read_entry(&inner.index, len - 1)?;
            last.offset + last.length
        };
        inner.index.set_len(len * INDEX_ENTRY_LEN)?;
        inner.data.set_len(data_len)?;
        inner.items = len;
        Ok(())
    }

    /// Number of items currently stored.
    pub fn items(&self) -> u64 {
        self.inner.read().items
    }

    /// The directory holding the log's files.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flushes both files to stable storage.
    pub fn sync(&self) -> Result<(), BlobLogError> {
        let inner = self.inner.write();
        inner.index.sync_all()?;
        inner.data.sync_all()?;
        Ok(())
    }
}

fn read_entry(index: &File, position: u64) -> Result<IndexEntry, BlobLogError> {
    let mut bytes = [0u8; 16];
    index.read_exact_at(&mut bytes, position * INDEX_ENTRY_LEN)?;
    Ok(IndexEntry::decode(&bytes))
}
