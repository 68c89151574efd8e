//! Composite storage keys.
//!
//! A record's key packs its nibble path followed by five bytes of metadata:
//! a one-byte odd-length flag and the 4-byte big-endian version. With that
//! layout, keys at the same path sort by version, and the packed paths keep
//! records of a subtree clustered in the store. Odd-length paths are padded
//! with a zero nibble; the flag byte keeps them distinct from the even
//! paths sharing the same packed bytes.

use crate::data::Nibbles;

/// Width of the metadata suffix: odd flag plus version.
const SUFFIX_LEN: usize = 5;

/// A fully encoded storage key.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct StorageKey(Vec<u8>);

impl StorageKey {
    /// Builds the key for a node or value at `path` and `version`. A
    /// trailing terminator is dropped before packing.
    pub fn new(path: &Nibbles, version: u32) -> Self {
        let nibbles = path.without_term();
        let odd = nibbles.len() % 2 == 1;
        let mut bytes = Vec::with_capacity(nibbles.len() / 2 + 1 + SUFFIX_LEN);
        let mut pairs = nibbles.chunks_exact(2);
        for pair in &mut pairs {
            bytes.push((pair[0] << 4) | pair[1]);
        }
        if let [last] = pairs.remainder() {
            bytes.push(last << 4);
        }
        bytes.push(odd as u8);
        bytes.extend_from_slice(&version.to_be_bytes());
        Self(bytes)
    }

    /// Reinterprets raw store bytes as a storage key.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        debug_assert!(bytes.len() >= SUFFIX_LEN);
        Self(bytes.to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// The version from the last four bytes.
    pub fn version(&self) -> u32 {
        let at = self.0.len() - 4;
        u32::from_be_bytes(self.0[at..].try_into().expect("4-byte version suffix"))
    }

    /// Whether the path had an odd nibble count.
    pub fn is_odd(&self) -> bool {
        self.0[self.0.len() - SUFFIX_LEN] == 1
    }

    /// The packed path bytes, metadata excluded.
    pub fn packed_path(&self) -> &[u8] {
        &self.0[..self.0.len() - SUFFIX_LEN]
    }

    /// The path plus the odd flag: the unit prune compares records by.
    pub fn path_and_flag(&self) -> &[u8] {
        &self.0[..self.0.len() - 4]
    }

    /// The full value path this key addresses, terminator restored. Only
    /// meaningful for value-namespace keys, whose paths are always the full
    /// key width.
    pub fn value_path(&self) -> Nibbles {
        Nibbles::unpack(self.packed_path()).child(crate::data::TERMINATOR)
    }

    /// The value path relative to a prefix of `base_len` nibbles.
    pub fn relative_path(&self, base_len: usize) -> Nibbles {
        self.value_path().suffix(base_len)
    }
}
