//! Chain-metadata key schema.
//!
//! The layout mirrors the de-facto layout of go-ethereum's key-value
//! schema, so snapshots produced here stay readable by tooling that speaks
//! it: per-block records are keyed by number and hash under one-byte
//! prefixes, and the head pointers live under well-known literal keys.
//! Header and body payloads are treated as opaque RLP, with just enough
//! parsing to pull out the state root and the transaction hashes.

use primitive_types::H256;

use crate::merkle::rlp::{self, RlpEncoder, RlpError};
use crate::merkle::keccak256;
use crate::store::{KeyValueStore, StoreError};

pub const DATABASE_VERSION_KEY: &[u8] = b"DatabaseVersion";
pub const HEAD_HEADER_KEY: &[u8] = b"LastHeader";
pub const HEAD_BLOCK_KEY: &[u8] = b"LastBlock";
pub const HEAD_FAST_KEY: &[u8] = b"LastFast";

const HEADER_PREFIX: u8 = b'h';
const HEADER_TD_SUFFIX: u8 = b't';
const HEADER_HASH_SUFFIX: u8 = b'n';
const HEADER_NUMBER_PREFIX: u8 = b'H';
const BODY_PREFIX: u8 = b'b';
const RECEIPTS_PREFIX: u8 = b'r';
const TX_LOOKUP_PREFIX: u8 = b'l';
const CONFIG_PREFIX: &[u8] = b"ethereum-config-";

fn number_bytes(number: u64) -> [u8; 8] {
    number.to_be_bytes()
}

/// `h || number || n`: the canonical hash at a height.
pub fn canonical_hash_key(number: u64) -> Vec<u8> {
    let mut key = vec![HEADER_PREFIX];
    key.extend_from_slice(&number_bytes(number));
    key.push(HEADER_HASH_SUFFIX);
    key
}

/// `h || number || hash`: a block header.
pub fn header_key(number: u64, hash: &H256) -> Vec<u8> {
    let mut key = vec![HEADER_PREFIX];
    key.extend_from_slice(&number_bytes(number));
    key.extend_from_slice(hash.as_bytes());
    key
}

/// `h || number || hash || t`: a block's total difficulty.
pub fn td_key(number: u64, hash: &H256) -> Vec<u8> {
    let mut key = header_key(number, hash);
    key.push(HEADER_TD_SUFFIX);
    key
}

/// `H || hash`: the height a header hash belongs to.
pub fn header_number_key(hash: &H256) -> Vec<u8> {
    let mut key = vec![HEADER_NUMBER_PREFIX];
    key.extend_from_slice(hash.as_bytes());
    key
}

/// `b || number || hash`: a block body.
pub fn body_key(number: u64, hash: &H256) -> Vec<u8> {
    let mut key = vec![BODY_PREFIX];
    key.extend_from_slice(&number_bytes(number));
    key.extend_from_slice(hash.as_bytes());
    key
}

/// `r || number || hash`: a block's receipts.
pub fn receipts_key(number: u64, hash: &H256) -> Vec<u8> {
    let mut key = vec![RECEIPTS_PREFIX];
    key.extend_from_slice(&number_bytes(number));
    key.extend_from_slice(hash.as_bytes());
    key
}

/// `l || tx hash`: the lookup entry locating a transaction.
pub fn tx_lookup_key(tx_hash: &H256) -> Vec<u8> {
    let mut key = vec![TX_LOOKUP_PREFIX];
    key.extend_from_slice(tx_hash.as_bytes());
    key
}

/// `ethereum-config- || genesis hash`: the chain configuration.
pub fn config_key(genesis_hash: &H256) -> Vec<u8> {
    let mut key = CONFIG_PREFIX.to_vec();
    key.extend_from_slice(genesis_hash.as_bytes());
    key
}

/// Reads a 32-byte hash stored under `key`.
pub fn read_hash(db: &dyn KeyValueStore, key: &[u8]) -> Result<Option<H256>, StoreError> {
    Ok(db
        .get(key)?
        .filter(|bytes| bytes.len() == 32)
        .map(|bytes| H256::from_slice(&bytes)))
}

pub fn read_canonical_hash(
    db: &dyn KeyValueStore,
    number: u64,
) -> Result<Option<H256>, StoreError> {
    read_hash(db, &canonical_hash_key(number))
}

pub fn read_header_number(
    db: &dyn KeyValueStore,
    hash: &H256,
) -> Result<Option<u64>, StoreError> {
    Ok(db
        .get(&header_number_key(hash))?
        .filter(|bytes| bytes.len() == 8)
        .map(|bytes| u64::from_be_bytes(bytes.try_into().expect("8-byte number"))))
}

/// Writes a header under its (number, hash) slot along with the hash-to-
/// number index.
pub fn write_header(
    db: &dyn KeyValueStore,
    number: u64,
    hash: &H256,
    header_rlp: &[u8],
) -> Result<(), StoreError> {
    db.put(&header_number_key(hash), &number_bytes(number))?;
    db.put(&header_key(number, hash), header_rlp)
}

/// The lookup entry recorded for each transaction of a block:
/// `rlp([block_hash, block_number, tx_index])`.
pub fn encode_tx_lookup(block_hash: &H256, number: u64, index: u64) -> Vec<u8> {
    let mut enc = RlpEncoder::new();
    enc.encode_list(|e| {
        e.encode_bytes(block_hash.as_bytes());
        e.encode_uint(number);
        e.encode_uint(index);
    });
    enc.into_bytes()
}

/// Extracts the state root from an opaque header: the fourth element of the
/// header list.
pub fn state_root_of_header(header_rlp: &[u8]) -> Result<H256, RlpError> {
    let (mut payload, _) = rlp::split_list(header_rlp)?;
    for _ in 0..3 {
        let (_, _, rest) = rlp::split(payload)?;
        payload = rest;
    }
    let (root, _) = rlp::split_string(payload)?;
    if root.len() != 32 {
        return Err(RlpError::ExpectedString);
    }
    Ok(H256::from_slice(root))
}

/// Hashes every transaction of an opaque body: the body is
/// `rlp([transactions, ommers])` and a transaction's hash is the keccak of
/// its own full encoding.
pub fn tx_hashes_of_body(body_rlp: &[u8]) -> Result<Vec<H256>, RlpError> {
    let (payload, _) = rlp::split_list(body_rlp)?;
    let (mut txs, _) = rlp::split_list(payload)?;
    let mut hashes = Vec::new();
    while !txs.is_empty() {
        let before = txs.len();
        let (_, _, rest) = rlp::split(txs)?;
        let item = &txs[..before - rest.len()];
        hashes.push(keccak256(item));
        txs = rest;
    }
    Ok(hashes)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layouts() {
        let hash = H256([0xab; 32]);
        assert_eq!(canonical_hash_key(1)[0], b'h');
        assert_eq!(*canonical_hash_key(1).last().unwrap(), b'n');
        assert_eq!(canonical_hash_key(1).len(), 10);
        assert_eq!(header_key(1, &hash).len(), 41);
        assert_eq!(td_key(1, &hash).len(), 42);
        assert_eq!(body_key(1, &hash)[0], b'b');
        assert_eq!(receipts_key(1, &hash)[0], b'r');
        assert_eq!(tx_lookup_key(&hash)[0], b'l');
        assert!(config_key(&hash).starts_with(b"ethereum-config-"));
    }

    #[test]
    fn test_state_root_extraction() {
        let root = H256([0x42; 32]);
        let header = testutil::make_header(&H256::zero(), &root, 7);
        assert_eq!(state_root_of_header(&header).unwrap(), root);
    }

    #[test]
    fn test_tx_hashes_of_body() {
        let body = testutil::make_body(3);
        let hashes = tx_hashes_of_body(&body).unwrap();
        assert_eq!(hashes.len(), 3);

        // Each hash covers the full item encoding.
        let mut enc = RlpEncoder::new();
        enc.encode_bytes(&[0xf0; 4]);
        assert_eq!(hashes[0], keccak256(enc.as_bytes()));
    }

    #[test]
    fn test_empty_body_has_no_tx_hashes() {
        let body = testutil::make_body(0);
        assert!(tx_hashes_of_body(&body).unwrap().is_empty());
    }

    #[test]
    fn test_header_round_trip() {
        let db = crate::store::MemoryStore::new();
        let hash = H256([0x11; 32]);
        let header = testutil::make_header(&H256::zero(), &H256::zero(), 5);
        write_header(&db, 5, &hash, &header).unwrap();

        assert_eq!(read_header_number(&db, &hash).unwrap(), Some(5));
        assert_eq!(db.get(&header_key(5, &hash)).unwrap(), Some(header));
        assert_eq!(read_canonical_hash(&db, 5).unwrap(), None);
    }
}
