//! Copying chain metadata and canonical blocks between stores.
//!
//! Each operation reads typed records from a source store and writes them
//! into a destination store, failing loudly when a required source record
//! is absent. Payloads are copied as opaque bytes; only transaction-lookup
//! entries are recomputed, since they key on transaction hashes extracted
//! from the body.

use primitive_types::H256;
use thiserror::Error;
use tracing::debug;

use super::schema;
use crate::merkle::rlp::RlpError;
use crate::store::{KeyValueStore, StoreError};

#[derive(Error, Debug)]
pub enum MigrateError {
    /// A record the copy contract requires was not in the source store.
    #[error("missing source record: {0}")]
    MissingRecord(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Encoding(#[from] RlpError),
}

fn require(
    db: &dyn KeyValueStore,
    key: &[u8],
    what: impl Fn() -> String,
) -> Result<Vec<u8>, MigrateError> {
    db.get(key)?
        .ok_or_else(|| MigrateError::MissingRecord(what()))
}

/// Copies the chain-head bookkeeping from `src` to `dst`:
/// the database schema version (when present), the genesis canonical hash,
/// the chain configuration keyed by it, and the three head pointers. The
/// destination may be partially written when an error is returned.
pub fn migrate_metadata(
    dst: &dyn KeyValueStore,
    src: &dyn KeyValueStore,
) -> Result<(), MigrateError> {
    if let Some(version) = src.get(schema::DATABASE_VERSION_KEY)? {
        dst.put(schema::DATABASE_VERSION_KEY, &version)?;
    }

    let genesis_hash = migrate_canonical_hash(dst, src, 0)?;

    let config = require(src, &schema::config_key(&genesis_hash), || {
        format!("chain configuration for genesis {genesis_hash:?}")
    })?;
    dst.put(&schema::config_key(&genesis_hash), &config)?;

    for (key, what) in [
        (schema::HEAD_BLOCK_KEY, "head block hash"),
        (schema::HEAD_HEADER_KEY, "head header hash"),
        (schema::HEAD_FAST_KEY, "head fast-block hash"),
    ] {
        let hash = require(src, key, || what.to_string())?;
        dst.put(key, &hash)?;
    }

    debug!(genesis = ?genesis_hash, "migrated chain metadata");
    Ok(())
}

/// Copies everything describing the canonical header at `number`: the
/// canonical-hash mapping, the total difficulty, the hash-to-number index,
/// and the header itself.
pub fn migrate_canonical_header(
    dst: &dyn KeyValueStore,
    src: &dyn KeyValueStore,
    number: u64,
) -> Result<H256, MigrateError> {
    let hash = migrate_canonical_hash_and_td(dst, src, number)?;

    let header = require(src, &schema::header_key(number, &hash), || {
        format!("header {number} ({hash:?})")
    })?;
    schema::write_header(dst, number, &hash, &header)?;

    Ok(hash)
}

/// Copies the full canonical block at `number`: the header records plus the
/// body, per-transaction lookup entries, and receipts.
pub fn migrate_canonical_block(
    dst: &dyn KeyValueStore,
    src: &dyn KeyValueStore,
    number: u64,
) -> Result<H256, MigrateError> {
    let hash = migrate_canonical_header(dst, src, number)?;

    let body = require(src, &schema::body_key(number, &hash), || {
        format!("body {number} ({hash:?})")
    })?;
    dst.put(&schema::body_key(number, &hash), &body)?;

    for (index, tx_hash) in schema::tx_hashes_of_body(&body)?.iter().enumerate() {
        dst.put(
            &schema::tx_lookup_key(tx_hash),
            &schema::encode_tx_lookup(&hash, number, index as u64),
        )?;
    }

    let receipts = require(src, &schema::receipts_key(number, &hash), || {
        format!("receipts {number} ({hash:?})")
    })?;
    dst.put(&schema::receipts_key(number, &hash), &receipts)?;

    debug!(number, hash = ?hash, "migrated canonical block");
    Ok(hash)
}

fn migrate_canonical_hash_and_td(
    dst: &dyn KeyValueStore,
    src: &dyn KeyValueStore,
    number: u64,
) -> Result<H256, MigrateError> {
    let hash = migrate_canonical_hash(dst, src, number)?;

    let td = require(src, &schema::td_key(number, &hash), || {
        format!("total difficulty {number} ({hash:?})")
    })?;
    dst.put(&schema::td_key(number, &hash), &td)?;

    Ok(hash)
}

fn migrate_canonical_hash(
    dst: &dyn KeyValueStore,
    src: &dyn KeyValueStore,
    number: u64,
) -> Result<H256, MigrateError> {
    let hash = schema::read_canonical_hash(src, number)?
        .ok_or_else(|| MigrateError::MissingRecord(format!("canonical hash at {number}")))?;
    dst.put(&schema::canonical_hash_key(number), hash.as_bytes())?;
    Ok(hash)
}


#[cfg(test)]
mod tests {
    use super::testutil::{seed_block, seed_metadata};
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_migrate_metadata_copies_everything() {
        let src = MemoryStore::new();
        let dst = MemoryStore::new();
        let genesis = seed_metadata(&src);

        migrate_metadata(&dst, &src).unwrap();

        assert_eq!(
            dst.get(schema::DATABASE_VERSION_KEY).unwrap(),
            Some(vec![0x07])
        );
        assert_eq!(
            schema::read_canonical_hash(&dst, 0).unwrap(),
            Some(genesis)
        );
        assert_eq!(
            dst.get(&schema::config_key(&genesis)).unwrap(),
            Some(b"{\"chainId\":1}".to_vec())
        );
        assert_eq!(
            dst.get(schema::HEAD_FAST_KEY).unwrap(),
            Some(genesis.as_bytes().to_vec())
        );
    }

    #[test]
    fn test_migrate_metadata_fails_without_config() {
        let src = MemoryStore::new();
        let dst = MemoryStore::new();
        seed_block(&src, 0, 0);

        let err = migrate_metadata(&dst, &src).unwrap_err();
        assert!(matches!(err, MigrateError::MissingRecord(_)));
    }

    #[test]
    fn test_migrate_header_copies_index_records() {
        let src = MemoryStore::new();
        let dst = MemoryStore::new();
        let hash = seed_block(&src, 9, 0);

        let migrated = migrate_canonical_header(&dst, &src, 9).unwrap();
        assert_eq!(migrated, hash);
        assert_eq!(schema::read_header_number(&dst, &hash).unwrap(), Some(9));
        assert!(dst.get(&schema::td_key(9, &hash)).unwrap().is_some());
        // Header-only migration leaves the body behind.
        assert!(dst.get(&schema::body_key(9, &hash)).unwrap().is_none());
    }

    #[test]
    fn test_migrate_block_recreates_tx_lookups() {
        let src = MemoryStore::new();
        let dst = MemoryStore::new();
        let hash = seed_block(&src, 3, 2);

        migrate_canonical_block(&dst, &src, 3).unwrap();

        let body = dst.get(&schema::body_key(3, &hash)).unwrap().unwrap();
        let tx_hashes = schema::tx_hashes_of_body(&body).unwrap();
        assert_eq!(tx_hashes.len(), 2);
        for (index, tx_hash) in tx_hashes.iter().enumerate() {
            assert_eq!(
                dst.get(&schema::tx_lookup_key(tx_hash)).unwrap(),
                Some(schema::encode_tx_lookup(&hash, 3, index as u64))
            );
        }
    }

    #[test]
    fn test_migrate_block_fails_on_missing_receipts() {
        let src = MemoryStore::new();
        let dst = MemoryStore::new();
        let hash = seed_block(&src, 4, 0);
        src.delete(&schema::receipts_key(4, &hash)).unwrap();

        let err = migrate_canonical_block(&dst, &src, 4).unwrap_err();
        assert!(matches!(err, MigrateError::MissingRecord(_)));
    }
}
