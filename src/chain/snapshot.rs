//! Pruned-snapshot driver.
//!
//! Produces a destination store carrying the minimum a node needs to join
//! the network at a recent block: the chain metadata, the genesis block,
//! the pivot block with its complete state migrated through the trie
//! engine, the eight blocks before the pivot for ommer-kinship validation,
//! headers only for everything older, and full blocks from the pivot to
//! the head. Head pointers land on the pivot first and advance to the head
//! once the tail blocks are in place.

use std::sync::Arc;

use primitive_types::H256;
use thiserror::Error;
use tracing::info;

use super::migrate::{
    migrate_canonical_block, migrate_canonical_header, migrate_metadata, MigrateError,
};
use super::schema;
use crate::merkle::rlp::RlpError;
use crate::store::{Collection, KeyValueStore, StoreError};
use crate::trie::{TrieError, VersionedTrie};

/// Number of blocks preceding the pivot that must be complete so ommer
/// kinship stays verifiable at the pivot.
pub const OMMER_VALIDATION_DISTANCE: u64 = 8;

const GENESIS_NUMBER: u64 = 0;

#[derive(Error, Debug)]
pub enum SnapshotError {
    /// The migrated state hashed to something other than the pivot
    /// header's state root.
    #[error("migrated state root {computed:?} does not match the pivot header root {expected:?}")]
    StateRootMismatch { expected: H256, computed: H256 },

    #[error("worker pool: {0}")]
    Pool(String),

    #[error(transparent)]
    Migrate(#[from] MigrateError),

    #[error(transparent)]
    Trie(#[from] TrieError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Encoding(#[from] RlpError),
}

/// Tuning knobs for snapshot creation.
#[derive(Clone, Debug)]
pub struct SnapshotOptions {
    /// Worker threads migrating state tries.
    pub num_workers: usize,
    /// Entries fed to the destination trie between progress marks.
    pub batch_size: usize,
    /// Collection prefix of the account-state trie.
    pub state_prefix: Vec<u8>,
    /// Collection prefixes of per-account storage tries to carry over.
    pub storage_prefixes: Vec<Vec<u8>>,
}

impl Default for SnapshotOptions {
    fn default() -> Self {
        Self {
            num_workers: 1,
            batch_size: 1,
            state_prefix: b"s".to_vec(),
            storage_prefixes: Vec::new(),
        }
    }
}

/// Populates `dst` with a pruned snapshot of `src` for the chain segment
/// ending at `head`, pivoting `pivot_distance` blocks back.
pub fn create_pruned_snapshot(
    dst: Arc<dyn KeyValueStore>,
    src: Arc<dyn KeyValueStore>,
    head: u64,
    pivot_distance: u64,
    opts: &SnapshotOptions,
) -> Result<(), SnapshotError> {
    let pivot = head.saturating_sub(pivot_distance);
    info!(head, pivot, "snapshot started");

    migrate_metadata(dst.as_ref(), src.as_ref())?;

    // The genesis block is mandatory; later steps cover it when the pivot
    // sits at genesis.
    if pivot > GENESIS_NUMBER {
        migrate_canonical_block(dst.as_ref(), src.as_ref(), GENESIS_NUMBER)?;
    }

    let pivot_hash = migrate_canonical_block(dst.as_ref(), src.as_ref(), pivot)?;
    point_heads(dst.as_ref(), &pivot_hash)?;

    migrate_pivot_state(&dst, &src, pivot, &pivot_hash, opts)?;

    let ommer_window_start = pivot.saturating_sub(OMMER_VALIDATION_DISTANCE);
    for number in ommer_window_start..pivot {
        migrate_canonical_block(dst.as_ref(), src.as_ref(), number)?;
    }
    for number in 0..ommer_window_start {
        migrate_canonical_header(dst.as_ref(), src.as_ref(), number)?;
    }

    let mut head_hash = pivot_hash;
    for number in pivot + 1..=head {
        head_hash = migrate_canonical_block(dst.as_ref(), src.as_ref(), number)?;
    }
    point_heads(dst.as_ref(), &head_hash)?;

    info!(head, pivot, "snapshot completed");
    Ok(())
}

fn point_heads(dst: &dyn KeyValueStore, hash: &H256) -> Result<(), StoreError> {
    for key in [
        schema::HEAD_BLOCK_KEY,
        schema::HEAD_HEADER_KEY,
        schema::HEAD_FAST_KEY,
    ] {
        dst.put(key, hash.as_bytes())?;
    }
    Ok(())
}

/// Migrates the pivot block's state: the account trie is rebuilt in the
/// destination and verified against the pivot header's state root, and any
/// configured storage tries are rebuilt alongside it. Tries migrate in
/// parallel across the worker pool; each individual trie stays
/// single-writer.
fn migrate_pivot_state(
    dst: &Arc<dyn KeyValueStore>,
    src: &Arc<dyn KeyValueStore>,
    pivot: u64,
    pivot_hash: &H256,
    opts: &SnapshotOptions,
) -> Result<(), SnapshotError> {
    let header = src
        .get(&schema::header_key(pivot, pivot_hash))?
        .ok_or_else(|| {
            MigrateError::MissingRecord(format!("pivot header {pivot} ({pivot_hash:?})"))
        })?;
    let state_root = schema::state_root_of_header(&header)?;

    let mut plans: Vec<(Vec<u8>, Option<H256>)> =
        vec![(opts.state_prefix.clone(), Some(state_root))];
    plans.extend(
        opts.storage_prefixes
            .iter()
            .map(|prefix| (prefix.clone(), None)),
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(opts.num_workers.max(1))
        .build()
        .map_err(|e| SnapshotError::Pool(e.to_string()))?;

    pool.install(|| {
        use rayon::prelude::*;
        plans
            .par_iter()
            .map(|(prefix, expected)| {
                migrate_trie(dst, src, prefix.clone(), *expected, opts.batch_size)
            })
            .collect::<Result<Vec<_>, _>>()
    })?;
    Ok(())
}

/// Rebuilds one trie in the destination from the source's newest live
/// values, committing once and verifying the resulting root when one is
/// expected. Returns the destination root.
pub fn migrate_trie(
    dst: &Arc<dyn KeyValueStore>,
    src: &Arc<dyn KeyValueStore>,
    prefix: Vec<u8>,
    expected_root: Option<H256>,
    batch_size: usize,
) -> Result<H256, SnapshotError> {
    let source = Collection::new(prefix.clone(), src.clone());
    let entries = source.latest_values(u32::MAX)?;

    let mut trie = VersionedTrie::new_empty(prefix, dst.clone(), 0);
    let total = entries.len();
    for (done, chunk) in entries.chunks(batch_size.max(1)).enumerate() {
        for (key, value) in chunk {
            trie.update(key, value)?;
        }
        tracing::debug!(
            migrated = done * batch_size.max(1) + chunk.len(),
            total,
            "state migration progress"
        );
    }
    let computed = trie.commit()?;

    if let Some(expected) = expected_root {
        if computed != expected {
            return Err(SnapshotError::StateRootMismatch { expected, computed });
        }
    }
    Ok(computed)
}
