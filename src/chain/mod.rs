//! Chain-facing tooling: the metadata key schema, the store-to-store
//! migrator, and the pruned-snapshot driver built on top of it.

pub mod migrate;
pub mod schema;
pub mod snapshot;

pub use migrate::{
    migrate_canonical_block, migrate_canonical_header, migrate_metadata, MigrateError,
};
pub use snapshot::{
    create_pruned_snapshot, migrate_trie, SnapshotError, SnapshotOptions,
    OMMER_VALIDATION_DISTANCE,
};
