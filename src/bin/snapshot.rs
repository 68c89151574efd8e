//! Creates a pruned snapshot of a chain store.
//!
//! The source and destination are flat record files as written by
//! `MemoryStore::write_to`; the destination directory receives a
//! `chaindata.kv` with the pruned contents.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use stratadb::chain::{create_pruned_snapshot, schema, SnapshotOptions};
use stratadb::{KeyValueStore, MemoryStore};

const CHAINDATA_FILE: &str = "chaindata.kv";

/// Creates a pruned snapshot of the chain store at the source data
/// directory.
#[derive(Parser, Debug)]
#[command(name = "snapshot", version)]
struct Args {
    /// Data directory holding the source chain store.
    #[arg(long)]
    src_datadir: PathBuf,

    /// Data directory to store the snapshot in.
    #[arg(long, default_value = "pruned")]
    dst_datadir: PathBuf,

    /// The head block to include in the snapshot (0 means the current
    /// chain head).
    #[arg(long, default_value_t = 0)]
    head_block_number: u64,

    /// Number of blocks between the head and the pivot.
    #[arg(long, default_value_t = 127)]
    pivot_distance: u64,

    /// Worker threads for the state migrator.
    #[arg(long, default_value_t = 1)]
    num_workers: usize,

    /// Entries migrated per progress batch.
    #[arg(long, default_value_t = 1)]
    batch_size: usize,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_target(false).init();
    let args = Args::parse();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            error!("snapshot failed: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), String> {
    let src_path = args.src_datadir.join(CHAINDATA_FILE);
    let src = MemoryStore::read_from(&src_path)
        .map_err(|e| format!("opening source store {}: {e}", src_path.display()))?;
    let src: Arc<MemoryStore> = Arc::new(src);

    let head = match args.head_block_number {
        0 => current_head(src.as_ref())?,
        number => number,
    };

    std::fs::create_dir_all(&args.dst_datadir)
        .map_err(|e| format!("creating {}: {e}", args.dst_datadir.display()))?;
    let dst = Arc::new(MemoryStore::new());

    info!(
        head,
        pivot_distance = args.pivot_distance,
        num_workers = args.num_workers,
        batch_size = args.batch_size,
        "snapshotting {} into {}",
        args.src_datadir.display(),
        args.dst_datadir.display()
    );

    let opts = SnapshotOptions {
        num_workers: args.num_workers,
        batch_size: args.batch_size,
        ..SnapshotOptions::default()
    };
    create_pruned_snapshot(
        dst.clone() as Arc<dyn KeyValueStore>,
        src.clone() as Arc<dyn KeyValueStore>,
        head,
        args.pivot_distance,
        &opts,
    )
    .map_err(|e| e.to_string())?;

    let dst_path = args.dst_datadir.join(CHAINDATA_FILE);
    dst.write_to(&dst_path)
        .map_err(|e| format!("writing {}: {e}", dst_path.display()))?;
    info!("snapshot written to {}", dst_path.display());
    Ok(())
}

/// Resolves the current head block number from the source's head pointer.
fn current_head(src: &MemoryStore) -> Result<u64, String> {
    let head_hash = schema::read_hash(src, schema::HEAD_BLOCK_KEY)
        .map_err(|e| e.to_string())?
        .ok_or("source store has no head block pointer")?;
    schema::read_header_number(src, &head_hash)
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("head block {head_hash:?} has no number index"))
}
