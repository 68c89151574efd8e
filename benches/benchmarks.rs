//! Engine benchmarks: insert/commit throughput, point reads against a
//! reopened trie, and the reference-trie root computation for comparison.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use stratadb::{keccak256, MemoryStore, ReferenceTrie, VersionedTrie};

fn entries(count: usize) -> Vec<([u8; 32], Vec<u8>)> {
    (0..count)
        .map(|i| {
            let key = keccak256(&(i as u64).to_be_bytes()).0;
            (key, keccak256(&key).as_bytes().to_vec())
        })
        .collect()
}

fn bench_insert_and_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert_commit");
    for count in [100usize, 1_000, 10_000] {
        let data = entries(count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &data, |b, data| {
            b.iter(|| {
                let mut trie =
                    VersionedTrie::new_empty(b"s".to_vec(), Arc::new(MemoryStore::new()), 0);
                for (key, value) in data {
                    trie.update(key, value).unwrap();
                }
                black_box(trie.commit().unwrap())
            });
        });
    }
    group.finish();
}

fn bench_reopened_get(c: &mut Criterion) {
    let data = entries(10_000);
    let db = Arc::new(MemoryStore::new());
    let mut trie = VersionedTrie::new_empty(b"s".to_vec(), db.clone(), 0);
    for (key, value) in &data {
        trie.update(key, value).unwrap();
    }
    let root = trie.commit().unwrap();
    let reopened = VersionedTrie::open(b"s".to_vec(), db, root, 1).unwrap();

    c.bench_function("reopened_get", |b| {
        let mut i = 0;
        b.iter(|| {
            let (key, _) = &data[i % data.len()];
            i += 1;
            black_box(reopened.get(key).unwrap())
        });
    });
}

fn bench_reference_root(c: &mut Criterion) {
    let data = entries(10_000);
    c.bench_function("reference_root_10k", |b| {
        b.iter(|| {
            let mut reference = ReferenceTrie::with_capacity(data.len());
            for (key, value) in &data {
                reference.insert(key, value.clone());
            }
            black_box(reference.root_hash())
        });
    });
}

criterion_group!(
    benches,
    bench_insert_and_commit,
    bench_reopened_get,
    bench_reference_root
);
criterion_main!(benches);
