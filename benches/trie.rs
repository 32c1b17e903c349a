//! Throughput benchmarks for trie mutation, commit and traversal

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mpt_db::{MemoryStore, MerkleTrie, SeekDirection};

fn key(i: u32) -> Vec<u8> {
    format!("account:{:08}", i).into_bytes()
}

fn populated(store: &MemoryStore, n: u32) -> MerkleTrie<&MemoryStore> {
    let mut trie = MerkleTrie::new(store);
    for i in 0..n {
        trie.put(&key(i), &i.to_le_bytes()).unwrap();
    }
    trie.commit().unwrap();
    trie
}

fn bench_put(c: &mut Criterion) {
    let mut group = c.benchmark_group("put");
    for n in [100u32, 1_000, 10_000] {
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| {
                let mut trie = MerkleTrie::new(MemoryStore::new());
                for i in 0..n {
                    trie.put(&key(i), &i.to_le_bytes()).unwrap();
                }
                black_box(trie.root_hash())
            });
        });
    }
    group.finish();
}

fn bench_put_and_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("put_commit");
    for n in [100u32, 1_000] {
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| {
                let store = MemoryStore::new();
                let trie = populated(&store, n);
                black_box(trie.root_hash())
            });
        });
    }
    group.finish();
}

fn bench_lookups(c: &mut Criterion) {
    let store = MemoryStore::new();
    let root = populated(&store, 10_000).root_hash();

    // A fresh trie per iteration loads nodes from the store
    c.bench_function("get_cold", |b| {
        b.iter(|| {
            let trie = MerkleTrie::from_root(&store, root);
            black_box(trie.get(&key(4_321)))
        });
    });

    let trie = MerkleTrie::from_root(&store, root);
    trie.get(&key(0)).unwrap();
    c.bench_function("get_warm", |b| b.iter(|| black_box(trie.get(&key(4_321)))));
}

fn bench_traversal(c: &mut Criterion) {
    let store = MemoryStore::new();
    let trie = populated(&store, 10_000);

    let mut group = c.benchmark_group("traversal");
    group.bench_function("find_prefix", |b| {
        b.iter(|| black_box(trie.find(b"account:0000").unwrap().count()));
    });
    group.bench_function("seek_forward_100", |b| {
        b.iter(|| {
            black_box(
                trie.seek(&key(5_000), SeekDirection::Forward)
                    .take(100)
                    .count(),
            )
        });
    });
    group.bench_function("seek_backward_100", |b| {
        b.iter(|| {
            black_box(
                trie.seek(&key(5_000), SeekDirection::Backward)
                    .take(100)
                    .count(),
            )
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_put,
    bench_put_and_commit,
    bench_lookups,
    bench_traversal
);
criterion_main!(benches);
