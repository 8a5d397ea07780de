use std::sync::Arc;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tempfile::NamedTempFile;

use kestreldb::common::types::Rid;
use kestreldb::index::btree::BPlusTree;
use kestreldb::storage::buffer::BufferPoolManager;

fn populated_tree(keys: i64) -> (Arc<BPlusTree<i64>>, NamedTempFile) {
    let file = NamedTempFile::new().unwrap();
    let pool = Arc::new(BufferPoolManager::new(256, file.path()).unwrap());
    let tree = Arc::new(BPlusTree::new("bench", pool, 64, 64).unwrap());
    for key in 0..keys {
        tree.insert(key, Rid::new(1, key as u32)).unwrap();
    }
    (tree, file)
}

fn bench_insert(c: &mut Criterion) {
    let file = NamedTempFile::new().unwrap();
    let pool = Arc::new(BufferPoolManager::new(256, file.path()).unwrap());
    let tree: BPlusTree<i64> = BPlusTree::new("bench_insert", pool, 64, 64).unwrap();

    let mut key = 0i64;
    c.bench_function("btree_insert_sequential", |b| {
        b.iter(|| {
            tree.insert(black_box(key), Rid::new(1, 0)).unwrap();
            key += 1;
        })
    });
}

fn bench_get_value(c: &mut Criterion) {
    let (tree, _file) = populated_tree(10_000);

    let mut i = 0i64;
    c.bench_function("btree_get_value", |b| {
        b.iter(|| {
            let key = (i * 7919) % 10_000;
            i += 1;
            black_box(tree.get_value(&key).unwrap());
        })
    });
}

fn bench_scan(c: &mut Criterion) {
    let (tree, _file) = populated_tree(10_000);

    c.bench_function("btree_full_scan", |b| {
        b.iter(|| {
            let count = tree.iter().unwrap().count();
            assert_eq!(black_box(count), 10_000);
        })
    });
}

criterion_group!(benches, bench_insert, bench_get_value, bench_scan);
criterion_main!(benches);
