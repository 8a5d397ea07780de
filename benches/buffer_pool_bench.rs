use std::sync::Arc;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tempfile::NamedTempFile;

use kestreldb::storage::buffer::BufferPoolManager;

fn bench_new_and_unpin(c: &mut Criterion) {
    let file = NamedTempFile::new().unwrap();
    let pool = Arc::new(BufferPoolManager::new(256, file.path()).unwrap());

    c.bench_function("buffer_pool_new_page", |b| {
        b.iter(|| {
            let (_, page_id) = pool.new_page().unwrap();
            pool.unpin_page(black_box(page_id), false).unwrap();
        })
    });
}

fn bench_fetch_resident(c: &mut Criterion) {
    let file = NamedTempFile::new().unwrap();
    let pool = Arc::new(BufferPoolManager::new(64, file.path()).unwrap());

    let mut page_ids = Vec::new();
    for _ in 0..32 {
        let (_, page_id) = pool.new_page().unwrap();
        pool.unpin_page(page_id, false).unwrap();
        page_ids.push(page_id);
    }

    let mut i = 0;
    c.bench_function("buffer_pool_fetch_resident", |b| {
        b.iter(|| {
            let page_id = page_ids[i % page_ids.len()];
            i += 1;
            let page = pool.fetch_page(black_box(page_id)).unwrap();
            black_box(page.read().data[0]);
            pool.unpin_page(page_id, false).unwrap();
        })
    });
}

fn bench_fetch_with_eviction(c: &mut Criterion) {
    let file = NamedTempFile::new().unwrap();
    // Pool much smaller than the working set, so most fetches evict
    let pool = Arc::new(BufferPoolManager::new(8, file.path()).unwrap());

    let mut page_ids = Vec::new();
    for _ in 0..64 {
        let (_, page_id) = pool.new_page().unwrap();
        pool.unpin_page(page_id, false).unwrap();
        page_ids.push(page_id);
    }

    let mut i = 0;
    c.bench_function("buffer_pool_fetch_evicting", |b| {
        b.iter(|| {
            let page_id = page_ids[i % page_ids.len()];
            i += 1;
            let _ = pool.fetch_page(black_box(page_id)).unwrap();
            pool.unpin_page(page_id, false).unwrap();
        })
    });
}

criterion_group!(
    benches,
    bench_new_and_unpin,
    bench_fetch_resident,
    bench_fetch_with_eviction
);
criterion_main!(benches);
