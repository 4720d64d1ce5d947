//! Allocation benchmarks.
//!
//! Allocation and deallocation should stay logarithmic in the number of free
//! blocks, so the repeated alloc/free pair is measured with increasingly
//! fragmented heaps.

use bufheap::Heap;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

const HEAP_SIZE: usize = 1024 * 1024;

/// A heap with `holes` free blocks of distinct sizes, separated by used
/// blocks so that they cannot merge.
fn fragmented(holes: usize) -> Heap<Vec<u8>> {
    let mut heap = Heap::create(vec![0; HEAP_SIZE]).expect("create heap");
    let mut holes_to_free = Vec::with_capacity(holes);
    for i in 0..holes {
        holes_to_free.push(heap.alloc(16 + 4 * (i % 64)).expect("pre-allocate hole"));
        heap.alloc(16).expect("pre-allocate separator");
    }
    for address in holes_to_free {
        heap.free(address).expect("free hole");
    }
    heap
}

/// Repeatedly allocate and deallocate the same block.
fn bench_alloc_free(c: &mut Criterion) {
    let mut group = c.benchmark_group("alloc_free");
    for holes in [0, 16, 256, 4096] {
        let mut heap = fragmented(holes);
        group.bench_with_input(BenchmarkId::from_parameter(holes), &holes, |b, _| {
            b.iter(|| {
                let address = heap.alloc(black_box(100)).expect("alloc");
                heap.free(black_box(address)).expect("free");
            });
        });
    }
    group.finish();
}

/// Fill a heap with small blocks and free them all again.
fn bench_fill_and_drain(c: &mut Criterion) {
    c.bench_function("fill_and_drain", |b| {
        b.iter(|| {
            let mut heap = Heap::<Vec<u8>>::create(vec![0; 64 * 1024]).expect("create heap");
            let mut live = Vec::new();
            while let Ok(address) = heap.alloc(24) {
                live.push(address);
            }
            for address in live.into_iter().rev() {
                heap.free(address).expect("free");
            }
            black_box(heap)
        });
    });
}

fn bench_check(c: &mut Criterion) {
    let heap = fragmented(1024);
    c.bench_function("check_1024_holes", |b| {
        b.iter(|| black_box(heap.check().expect("consistent heap")));
    });
}

criterion_group!(benches, bench_alloc_free, bench_fill_and_drain, bench_check);
criterion_main!(benches);
