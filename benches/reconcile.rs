//! Benchmarks for the master-VCV offset search.
//!
//! Run:
//! - cargo bench --bench reconcile

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use glean_rust::reconcile::find_offset;
use ndarray::{s, Array2};

const BLOCK: usize = 24;
const BLOCKS: [usize; 3] = [2, 8, 32];

/// Block-diagonal master with distinct, slightly coupled blocks
fn build_master(blocks: usize) -> Array2<f64> {
    let n = blocks * BLOCK;
    Array2::from_shape_fn((n, n), |(i, j)| {
        if i / BLOCK != j / BLOCK {
            0.0
        } else if i == j {
            1.0 + i as f64
        } else {
            0.01 * ((i + j) % 7) as f64
        }
    })
}

fn bench_find_last_block(c: &mut Criterion) {
    let mut group = c.benchmark_group("find_offset_last_block");

    for &blocks in &BLOCKS {
        let master = build_master(blocks);
        let k = (blocks - 1) * BLOCK;
        let vcv = master.slice(s![k.., k..]).to_owned();

        let id = BenchmarkId::new("blocks", blocks);
        group.bench_with_input(id, &vcv, |b, vcv| {
            b.iter(|| find_offset(black_box(&master), black_box(vcv)))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_find_last_block);
criterion_main!(benches);
