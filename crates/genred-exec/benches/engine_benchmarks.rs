//! Performance benchmarks for genred-exec
//!
//! Run with: cargo bench -p genred-exec
//!
//! Benchmarks cover:
//! - Gaussian kernel products over j (serial & parallel)
//! - Tile extents at a fixed problem size
//! - Reduction operators on the same formula
//! - Cached vs freshly compiled programs

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use genred_core::{kernel_product, KernelKind};
use genred_exec::{Axis, EvalConfig, Genred, ProgramCache, ReductionOp};
use scirs2_core::ndarray_ext::Array2;

fn points(rows: usize, cols: usize, seed: usize) -> Array2<f64> {
    Array2::from_shape_fn((rows, cols), |(i, j)| {
        (((i * 31 + j * 17 + seed) % 101) as f64) / 101.0 - 0.5
    })
}

fn bench_gaussian_sum(c: &mut Criterion) {
    let mut group = c.benchmark_group("gaussian_sum");

    for &size in [100, 500, 1000, 4000].iter() {
        let x = points(size, 3, 0);
        let y = points(size, 3, 7);
        let b = points(size, 1, 13);
        let g = Array2::from_elem((1, 1), 2.0);
        let args = [x.view(), y.view(), b.view(), g.view()];

        group.throughput(Throughput::Elements((size * size) as u64));

        let genred = Genred::new(
            kernel_product(KernelKind::Gaussian, 3, 1).unwrap(),
            ReductionOp::Sum,
            Axis::OverJ,
        )
        .unwrap();

        let serial = genred
            .clone()
            .with_config(EvalConfig::serial())
            .unwrap();
        group.bench_with_input(BenchmarkId::new("serial", size), &size, |bencher, _| {
            bencher.iter(|| black_box(serial.evaluate(&args).unwrap()));
        });

        #[cfg(feature = "parallel")]
        group.bench_with_input(BenchmarkId::new("parallel", size), &size, |bencher, _| {
            bencher.iter(|| black_box(genred.evaluate(&args).unwrap()));
        });
    }
    group.finish();
}

fn bench_tile_extents(c: &mut Criterion) {
    let mut group = c.benchmark_group("tile_extents");
    let size = 2000;
    let x = points(size, 3, 1);
    let y = points(size, 3, 2);
    let b = points(size, 1, 3);
    let g = Array2::from_elem((1, 1), 1.0);
    let args = [x.view(), y.view(), b.view(), g.view()];

    for &(ti, tj) in [(16, 64), (64, 256), (256, 1024), (256, 2000)].iter() {
        let genred = Genred::new(
            kernel_product(KernelKind::Gaussian, 3, 1).unwrap(),
            ReductionOp::Sum,
            Axis::OverJ,
        )
        .unwrap()
        .with_config(EvalConfig::default().with_tile(ti, tj))
        .unwrap();

        group.bench_with_input(
            BenchmarkId::new("fixed", format!("{}x{}", ti, tj)),
            &(ti, tj),
            |bencher, _| {
                bencher.iter(|| black_box(genred.evaluate(&args).unwrap()));
            },
        );
    }
    group.finish();
}

fn bench_reduction_ops(c: &mut Criterion) {
    let mut group = c.benchmark_group("reduction_ops");
    let size = 1000;
    let x = points(size, 2, 4);
    let y = points(size, 2, 5);
    let b = points(size, 1, 6);
    let g = Array2::from_elem((1, 1), 0.5);
    let args = [x.view(), y.view(), b.view(), g.view()];

    for op in ReductionOp::ALL {
        let genred = Genred::new(
            kernel_product(KernelKind::Cauchy, 2, 1).unwrap(),
            op,
            Axis::OverJ,
        )
        .unwrap();

        group.bench_function(op.name(), |bencher| {
            bencher.iter(|| black_box(genred.evaluate(&args).unwrap()));
        });
    }
    group.finish();
}

fn bench_program_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("program_cache");
    let x = points(64, 3, 8);
    let y = points(64, 3, 9);
    let b = points(64, 1, 10);
    let g = Array2::from_elem((1, 1), 1.0);
    let args = [x.view(), y.view(), b.view(), g.view()];
    let cache = ProgramCache::new(16);

    group.bench_function("compile_each_call", |bencher| {
        bencher.iter(|| {
            let genred = Genred::new(
                kernel_product(KernelKind::Laplacian, 3, 1).unwrap(),
                ReductionOp::Sum,
                Axis::OverJ,
            )
            .unwrap();
            black_box(genred.evaluate(&args).unwrap())
        });
    });

    group.bench_function("cached", |bencher| {
        let genred = Genred::new(
            kernel_product(KernelKind::Laplacian, 3, 1).unwrap(),
            ReductionOp::Sum,
            Axis::OverJ,
        )
        .unwrap()
        .with_cache(&cache);
        bencher.iter(|| black_box(genred.evaluate(&args).unwrap()));
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_gaussian_sum,
    bench_tile_extents,
    bench_reduction_ops,
    bench_program_cache
);
criterion_main!(benches);
