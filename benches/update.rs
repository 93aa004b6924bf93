//! Criterion benchmarks for one diagram refresh.
//!
//! Run with:
//!   cargo bench
//!   cargo bench --features parallel
//!
//! Results are saved to target/criterion/

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use convis::dataset::{synthetic, Dataset};
use convis::model::{Model, TinyConvNet};
use convis::{LayoutBuilder, RenderConstants, Scene, Tensor, UpdateEngine};

/// Benchmark `UpdateEngine::apply` on a full bundle.
fn bench_apply(c: &mut Criterion) {
    let mut scene = Scene::new();
    let diagram = LayoutBuilder::new(RenderConstants::default())
        .build(&mut scene)
        .expect("layout");
    let net = TinyConvNet::new(28, 28, 7);
    let data = synthetic::digits(16, 7);
    let bundles: Vec<_> = (0..data.len())
        .filter_map(|i| data.get(i))
        .map(|(img, label)| (net.forward_with_intermediates(&img), label))
        .collect();

    let engine = UpdateEngine::new(&diagram);
    let mut i = 0;
    c.bench_function("apply_full_bundle", |b| {
        b.iter(|| {
            let (bundle, label) = &bundles[i % bundles.len()];
            i += 1;
            black_box(engine.apply(&mut scene, black_box(bundle), *label));
        });
    });
}

/// Benchmark the forward pass that feeds each frame.
fn bench_forward(c: &mut Criterion) {
    let mut group = c.benchmark_group("forward");
    for side in [14usize, 28, 56] {
        group.throughput(Throughput::Elements((side * side) as u64));
        group.bench_with_input(BenchmarkId::new("tiny", side), &side, |b, &side| {
            let net = TinyConvNet::new(side, side, 1);
            let sample = Tensor::full(vec![1, 1, side, side], 0.5);
            b.iter(|| black_box(net.forward_with_intermediates(black_box(&sample))));
        });
    }
    group.finish();
}

/// Benchmark building the static skeleton.
fn bench_layout(c: &mut Criterion) {
    c.bench_function("layout_build", |b| {
        b.iter(|| {
            let mut scene = Scene::new();
            let diagram = LayoutBuilder::new(RenderConstants::default())
                .build(&mut scene)
                .expect("layout");
            black_box((diagram, scene))
        });
    });
}

criterion_group!(benches, bench_apply, bench_forward, bench_layout);
criterion_main!(benches);
