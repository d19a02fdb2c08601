use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use incremental_sfm::neighbor::{DEFAULT_MAX_DEPTH, KdTreeIndex, LinearIndex, NeighborIndex};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

const DIM: usize = 64;

fn random_descriptors(rng: &mut ChaCha8Rng, rows: usize) -> Vec<f32> {
    (0..rows * DIM).map(|_| rng.random_range(0.0..1.0)).collect()
}

fn bench_knn(c: &mut Criterion) {
    let mut rng = ChaCha8Rng::seed_from_u64(0);
    let mut group = c.benchmark_group("knn_2");
    for rows in [1000usize, 5000] {
        let dataset = random_descriptors(&mut rng, rows);
        let queries = random_descriptors(&mut rng, 500);

        let mut linear = LinearIndex::new();
        linear.build(&dataset, rows, DIM).unwrap();
        group.bench_with_input(BenchmarkId::new("linear", rows), &queries, |b, q| {
            b.iter(|| linear.search_knn(black_box(q), 500, 2).unwrap())
        });

        for max_leaves in [16usize, 256] {
            let mut kdtree = KdTreeIndex::new(DEFAULT_MAX_DEPTH, max_leaves);
            kdtree.build(&dataset, rows, DIM).unwrap();
            group.bench_with_input(
                BenchmarkId::new(format!("kdtree_{}_leaves", max_leaves), rows),
                &queries,
                |b, q| b.iter(|| kdtree.search_knn(black_box(q), 500, 2).unwrap()),
            );
        }
    }
    group.finish();
}

fn bench_build(c: &mut Criterion) {
    let mut rng = ChaCha8Rng::seed_from_u64(1);
    let dataset = random_descriptors(&mut rng, 5000);
    c.bench_function("kdtree_build_5000", |b| {
        b.iter(|| {
            let mut kdtree = KdTreeIndex::new(DEFAULT_MAX_DEPTH, 256);
            kdtree.build(black_box(&dataset), 5000, DIM).unwrap();
            kdtree
        })
    });
}

criterion_group!(benches, bench_knn, bench_build);
criterion_main!(benches);
