use particle_index_storage::prelude::*;
use utilities::data_sets::clustered_files;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn config() -> IndexConfig {
    IndexConfig {
        bounds: Bounds3::unit(),
        coarse_order: 5,
        fine_order: 5,
        periodic: false,
    }
}

fn indexed(files: &[Vec<[f64; 3]>]) -> BitmapIndex {
    let mut index = BitmapIndex::new(config()).unwrap();
    for (file, positions) in files.iter().enumerate() {
        index.register_coarse(file as FileId, positions);
    }
    let mask = index.collision_mask();
    for (file, positions) in files.iter().enumerate() {
        index.register_fine(file as FileId, positions, &mask).unwrap();
    }

    index
}

fn bitmask_index_register(c: &mut Criterion) {
    let mut group = c.benchmark_group("bitmask_index_register");
    for &num_files in [4, 16, 64].iter() {
        let files = clustered_files(num_files, 10_000, 0.1, 0);
        group.bench_with_input(BenchmarkId::from_parameter(num_files), &files, |b, files| {
            b.iter(|| indexed(files));
        });
    }
    group.finish();
}

fn bitmask_index_identify_candidate_files(c: &mut Criterion) {
    let mut group = c.benchmark_group("bitmask_index_identify_candidate_files");
    let query = BoxSelector::new(Bounds3::new([0.3; 3], [0.5; 3]).unwrap());
    for &num_files in [4, 16, 64].iter() {
        let index = indexed(&clustered_files(num_files, 10_000, 0.1, 1));
        group.bench_with_input(BenchmarkId::from_parameter(num_files), &index, |b, index| {
            b.iter(|| black_box(index.identify_candidate_files(&query, 1)));
        });
    }
    group.finish();
}

fn forest_builder_plan(c: &mut Criterion) {
    let mut group = c.benchmark_group("forest_builder_plan");
    let query = BoxSelector::new(Bounds3::new([0.2; 3], [0.6; 3]).unwrap());
    for &num_files in [4, 16].iter() {
        let files = clustered_files(num_files, 10_000, 0.1, 2);
        let index = indexed(&files);
        let mut source = InMemoryParticleSource::default();
        for (file, positions) in files.iter().enumerate() {
            source.insert(file as FileId, PositionBatch::from_f64(positions));
        }

        group.bench_with_input(BenchmarkId::from_parameter(num_files), &index, |b, index| {
            b.iter_with_setup(
                || {
                    ForestBuilder::new(ForestConfig {
                        n_ref: 64,
                        forest_order: 10,
                        ..Default::default()
                    })
                    .unwrap()
                },
                |mut builder| builder.plan(index, &source, &query).unwrap(),
            );
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bitmask_index_register,
    bitmask_index_identify_candidate_files,
    forest_builder_plan
);
criterion_main!(benches);
