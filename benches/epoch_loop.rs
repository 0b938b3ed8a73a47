//! Epoch loop benchmarks
//!
//! Full passes over a small generated dataset through each representation,
//! with and without shuffling.

use census_loader_bench::block_spec::BlockSpec;
use census_loader_bench::dataset::{generate_dataset, GenerateConfig};
use census_loader_bench::harness::{run_epoch, EpochConfig, NoopCollector};
use census_loader_bench::loader::{BatchLayout, DataLoader, LoaderConfig, Method, Shuffle};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

fn bench_methods(c: &mut Criterion) {
    let data = generate_dataset(&GenerateConfig {
        rows: 4_096,
        cols: 512,
        density: 0.05,
        seed: 7,
    });
    let spec = BlockSpec::make(Some(512), Some(2), None).unwrap();
    let epoch_config = EpochConfig {
        exclude_first_batch: false,
        ..Default::default()
    };

    let mut group = c.benchmark_group("epoch");
    group.throughput(Throughput::Elements(data.n_rows));
    group.sample_size(20);

    for shuffle in [Shuffle::None, Shuffle::Chunk, Shuffle::Global] {
        for method in Method::all() {
            let id = BenchmarkId::new(method.as_str(), shuffle.as_str());
            group.bench_with_input(id, &method, |b, &method| {
                b.iter(|| {
                    let loader = DataLoader::new(
                        &data,
                        LoaderConfig {
                            method,
                            block_spec: spec,
                            batch_size: 256,
                            shuffle,
                            seed: 0,
                            layout: BatchLayout::Keyed("x".to_string()),
                        },
                    );
                    let total = loader.total_samples();
                    let epoch =
                        run_epoch(loader, 256, Some(total), &epoch_config, &mut NoopCollector)
                            .unwrap();
                    black_box(epoch.total_rows)
                })
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_methods);
criterion_main!(benches);
