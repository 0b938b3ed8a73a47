//! Block spec parsing benchmarks
//!
//! Parsing runs once per CLI invocation, so these mostly guard against the
//! range expansion growing accidentally quadratic.

use census_loader_bench::block_spec::{parse_block_spec, parse_block_specs};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn bench_single(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_block_spec");

    let inputs = [
        ("chunk", "10000"),
        ("explicit", "4x2500"),
        ("derived", "65536/16"),
        ("range", "65536/[1,4096]"),
    ];

    for (label, input) in inputs {
        group.bench_with_input(BenchmarkId::from_parameter(label), &input, |b, s| {
            b.iter(|| parse_block_spec(black_box(s)).unwrap())
        });
    }

    group.finish();
}

fn bench_list(c: &mut Criterion) {
    let args = vec![
        "10000".to_string(),
        "2x5000,4x2500".to_string(),
        "1048576/[1,1024]".to_string(),
        "1048576/[1024,1]".to_string(),
    ];

    c.bench_function("parse_block_specs/mixed", |b| {
        b.iter(|| parse_block_specs(black_box(&args)).unwrap())
    });
}

criterion_group!(benches, bench_single, bench_list);
criterion_main!(benches);
