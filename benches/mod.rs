use criterion::{criterion_group, criterion_main};


criterion_group!(
    benches,
    push_bench::register_benchmarks,
    sort_bench::register_benchmarks
);
criterion_main!(benches);
