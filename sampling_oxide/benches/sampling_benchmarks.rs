use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use sampling_oxide::{
    ArrayOfLongsSerde, EbppsSketch, ReservoirSketch, ReservoirUnion, VarOptSketch, VarOptUnion,
};

/// Benchmark: ReservoirSketch update operations
fn bench_reservoir_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("reservoir_update");

    for k in [10, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("update", k), &k, |b, &k| {
            let mut reservoir: ReservoirSketch<i64> = ReservoirSketch::with_seed(k, 42).unwrap();
            let mut counter = 0i64;
            b.iter(|| {
                reservoir.update(black_box(counter)).unwrap();
                counter += 1;
            });
        });
    }

    group.finish();
}

/// Benchmark: VarOptSketch update with mixed weights
fn bench_varopt_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("varopt_update");

    for k in [10, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("update", k), &k, |b, &k| {
            let mut sketch: VarOptSketch<i64> = VarOptSketch::with_seed(k, 42).unwrap();
            let mut counter = 0i64;
            b.iter(|| {
                let weight = ((counter % 97) + 1) as f64;
                sketch.update(black_box(counter), black_box(weight)).unwrap();
                counter += 1;
            });
        });
    }

    group.finish();
}

/// Benchmark: EbppsSketch update with mixed weights
fn bench_ebpps_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("ebpps_update");

    for k in [10, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("update", k), &k, |b, &k| {
            let mut sketch: EbppsSketch<i64> = EbppsSketch::with_seed(k, 42).unwrap();
            let mut counter = 0i64;
            b.iter(|| {
                let weight = ((counter % 97) + 1) as f64;
                sketch.update(black_box(counter), black_box(weight)).unwrap();
                counter += 1;
            });
        });
    }

    group.finish();
}

/// Benchmark: merging two full reservoirs through a union
fn bench_reservoir_union(c: &mut Criterion) {
    let mut group = c.benchmark_group("reservoir_union");

    group.bench_function("merge_two_reservoirs", |b| {
        let mut s1: ReservoirSketch<i64> = ReservoirSketch::with_seed(100, 42).unwrap();
        let mut s2: ReservoirSketch<i64> = ReservoirSketch::with_seed(100, 43).unwrap();
        for i in 0..1000 {
            s1.update(i).unwrap();
            s2.update(i + 1000).unwrap();
        }
        b.iter(|| {
            let mut union: ReservoirUnion<i64> = ReservoirUnion::with_seed(100, 44).unwrap();
            union.update(black_box(&s1)).unwrap();
            union.update(black_box(&s2)).unwrap();
            black_box(union.get_result().unwrap().num_samples());
        });
    });

    group.finish();
}

/// Benchmark: VarOpt union including the resolve step
fn bench_varopt_union(c: &mut Criterion) {
    let mut group = c.benchmark_group("varopt_union");

    group.bench_function("merge_and_resolve", |b| {
        let mut s1: VarOptSketch<i64> = VarOptSketch::with_seed(100, 42).unwrap();
        let mut s2: VarOptSketch<i64> = VarOptSketch::with_seed(100, 43).unwrap();
        for i in 0..1000 {
            s1.update(i, ((i % 7) + 1) as f64).unwrap();
            s2.update(i + 1000, ((i % 11) + 1) as f64).unwrap();
        }
        b.iter(|| {
            let mut union: VarOptUnion<i64> = VarOptUnion::with_seed(100, 44).unwrap();
            union.update(black_box(&s1)).unwrap();
            union.update(black_box(&s2)).unwrap();
            black_box(union.get_result().unwrap().num_samples());
        });
    });

    group.finish();
}

/// Benchmark: serialization round trips
fn bench_serialization(c: &mut Criterion) {
    let mut group = c.benchmark_group("serialization");

    let mut varopt: VarOptSketch<i64> = VarOptSketch::with_seed(1000, 42).unwrap();
    for i in 0..100_000 {
        varopt.update(i, ((i % 13) + 1) as f64).unwrap();
    }
    group.bench_function("varopt_serialize", |b| {
        b.iter(|| black_box(varopt.serialize(&ArrayOfLongsSerde)));
    });
    let bytes = varopt.serialize(&ArrayOfLongsSerde);
    group.bench_function("varopt_deserialize", |b| {
        b.iter(|| {
            black_box(VarOptSketch::<i64>::deserialize(&bytes, &ArrayOfLongsSerde).unwrap())
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_reservoir_update,
    bench_varopt_update,
    bench_ebpps_update,
    bench_reservoir_union,
    bench_varopt_union,
    bench_serialization
);
criterion_main!(benches);
