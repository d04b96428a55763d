//! Benchmarks for the polyhedral optimizer.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use polyscop::analysis::dependence::Dependences;
use polyscop::config::Config;
use polyscop::polyhedral::{parse_set, IntegerSet};
use polyscop::transform::{optimize_scop, scop_from_jscop, Pipeline};

const MATMUL: &str = r#"{
    "name": "matmul",
    "context": "[N] -> { : 0 <= N <= 1024 }",
    "statements": [{
        "name": "Stmt_body",
        "domain": "[N] -> { Stmt_body[i, j, k] : 0 <= i < N and 0 <= j < N and 0 <= k < N }",
        "schedule": "[N] -> { Stmt_body[i, j, k] -> [i, j, k] }",
        "accesses": [
            { "kind": "read", "relation": "[N] -> { Stmt_body[i, j, k] -> MemRef_C[i, j] }" },
            { "kind": "read", "relation": "[N] -> { Stmt_body[i, j, k] -> MemRef_A[i, k] }" },
            { "kind": "read", "relation": "[N] -> { Stmt_body[i, j, k] -> MemRef_B[k, j] }" },
            { "kind": "write", "relation": "[N] -> { Stmt_body[i, j, k] -> MemRef_C[i, j] }" }
        ]
    }]
}"#;

/// Benchmark polyhedral set operations.
fn bench_polyhedral_ops(c: &mut Criterion) {
    c.bench_function("create_rectangular_set", |b| {
        b.iter(|| IntegerSet::rectangular(black_box(&[(0, 99), (0, 99), (0, 99)])))
    });

    let triangle = parse_set("[N] -> { [i, j] : 0 <= i < N and 0 <= j <= i }").unwrap();
    let band = parse_set("[N] -> { [i, j] : 0 <= j < N and i - 4 <= j <= i + 4 }").unwrap();
    c.bench_function("subtract_parametric_sets", |b| {
        b.iter(|| black_box(&triangle).subtract(black_box(&band)).is_empty())
    });
    c.bench_function("project_out_dimension", |b| {
        b.iter(|| black_box(&triangle).project_out(1, 1).coalesce())
    });
}

/// Benchmark dependence computation.
fn bench_dependences(c: &mut Criterion) {
    let (scop, _) = scop_from_jscop(MATMUL).unwrap();
    let config = Config::default();
    c.bench_function("dependences_matmul", |b| {
        b.iter(|| {
            let mut deps = Dependences::new(&config.dependence);
            deps.compute(black_box(&scop)).unwrap();
            deps
        })
    });
}

/// Benchmark scheduling and the whole pipeline.
fn bench_scheduling(c: &mut Criterion) {
    let (scop, _) = scop_from_jscop(MATMUL).unwrap();
    let config = Config::default();
    c.bench_function("schedule_matmul", |b| {
        b.iter(|| {
            let mut scop = scop.clone();
            let mut deps = Dependences::new(&config.dependence);
            optimize_scop(&mut scop, &mut deps, black_box(&config))
        })
    });
    let pipeline = Pipeline::new(config.clone());
    c.bench_function("pipeline_matmul", |b| {
        b.iter(|| {
            let mut scop = scop.clone();
            pipeline.run(&mut scop, None).unwrap().ast
        })
    });
}

criterion_group!(benches, bench_polyhedral_ops, bench_dependences, bench_scheduling);
criterion_main!(benches);
