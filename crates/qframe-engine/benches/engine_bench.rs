//! Benchmarks for the state engines
//!
//! Run with: cargo bench -p qframe-engine

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use qframe_engine::{CircuitEngine, DenseEngine, Engine, StabilizerEngine};
use qframe_ir::{GateCatalog, GateId, ResolvedGate};
use rand::SeedableRng;
use rand::rngs::StdRng;

fn gate(id: GateId, dim: u32, arity: usize) -> ResolvedGate {
    GateCatalog::resolve(id, &[], dim, arity).unwrap()
}

/// GHZ preparation plus full measurement.
fn ghz<E: Engine>(n: usize, dim: u32, rng: &mut StdRng) -> Vec<u32> {
    let h = gate(GateId::H, dim, 1);
    let cx = gate(GateId::CX, dim, 2);
    let mut state = E::new(n, dim).unwrap();
    state.apply_gate(&h, &[0]).unwrap();
    for q in 0..n - 1 {
        state.apply_gate(&cx, &[q, q + 1]).unwrap();
    }
    let all: Vec<usize> = (0..n).collect();
    state.measure(&all, rng).unwrap()
}

fn bench_ghz(c: &mut Criterion) {
    let mut group = c.benchmark_group("ghz");
    let mut rng = StdRng::seed_from_u64(0);

    for n in [4, 8, 12] {
        group.bench_with_input(BenchmarkId::new("dense", n), &n, |b, &n| {
            b.iter(|| ghz::<DenseEngine>(black_box(n), 2, &mut rng));
        });
        group.bench_with_input(BenchmarkId::new("circuit", n), &n, |b, &n| {
            b.iter(|| ghz::<CircuitEngine>(black_box(n), 2, &mut rng));
        });
    }
    for n in [16, 64, 256] {
        group.bench_with_input(BenchmarkId::new("stabilizer", n), &n, |b, &n| {
            b.iter(|| ghz::<StabilizerEngine>(black_box(n), 2, &mut rng));
        });
    }

    group.finish();
}

fn bench_qutrit_gates(c: &mut Criterion) {
    let mut group = c.benchmark_group("qutrit_gates");
    let h = gate(GateId::H, 3, 1);
    let cx = gate(GateId::CX, 3, 2);

    for n in [2, 4, 6] {
        group.bench_with_input(BenchmarkId::new("fourier_then_sum", n), &n, |b, &n| {
            let mut state = DenseEngine::new(n, 3).unwrap();
            b.iter(|| {
                state.apply_gate(black_box(&h), &[0]).unwrap();
                state.apply_gate(black_box(&cx), &[0, n - 1]).unwrap();
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_ghz, bench_qutrit_gates);
criterion_main!(benches);
