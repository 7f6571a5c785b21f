//! Criterion benchmarks for topology resolution and evaluation passes.
//!
//! Run with: `cargo bench`
//!
//! These benchmarks measure the resolver on deep and wide breaker graphs and
//! the cost of full and no-op evaluation passes against the in-memory
//! runtime.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use tokio::sync::mpsc;

use eval_engine::core::{BlockInfo, Breaker, Connection, Endpoint, GraphObject, GraphSnapshot};
use eval_engine::runtime::{resolve_connections, EvalEngine};
use eval_engine::{EngineConfig, InMemoryRuntime};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn wire(uid: u64, src: u64, dst: u64) -> GraphObject {
    Connection::new(uid, Endpoint::new(src, "out"), Endpoint::new(dst, "in")).into()
}

/// Block 1 feeding block 2 through `hops` breaker pairs
fn chain(hops: u64, shared_name: bool) -> Vec<GraphObject> {
    let mut objects: Vec<GraphObject> = vec![
        BlockInfo::new(1u64, "source", "/blocks/source").into(),
        BlockInfo::new(2u64, "sink", "/blocks/sink").into(),
    ];
    let mut from = 1;
    for hop in 0..hops {
        let name = if shared_name { "bus".to_string() } else { format!("bus{}", hop) };
        let entry = 100 + 2 * hop;
        objects.push(Breaker::new(entry, name.clone(), true).into());
        objects.push(Breaker::new(entry + 1, name, false).into());
        objects.push(wire(100_000 + hop, from, entry));
        from = entry + 1;
    }
    objects.push(wire(200_000, from, 2));
    objects
}

/// `sources` blocks into one junction fanning out to `sinks` blocks
fn junction(sources: u64, sinks: u64) -> Vec<GraphObject> {
    let mut objects = Vec::new();
    for i in 0..sources + sinks {
        objects.push(BlockInfo::new(i, format!("b{}", i), "/blocks/node").into());
    }
    for i in 0..sources {
        objects.push(Breaker::new(10_000 + i, "bus", true).into());
        objects.push(wire(20_000 + i, i, 10_000 + i));
    }
    for j in 0..sinks {
        objects.push(Breaker::new(30_000 + j, "bus", false).into());
        objects.push(wire(40_000 + j, 30_000 + j, sources + j));
    }
    objects
}

/// A pipeline of `n` blocks wired head to tail
fn pipeline(n: u64) -> GraphSnapshot {
    let blocks = (0..n).map(|i| {
        BlockInfo::new(i, format!("b{}", i), "/blocks/stage").with_property("gain", i as f64)
    });
    let wiring = (1..n).map(|i| wire(1_000_000 + i, i - 1, i));
    GraphSnapshot::from_parts(blocks, wiring)
}

// ---------------------------------------------------------------------------
// Resolver Benchmarks
// ---------------------------------------------------------------------------

fn bench_resolve_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve_chain");

    for hops in [10, 100, 500] {
        let per_hop = chain(hops, false);
        let shared = chain(hops, true);
        group.bench_with_input(BenchmarkId::new("per_hop_names", hops), &per_hop, |b, g| {
            b.iter(|| black_box(resolve_connections(g).len()))
        });
        group.bench_with_input(BenchmarkId::new("shared_name", hops), &shared, |b, g| {
            b.iter(|| black_box(resolve_connections(g).len()))
        });
    }
    group.finish();
}

fn bench_resolve_junction(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve_junction");

    for width in [4, 16, 64] {
        let graph = junction(width, width);
        group.bench_with_input(BenchmarkId::from_parameter(width), &graph, |b, g| {
            b.iter(|| black_box(resolve_connections(g).len()))
        });
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// Evaluation Pass Benchmarks
// ---------------------------------------------------------------------------

fn bench_full_pass(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("full_pass");

    for n in [10, 100, 1_000] {
        let graph = pipeline(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &graph, |b, g| {
            b.iter(|| {
                rt.block_on(async {
                    let (tx, _rx) = mpsc::unbounded_channel();
                    let runtime = Arc::new(InMemoryRuntime::new());
                    let mut engine = EvalEngine::new(runtime.clone(), EngineConfig::default(), tx);
                    engine.submit_topology(g.clone());
                    engine.evaluate().await;
                    black_box(runtime.live_blocks())
                })
            });
        });
    }
    group.finish();
}

fn bench_noop_pass(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("noop_pass");

    for n in [10, 100, 1_000] {
        let (tx, _rx) = mpsc::unbounded_channel();
        let runtime = Arc::new(InMemoryRuntime::new());
        let mut engine = EvalEngine::new(runtime, EngineConfig::default(), tx);
        let graph = pipeline(n);
        engine.submit_topology(graph.clone());
        rt.block_on(engine.evaluate());

        group.bench_function(BenchmarkId::from_parameter(n), |b| {
            b.iter(|| {
                engine.submit_topology(graph.clone());
                rt.block_on(engine.evaluate());
                black_box(engine.passes())
            });
        });
    }
    group.finish();
}

criterion_group!(resolver_benches, bench_resolve_chain, bench_resolve_junction);

criterion_group!(pass_benches, bench_full_pass, bench_noop_pass);

criterion_main!(resolver_benches, pass_benches);
