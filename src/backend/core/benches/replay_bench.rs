//! Benchmarks for aggregate replay, store appends and projection folding.
use std::sync::Arc;

use blueprint_core::domain::{Workspace, WorkspaceState};
use blueprint_core::events::{
    AggregateRoot, CausalityContext, EventServices, EventStore, InMemoryEventStore, StoredEvent,
};
use blueprint_core::modules::ModuleRegistry;
use blueprint_core::projections::{InMemoryDocumentSink, ProjectionBuilder, WorkspaceProjectionBuilder};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

fn ctx() -> CausalityContext {
    CausalityContext::new("bench-user", "Bench")
}

/// A committed-looking stream of `len` events: create, ready, then renames.
fn workspace_stream(id: &str, len: usize) -> Vec<StoredEvent> {
    let services = EventServices::system();
    let mut ws = Workspace::create(&services, &ctx(), id, "A1", "A1", "Bench").unwrap();
    if len > 1 {
        ws.mark_ready(&services, &ctx()).unwrap();
    }
    for n in 2..len {
        ws.rename(&services, &ctx(), &format!("Bench {}", n)).unwrap();
    }
    ws.uncommitted_stored().unwrap()
}

fn bench_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregate_replay");
    for len in [10usize, 100, 1_000] {
        let events = workspace_stream("W1", len);
        group.throughput(Throughput::Elements(len as u64));
        group.bench_with_input(BenchmarkId::from_parameter(len), &events, |b, events| {
            b.iter(|| black_box(AggregateRoot::<WorkspaceState>::from_stored("W1", events).unwrap()));
        });
    }
    group.finish();
}

fn bench_raise(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregate_raise");
    let services = EventServices::system();
    let registry = ModuleRegistry::with_builtins().unwrap();
    group.bench_function("create_ready_enable", |b| {
        b.iter(|| {
            let mut ws = Workspace::create(&services, &ctx(), "W1", "A1", "A1", "Bench").unwrap();
            ws.mark_ready(&services, &ctx()).unwrap();
            ws.enable_module(&services, &ctx(), &registry, "task").unwrap();
            black_box(ws)
        });
    });
    group.finish();
}

fn bench_store_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_append");
    let rt = tokio::runtime::Runtime::new().unwrap();
    for batch in [1usize, 10, 100] {
        let events = workspace_stream("W1", batch);
        group.throughput(Throughput::Elements(batch as u64));
        group.bench_with_input(BenchmarkId::from_parameter(batch), &events, |b, events| {
            b.iter(|| {
                let store = InMemoryEventStore::new();
                let stream = events[0].stream_key();
                rt.block_on(async { store.append(&stream, events.clone(), 0).await.unwrap(); });
                black_box(store)
            });
        });
    }
    group.finish();
}

fn bench_projection_rebuild(c: &mut Criterion) {
    let mut group = c.benchmark_group("projection_rebuild");
    let rt = tokio::runtime::Runtime::new().unwrap();
    for len in [10usize, 100] {
        let events = workspace_stream("W1", len);
        let builder = WorkspaceProjectionBuilder::new(Arc::new(InMemoryDocumentSink::new()));
        group.bench_with_input(BenchmarkId::from_parameter(len), &events, |b, events| {
            b.iter(|| rt.block_on(async { builder.rebuild("W1", events).await.unwrap(); }));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_replay, bench_raise, bench_store_append, bench_projection_rebuild);
criterion_main!(benches);
