//! Benchmarks for supportdesk-migrate.
//!
//! Run with: cargo bench -p supportdesk-migrate

#![allow(clippy::pedantic)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::{json, Value};

use supportdesk_migrate::registry::find;
use supportdesk_migrate::target::memory::MemoryTarget;
use supportdesk_migrate::transform::transform_record;
use supportdesk_migrate::{helpdesk, DependencyGraph, RawRecord, TargetWriter, TransformRegistry};
use supportdesk_migrate::{ExistingRowPolicy, TargetStore};

fn ticket(i: usize) -> RawRecord {
    let status = if i % 7 == 0 { "ESCALATED" } else { "open" };
    let doc = json!({
        "_id": {"$oid": format!("65f0c0ffee{:014}", i)},
        "accountId": format!("a{}", i % 50),
        "subject": format!("Cannot log in ({})", i),
        "description": "The login form rejects valid credentials after the last update.",
        "status": status,
        "priority": "High",
        "tags": ["auth", "web", format!("batch-{}", i % 10)],
        "isEscalated": i % 3 == 0,
        "createdAt": {"$date": "2024-02-01T10:00:00.000Z"},
        "updatedAt": "2024-02-02T11:30:00Z",
    });
    match doc {
        Value::Object(map) => map,
        _ => unreachable!(),
    }
}

/// Benchmark single-record transformation
fn bench_transform_record(c: &mut Criterion) {
    let specs = helpdesk();
    let tickets = find(&specs, "tickets").unwrap().clone();
    let record = ticket(1);

    c.bench_function("transform_ticket", |b| {
        b.iter(|| black_box(transform_record(&tickets, black_box(&record))))
    });

    let registry = TransformRegistry::new(&specs);
    c.bench_function("registry_transform_ticket", |b| {
        b.iter(|| black_box(registry.transform("tickets", black_box(&record))))
    });
}

/// Benchmark page transformation by batch size
fn bench_transform_page(c: &mut Criterion) {
    let specs = helpdesk();
    let registry = TransformRegistry::new(&specs);

    let mut group = c.benchmark_group("transform_page");
    for size in [100, 500, 1000] {
        let page: Vec<RawRecord> = (0..size).map(ticket).collect();
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("batch_size", size), &page, |b, page| {
            b.iter(|| {
                let rows: Vec<_> = page
                    .iter()
                    .map(|r| registry.transform("tickets", r))
                    .collect();
                black_box(rows)
            })
        });
    }
    group.finish();
}

/// Benchmark dependency ordering of the helpdesk registry
fn bench_dependency_graph(c: &mut Criterion) {
    let mut specs = helpdesk();
    specs.reverse();

    c.bench_function("dependency_graph_helpdesk", |b| {
        b.iter(|| {
            let graph = DependencyGraph::new(black_box(&specs)).unwrap();
            black_box(graph.levels().len())
        })
    });
}

/// Benchmark writing a transformed page into the in-memory target
fn bench_write_page(c: &mut Criterion) {
    let specs = helpdesk();
    let tickets = find(&specs, "tickets").unwrap();
    let rows: Vec<_> = (0..500)
        .filter_map(|i| transform_record(tickets, &ticket(i)).ok())
        .map(|outcome| outcome.row)
        .collect();
    let runtime = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("write_page_500_memory", |b| {
        b.to_async(&runtime).iter(|| async {
            let target = MemoryTarget::from_registry(&specs);
            let writer = TargetWriter::new(&target as &dyn TargetStore, ExistingRowPolicy::Skip);
            black_box(writer.write_batch("tickets", rows.clone(), "id").await)
        })
    });
}

criterion_group!(
    benches,
    bench_transform_record,
    bench_transform_page,
    bench_dependency_graph,
    bench_write_page,
);
criterion_main!(benches);
