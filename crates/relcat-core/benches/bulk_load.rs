//! Bulk load benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use relcat_core::{AbortHandle, BulkLoader, Catalog, ColumnDef, DataType, Value};

fn fresh_catalog() -> Catalog {
    let catalog = Catalog::default();
    catalog
        .create_table(
            "events",
            vec![
                ColumnDef::new("id", DataType::BigInt).primary_key(),
                ColumnDef::new("kind", DataType::Varchar(16)).not_null(),
                ColumnDef::new("payload", DataType::Text),
            ],
        )
        .unwrap();
    catalog
}

fn event(i: i64) -> Vec<Value> {
    vec![
        Value::Int(i),
        Value::text(if i % 2 == 0 { "click" } else { "view" }),
        Value::text(format!("payload-{}", i)),
    ]
}

fn bench_single_inserts(c: &mut Criterion) {
    let mut group = c.benchmark_group("bulk/single_insert");

    for rows in [100i64, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(rows), &rows, |b, &rows| {
            b.iter(|| {
                let catalog = fresh_catalog();
                for i in 0..rows {
                    catalog.insert("events", event(i)).unwrap();
                }
                black_box(catalog.row_count("events").unwrap())
            });
        });
    }

    group.finish();
}

fn bench_bulk_load(c: &mut Criterion) {
    let mut group = c.benchmark_group("bulk/load");

    for rows in [100i64, 1000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(rows), &rows, |b, &rows| {
            b.iter(|| {
                let catalog = fresh_catalog();
                let report = BulkLoader::new(&catalog)
                    .load("events", (0..rows).map(event), &AbortHandle::new())
                    .unwrap();
                black_box(report.rows_loaded)
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_single_inserts, bench_bulk_load);
criterion_main!(benches);
