//! Throughput comparison of the bulk engine's `Sequential` and `Batched`
//! strategies against the in-memory fake driver, so a round-trip's fixed
//! overhead (retry bookkeeping, parameter coercion, SQL rendering) can be
//! measured without a real database's network latency dominating the result.
//!
//! No criterion precedent exists in the teacher (`ouroboros-kv` benchmarks
//! against its own bespoke `Benchmarker`); grounded instead on
//! `datafusion-pg-catalog`'s `benches/parser_benchmark.rs`, the
//! `criterion_group!`/`criterion_main!`/`harness = false` shape this
//! workspace's own `Cargo.toml` already declares.

use std::collections::HashMap;
use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use dbcrud_core::driver::fake::FakeDriverFactory;
use dbcrud_core::{
    BulkConfig, BulkExecutor, ColumnDescriptor, ContextConfig, DatabaseContext, DbProduct, DriverFactory,
    EntityDescriptor, MappedEntity, SemanticType, SqlValue, Strategy,
};

#[derive(Debug, Default, Clone)]
struct BenchRow {
    id: i64,
    label: String,
    amount: i64,
}

impl MappedEntity for BenchRow {
    fn describe() -> Arc<EntityDescriptor<Self>> {
        Arc::new(
            EntityDescriptor::new("bench_rows")
                .column(
                    ColumnDescriptor::new(
                        "id",
                        SemanticType::BigInt,
                        |r: &BenchRow| SqlValue::BigInt(r.id),
                        |r: &mut BenchRow, v| {
                            r.id = v.as_i64().unwrap_or_default();
                            Ok(())
                        },
                    )
                    .identity(),
                )
                .column(ColumnDescriptor::new(
                    "label",
                    SemanticType::Text { max_len: Some(50) },
                    |r: &BenchRow| SqlValue::String(r.label.clone()),
                    |r: &mut BenchRow, v| {
                        if let SqlValue::String(s) = v {
                            r.label = s;
                        }
                        Ok(())
                    },
                ))
                .column(ColumnDescriptor::new(
                    "amount",
                    SemanticType::BigInt,
                    |r: &BenchRow| SqlValue::BigInt(r.amount),
                    |r: &mut BenchRow, v| {
                        if let SqlValue::BigInt(i) = v {
                            r.amount = i;
                        }
                        Ok(())
                    },
                )),
        )
    }
}

fn sample_rows(n: usize) -> Vec<BenchRow> {
    (0..n)
        .map(|i| BenchRow {
            id: 0,
            label: format!("row-{i}"),
            amount: i as i64,
        })
        .collect()
}

/// Builds a fresh context whose fake driver always succeeds, pre-loaded with
/// enough canned responses for one full bulk call at `row_count` rows.
fn context_for(row_count: usize, strategy: Strategy) -> Arc<DatabaseContext> {
    let factory = FakeDriverFactory::new();
    match strategy {
        Strategy::Sequential => {
            let mut returned = HashMap::new();
            returned.insert("id".to_string(), SqlValue::BigInt(1));
            for _ in 0..row_count {
                factory.push_fetch_optional(Ok(Some(returned.clone())));
            }
        }
        _ => {
            factory.push_execute(Ok(row_count as u64));
        }
    }
    let driver: Arc<dyn DriverFactory> = Arc::new(factory);
    Arc::new(DatabaseContext::new(DbProduct::PostgreSql, driver, ContextConfig::default()))
}

fn bench_sequential_vs_batched(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("bulk_create_many");

    for &row_count in &[10usize, 100, 1_000] {
        group.bench_with_input(BenchmarkId::new("sequential", row_count), &row_count, |b, &row_count| {
            b.iter(|| {
                runtime.block_on(async {
                    let context = context_for(row_count, Strategy::Sequential);
                    let executor =
                        BulkExecutor::<BenchRow>::new(context, BulkConfig::new().strategy(Strategy::Sequential)).unwrap();
                    let mut rows = sample_rows(row_count);
                    black_box(executor.create_many(&mut rows, None).await.unwrap())
                })
            })
        });

        group.bench_with_input(BenchmarkId::new("batched", row_count), &row_count, |b, &row_count| {
            b.iter(|| {
                runtime.block_on(async {
                    let context = context_for(row_count, Strategy::Batched);
                    let executor =
                        BulkExecutor::<BenchRow>::new(context, BulkConfig::new().strategy(Strategy::Batched)).unwrap();
                    let mut rows = sample_rows(row_count);
                    black_box(executor.create_many(&mut rows, None).await.unwrap())
                })
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_sequential_vs_batched);
criterion_main!(benches);
