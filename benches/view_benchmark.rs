//! View derivation benchmark
//!
//! Filters, sorts and paginates a result set of catalog rows the size of a
//! large all-master query.

use chrono::NaiveDate;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use catalog_inspector::application::{ResultStore, SortKey, ViewParams};
use catalog_inspector::domain::{Channel, Descriptor, LabelTables, Row, detect_anomaly};
use catalog_inspector::test_utils::master_record;

fn build_store(size: usize) -> ResultStore {
    let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap_or_default();
    let labels = LabelTables::default();
    let ends = ["20231231", "20241231", "99991231", "20240315"];

    let rows = (0..size)
        .map(|i| {
            let code = format!("{:06}", (i * 7919) % 1_000_000);
            let end = ends[i % ends.len()];
            let mut row = Row::skeleton(i as u32 + 1, &master_record(&code, "20230101", end), &labels, today);
            row.descriptor = Descriptor::Resolved(format!("DSC-{}", i % 97));
            row.channels = vec![
                Channel::new("AGENCY", "20230101", "20241231", today),
                Channel::new("ONLINE", "20221201", end, today),
            ];
            row.loading = false;
            row.anomalies = detect_anomaly(&row);
            row
        })
        .collect();

    let mut store = ResultStore::new();
    store.replace_rows(rows);
    store
}

fn bench_view(c: &mut Criterion) {
    let mut group = c.benchmark_group("view_with");

    for size in [1_000usize, 10_000] {
        let store = build_store(size);

        let sorted = ViewParams {
            sort_key: Some(SortKey::SaleEnd),
            sort_ascending: false,
            ..ViewParams::default()
        };
        group.bench_with_input(BenchmarkId::new("sort_sale_end", size), &sorted, |b, params| {
            b.iter(|| black_box(store.view_with(params)));
        });

        let searched = ViewParams {
            search_keyword: "dsc-4".to_string(),
            special_only: true,
            sort_key: Some(SortKey::Code),
            ..ViewParams::default()
        };
        group.bench_with_input(BenchmarkId::new("search_special", size), &searched, |b, params| {
            b.iter(|| black_box(store.view_with(params)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_view);
criterion_main!(benches);
