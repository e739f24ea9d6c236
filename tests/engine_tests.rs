//! End-to-end tests of a query session against the in-memory catalog

use chrono::NaiveDate;
use rstest::rstest;
use std::sync::Arc;
use std::time::Duration;

use catalog_inspector::application::{CatalogEngine, EngineError, SortKey, ViewParams};
use catalog_inspector::domain::{
    Descriptor, EngineEvent, QueryMode, QueryRequest, RowErrorKind, SalesStatus,
};
use catalog_inspector::infrastructure::AppConfig;
use catalog_inspector::test_utils::{channel_record, master_record, Endpoint, MockCatalogApi};

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
}

fn engine_with(api: Arc<MockCatalogApi>, config: &AppConfig) -> CatalogEngine {
    CatalogEngine::new(api, config).with_today(today())
}

fn all_rows() -> ViewParams {
    ViewParams {
        show_all: true,
        ..ViewParams::default()
    }
}

#[tokio::test]
async fn one_failing_code_among_ten_keeps_the_other_nine() {
    let mut api = MockCatalogApi::new().with_failing_code("C05");
    for i in 0..10 {
        let code = format!("C{i:02}");
        api = api
            .with_master(master_record(&code, "20240101", "20241231"))
            .with_descriptor(&code, &format!("D{i}"));
    }
    let api = Arc::new(api);
    let engine = engine_with(api.clone(), &AppConfig::default());

    let codes: Vec<String> = (0..10).map(|i| format!("C{i:02}")).collect();
    let total = engine
        .run_query(QueryRequest::by_code(codes.join(",")))
        .await
        .unwrap();
    assert_eq!(total, 10);
    engine.wait_for_enrichment().await.unwrap();

    let view = engine.get_view(&all_rows()).await;
    let got: Vec<_> = view.rows.iter().map(|r| r.code.clone()).collect();
    assert_eq!(got, codes);

    for row in &view.rows {
        if row.code == "C05" {
            assert!(matches!(row.error_kind, Some(RowErrorKind::QueryFailed { .. })));
            assert!(row.channels.is_empty());
        } else {
            assert!(!row.loading);
            assert!(matches!(row.descriptor, Descriptor::Resolved(_)));
        }
    }
    assert_eq!(api.calls_for(Endpoint::Descriptor, "C05"), 0);
}

#[tokio::test]
async fn cancelling_mid_run_keeps_finished_rows_and_stops_calls() {
    let mut api = MockCatalogApi::new().with_delay(Duration::from_millis(20));
    for i in 0..30 {
        api = api.with_master(master_record(&format!("{i:03}"), "20240101", "20241231"));
    }
    let api = Arc::new(api);
    let mut config = AppConfig::default();
    config.query.enrichment_batch_size = 10;
    config.api.page_size = 100;
    let engine = engine_with(api.clone(), &config);
    let mut events = engine.subscribe();

    engine
        .run_query(QueryRequest::new(QueryMode::AllMaster, ""))
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(EngineEvent::BatchCompleted { batch_index: 0, .. }) = events.recv().await {
                break;
            }
        }
    })
    .await
    .expect("first batch completes");

    assert!(engine.cancel().await);
    let calls_at_cancel = api.total_calls();

    let result = engine.wait_for_enrichment().await;
    assert_eq!(result, Err(EngineError::Cancelled));
    assert_eq!(api.total_calls(), calls_at_cancel);

    let view = engine.get_view(&all_rows()).await;
    assert!(view.rows[..10].iter().all(|r| !r.loading));
    assert!(view.rows[10..].iter().all(|r| r.loading));
}

#[tokio::test]
async fn new_query_starts_with_an_empty_cache() {
    let api = Arc::new(
        MockCatalogApi::new()
            .with_master(master_record("001", "20240101", "20241231"))
            .with_descriptor("001", "X"),
    );
    let engine = engine_with(api.clone(), &AppConfig::default());

    for _ in 0..2 {
        engine.run_query(QueryRequest::by_code("001")).await.unwrap();
        engine.wait_for_enrichment().await.unwrap();
    }
    assert_eq!(api.calls_for(Endpoint::Descriptor, "001"), 2);
}

#[tokio::test]
async fn same_code_twice_in_one_batch_is_fetched_twice() {
    let api = Arc::new(
        MockCatalogApi::new()
            .with_master(master_record("001", "20240101", "20241231"))
            .with_master(master_record("001", "20230101", "20231231"))
            .with_delay(Duration::from_millis(10)),
    );
    let engine = engine_with(api.clone(), &AppConfig::default());

    engine.run_query(QueryRequest::by_code("001")).await.unwrap();
    engine.wait_for_enrichment().await.unwrap();
    assert_eq!(api.calls_for(Endpoint::Descriptor, "001"), 2);
}

#[tokio::test]
async fn retry_splices_rows_in_place_and_bypasses_cache() {
    let api = Arc::new(
        MockCatalogApi::new()
            .with_master(master_record("001", "20240101", "20241231"))
            .with_master(master_record("002", "20240101", "20241231"))
            .with_master(master_record("002", "20230101", "20231231"))
            .with_master(master_record("003", "20240101", "20241231"))
            .with_failing_code("002"),
    );
    let engine = engine_with(api.clone(), &AppConfig::default());

    engine
        .run_query(QueryRequest::by_code("001 002 003"))
        .await
        .unwrap();
    engine.wait_for_enrichment().await.unwrap();
    assert!(engine.get_view(&all_rows()).await.rows[1].is_error());

    api.recover_code("002");
    assert_eq!(engine.retry_row(1).await.unwrap(), 2);
    engine.wait_for_enrichment().await.unwrap();

    let view = engine.get_view(&all_rows()).await;
    let layout: Vec<_> = view.rows.iter().map(|r| (r.no, r.code.as_str())).collect();
    assert_eq!(layout, vec![(1, "001"), (2, "002"), (3, "002"), (4, "003")]);
    assert!(view.rows.iter().all(|r| !r.loading && !r.is_error()));
    assert_eq!(api.calls_for(Endpoint::Descriptor, "002"), 2);
}

#[rstest]
#[case(QueryMode::ChannelInSale, vec!["001", "002"])]
#[case(QueryMode::ChannelStopped, vec!["003"])]
#[tokio::test]
async fn channel_modes_resolve_distinct_master_codes(
    #[case] mode: QueryMode,
    #[case] expected: Vec<&str>,
) {
    let api = Arc::new(
        MockCatalogApi::new()
            .with_master(master_record("001", "20240101", "99991231"))
            .with_master(master_record("002", "20230101", "99991231"))
            .with_master(master_record("003", "20200101", "20201231"))
            .with_channel(channel_record("001", "AGENCY", "20240101", "99991231"))
            .with_channel(channel_record("001", "AGENCY", "20240101", "99991231"))
            .with_channel(channel_record("001", "ONLINE", "20240101", "99991231"))
            .with_channel(channel_record("002", "AGENCY", "20230101", "99991231"))
            .with_channel(channel_record("003", "AGENCY", "20200101", "20201231")),
    );
    let engine = engine_with(api, &AppConfig::default());

    let request = QueryRequest::new(mode, "").with_channels(["AGENCY", "ONLINE"]);
    engine.run_query(request).await.unwrap();
    engine.wait_for_enrichment().await.unwrap();

    let view = engine.get_view(&all_rows()).await;
    let codes: Vec<_> = view.rows.iter().map(|r| r.code.as_str()).collect();
    assert_eq!(codes, expected);
}

#[tokio::test]
async fn rejected_token_fails_the_query_with_a_credential_event() {
    let api = Arc::new(MockCatalogApi::new().with_unauthorized_code("001"));
    let engine = engine_with(api, &AppConfig::default());
    let mut events = engine.subscribe();

    let err = engine.run_query(QueryRequest::by_code("001")).await.unwrap_err();
    assert!(err.is_credential());

    let mut credential_event = false;
    while let Ok(event) = events.try_recv() {
        if let EngineEvent::QueryFailed { credential, .. } = event {
            credential_event = credential;
        }
    }
    assert!(credential_event);
}

#[tokio::test]
async fn stopped_master_with_selling_channel_is_special() {
    let api = Arc::new(
        MockCatalogApi::new()
            .with_master(master_record("001", "20200101", "20201231"))
            .with_master(master_record("002", "20240101", "20241231"))
            .with_channel(channel_record("001", "AGENCY", "20200101", "20241231"))
            .with_channel(channel_record("002", "AGENCY", "20240101", "20241231")),
    );
    let engine = engine_with(api, &AppConfig::default());

    engine.run_query(QueryRequest::by_code("001 002")).await.unwrap();
    engine.wait_for_enrichment().await.unwrap();

    let view = engine
        .get_view(&ViewParams {
            special_only: true,
            ..all_rows()
        })
        .await;
    assert_eq!(view.total_count, 1);
    let row = &view.rows[0];
    assert_eq!(row.code, "001");
    assert_eq!(row.main_status, Some(SalesStatus::Stopped));
    assert!(row.special_reason().contains("AGENCY"));
}

#[tokio::test]
async fn view_params_sort_and_paginate_the_session_rows() {
    let mut api = MockCatalogApi::new();
    for (i, end) in ["20241231", "20240301", "20250630", "20240901", "20241015"]
        .iter()
        .enumerate()
    {
        api = api.with_master(master_record(&format!("{i:03}"), "20240101", end));
    }
    let engine = engine_with(Arc::new(api), &AppConfig::default());
    engine
        .run_query(QueryRequest::new(QueryMode::AllMaster, ""))
        .await
        .unwrap();

    let view = engine
        .update_view(|store| {
            store.toggle_sort(SortKey::SaleEnd);
            store.toggle_sort(SortKey::SaleEnd);
            store.set_page_size(2);
            store.set_page(2);
        })
        .await;

    assert_eq!(view.total_count, 5);
    assert_eq!(view.total_pages, 3);
    let ends: Vec<_> = view.rows.iter().map(|r| r.sale_end.as_str()).collect();
    assert_eq!(ends, vec!["20241015", "20240901"]);
}
