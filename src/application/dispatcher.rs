//! Query dispatch
//!
//! Translates a [`QueryRequest`] into catalog calls and returns the master
//! records in result-set order. Codes that could not be resolved come back as
//! [`DispatchEntry::Failed`] so they can be shown in place.

use chrono::NaiveDate;
use futures::future::{join_all, try_join_all};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::EngineError;
use crate::domain::{ChannelRecord, LabelTables, QueryMode, QueryRequest, RawRecord, Row, RowErrorKind};
use crate::infrastructure::catalog_api::{
    ApiError, CatalogApi, ChannelQuery, EndDateFilter, MasterQuery,
};
use crate::infrastructure::config::AppConfig;

/// One position of the raw result set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchEntry {
    Record(RawRecord),
    Failed { code: String, kind: RowErrorKind },
}

impl DispatchEntry {
    pub fn code(&self) -> &str {
        match self {
            DispatchEntry::Record(record) => &record.code,
            DispatchEntry::Failed { code, .. } => code,
        }
    }
}

/// Builds skeleton rows numbered from `first_no`
pub fn build_rows(
    entries: Vec<DispatchEntry>,
    labels: &LabelTables,
    today: NaiveDate,
    first_no: u32,
) -> Vec<Row> {
    entries
        .into_iter()
        .enumerate()
        .map(|(offset, entry)| {
            let no = first_no + offset as u32;
            match entry {
                DispatchEntry::Record(record) => Row::skeleton(no, &record, labels, today),
                DispatchEntry::Failed { code, kind } => Row::failed(no, &code, kind),
            }
        })
        .collect()
}

pub struct QueryDispatcher {
    api: Arc<dyn CatalogApi>,
    code_batch_size: usize,
    page_size: u32,
    max_pages: u32,
    channels: Vec<String>,
}

impl QueryDispatcher {
    pub fn new(api: Arc<dyn CatalogApi>, config: &AppConfig) -> Self {
        Self {
            api,
            code_batch_size: config.query.effective_code_batch_size(),
            page_size: config.api.page_size.max(1),
            max_pages: config.api.max_pages.max(1),
            channels: config.query.channels.clone(),
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Runs the request. Credential failures and cancellation abort the
    /// whole dispatch; every other per-code failure becomes a `Failed` entry.
    pub async fn dispatch(
        &self,
        request: &QueryRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<DispatchEntry>, EngineError> {
        info!("🔎 Dispatching {} query", request.mode);

        let entries = match request.mode {
            QueryMode::ByCode => {
                let codes = request.codes();
                if codes.is_empty() {
                    return Err(EngineError::InvalidRequest("no codes given".into()));
                }
                self.dispatch_codes(&codes, cancel).await?
            }
            QueryMode::ByName => {
                let keyword = request.input.trim();
                if keyword.is_empty() {
                    return Err(EngineError::InvalidRequest("name keyword is empty".into()));
                }
                self.fetch_master(MasterQuery::by_name(keyword), cancel)
                    .await?
                    .into_iter()
                    .map(DispatchEntry::Record)
                    .collect()
            }
            QueryMode::AllMaster => self
                .fetch_master(MasterQuery::with_end_filter(EndDateFilter::Unrestricted), cancel)
                .await?
                .into_iter()
                .map(DispatchEntry::Record)
                .collect(),
            QueryMode::MasterInSale => self
                .fetch_master(MasterQuery::with_end_filter(EndDateFilter::OpenEnded), cancel)
                .await?
                .into_iter()
                .map(DispatchEntry::Record)
                .collect(),
            QueryMode::MasterStopped => self
                .master_stopped(cancel)
                .await?
                .into_iter()
                .map(DispatchEntry::Record)
                .collect(),
            QueryMode::ChannelInSale => self.dispatch_channels(request, false, cancel).await?,
            QueryMode::ChannelStopped => self.dispatch_channels(request, true, cancel).await?,
        };

        info!("✅ {} query returned {} entries", request.mode, entries.len());
        Ok(entries)
    }

    /// Looks codes up individually, `code_batch_size` at a time.
    ///
    /// Output keeps input order; a code matching several records expands in
    /// place.
    pub async fn dispatch_codes(
        &self,
        codes: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<DispatchEntry>, EngineError> {
        let mut entries = Vec::with_capacity(codes.len());

        for (batch_index, batch) in codes.chunks(self.code_batch_size).enumerate() {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            debug!("Code batch {} ({} codes)", batch_index + 1, batch.len());

            let results = join_all(
                batch
                    .iter()
                    .map(|code| self.fetch_master(MasterQuery::by_code(code), cancel)),
            )
            .await;

            for (code, result) in batch.iter().zip(results) {
                match result {
                    Ok(records) if records.is_empty() => {
                        debug!("Code {} not found", code);
                        entries.push(DispatchEntry::Failed {
                            code: code.clone(),
                            kind: RowErrorKind::NotFound,
                        });
                    }
                    Ok(records) => entries.extend(records.into_iter().map(DispatchEntry::Record)),
                    Err(err) if err.is_fatal() => return Err(err.into()),
                    Err(err) => {
                        warn!("⚠️ Lookup of {} failed: {}", code, err);
                        entries.push(DispatchEntry::Failed {
                            code: code.clone(),
                            kind: RowErrorKind::QueryFailed {
                                message: err.to_string(),
                            },
                        });
                    }
                }
            }
        }

        Ok(entries)
    }

    /// Unrestricted listing minus the open-ended listing, by code
    async fn master_stopped(&self, cancel: &CancellationToken) -> Result<Vec<RawRecord>, ApiError> {
        let (all, open) = tokio::try_join!(
            self.fetch_master(MasterQuery::with_end_filter(EndDateFilter::Unrestricted), cancel),
            self.fetch_master(MasterQuery::with_end_filter(EndDateFilter::OpenEnded), cancel),
        )?;

        let open_codes: HashSet<&str> = open.iter().map(|r| r.code.as_str()).collect();
        Ok(all
            .iter()
            .filter(|r| !open_codes.contains(r.code.as_str()))
            .cloned()
            .collect())
    }

    async fn dispatch_channels(
        &self,
        request: &QueryRequest,
        stopped: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<DispatchEntry>, EngineError> {
        let channels = if request.channels.is_empty() {
            &self.channels
        } else {
            &request.channels
        };
        if channels.is_empty() {
            return Err(EngineError::InvalidRequest("no channels to query".into()));
        }

        let listings = try_join_all(
            channels
                .iter()
                .map(|channel| self.channel_listing(channel, stopped, cancel)),
        )
        .await?;

        let mut pairs = HashSet::new();
        let mut seen_codes = HashSet::new();
        let mut codes = Vec::new();
        for record in listings.into_iter().flatten() {
            if !pairs.insert((record.code.clone(), record.channel.clone())) {
                continue;
            }
            if seen_codes.insert(record.code.clone()) {
                codes.push(record.code);
            }
        }

        info!(
            "📡 {} channel(s) yielded {} distinct (code, channel) pairs, {} codes",
            channels.len(),
            pairs.len(),
            codes.len()
        );
        if codes.is_empty() {
            return Ok(Vec::new());
        }
        self.dispatch_codes(&codes, cancel).await
    }

    async fn channel_listing(
        &self,
        channel: &str,
        stopped: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<ChannelRecord>, ApiError> {
        if !stopped {
            return self.fetch_channel(channel, EndDateFilter::OpenEnded, cancel).await;
        }

        let (all, open) = tokio::try_join!(
            self.fetch_channel(channel, EndDateFilter::Unrestricted, cancel),
            self.fetch_channel(channel, EndDateFilter::OpenEnded, cancel),
        )?;
        let open_codes: HashSet<&str> = open.iter().map(|r| r.code.as_str()).collect();
        Ok(all
            .iter()
            .filter(|r| !open_codes.contains(r.code.as_str()))
            .cloned()
            .collect())
    }

    async fn fetch_master(
        &self,
        query: MasterQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<RawRecord>, ApiError> {
        let api = &self.api;
        let page_size = self.page_size;
        self.collect_pages(cancel, |page| {
            let query = query.clone().page(page, page_size);
            async move {
                let page = api.query_master(&query, cancel).await?;
                Ok((page.records, page.total))
            }
        })
        .await
    }

    async fn fetch_channel(
        &self,
        channel: &str,
        end_filter: EndDateFilter,
        cancel: &CancellationToken,
    ) -> Result<Vec<ChannelRecord>, ApiError> {
        let api = &self.api;
        let page_size = self.page_size;
        self.collect_pages(cancel, |page| {
            let query = ChannelQuery::ByChannel {
                channel: channel.to_string(),
                end_filter,
                page,
                page_size,
            };
            async move {
                let page = api.query_channels(&query, cancel).await?;
                Ok((page.records, page.total))
            }
        })
        .await
    }

    /// Requests pages until a short page, the reported total or the page cap
    async fn collect_pages<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut fetch_page: F,
    ) -> Result<Vec<T>, ApiError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<(Vec<T>, Option<u64>), ApiError>>,
    {
        let mut collected = Vec::new();

        for page in 1..=self.max_pages {
            if cancel.is_cancelled() {
                return Err(ApiError::Cancelled);
            }

            let (records, total) = fetch_page(page).await?;
            let received = records.len();
            collected.extend(records);

            let reached_total = total.is_some_and(|t| collected.len() as u64 >= t);
            if received < self.page_size as usize || reached_total {
                return Ok(collected);
            }
        }

        warn!(
            "⚠️ Page cap of {} reached; result truncated at {} records",
            self.max_pages,
            collected.len()
        );
        Ok(collected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{master_record, MockCatalogApi};

    fn dispatcher(api: Arc<MockCatalogApi>) -> QueryDispatcher {
        QueryDispatcher::new(api, &AppConfig::default())
    }

    #[tokio::test]
    async fn by_code_marks_missing_and_failed_codes_in_place() {
        let api = Arc::new(
            MockCatalogApi::new()
                .with_master(master_record("001", "20240101", "99991231"))
                .with_master(master_record("003", "20240101", "20241231"))
                .with_failing_code("002"),
        );
        let request = QueryRequest::by_code("001 002\n003,004");
        let entries = dispatcher(api)
            .dispatch(&request, &CancellationToken::new())
            .await
            .unwrap();

        let codes: Vec<_> = entries.iter().map(DispatchEntry::code).collect();
        assert_eq!(codes, vec!["001", "002", "003", "004"]);
        assert!(matches!(
            entries[1],
            DispatchEntry::Failed { kind: RowErrorKind::QueryFailed { .. }, .. }
        ));
        assert!(matches!(
            entries[3],
            DispatchEntry::Failed { kind: RowErrorKind::NotFound, .. }
        ));
    }

    #[tokio::test]
    async fn by_code_aborts_on_rejected_token() {
        let api = Arc::new(
            MockCatalogApi::new()
                .with_master(master_record("001", "20240101", "99991231"))
                .with_unauthorized_code("002"),
        );
        let err = dispatcher(api)
            .dispatch(&QueryRequest::by_code("001 002"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_credential());
    }

    #[tokio::test]
    async fn repeated_code_gets_a_row_per_position() {
        let api = Arc::new(
            MockCatalogApi::new().with_master(master_record("001", "20240101", "20241231")),
        );
        let entries = dispatcher(api.clone())
            .dispatch(&QueryRequest::by_code("001 001"), &CancellationToken::new())
            .await
            .unwrap();

        let codes: Vec<_> = entries.iter().map(DispatchEntry::code).collect();
        assert_eq!(codes, vec!["001", "001"]);
        assert_eq!(api.master_calls(), 2);
    }

    #[tokio::test]
    async fn empty_input_is_rejected() {
        let api = Arc::new(MockCatalogApi::new());
        let err = dispatcher(api)
            .dispatch(&QueryRequest::by_code(" , "), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn pages_are_concatenated_until_short_page() {
        let mut api = MockCatalogApi::new();
        for i in 0..7 {
            api = api.with_master(master_record(&format!("{i:03}"), "20240101", "20241231"));
        }
        let api = Arc::new(api);
        let entries = dispatcher(api.clone())
            .with_page_size(3)
            .dispatch(
                &QueryRequest::new(QueryMode::AllMaster, ""),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(entries.len(), 7);
        assert_eq!(api.master_calls(), 3);
    }

    #[tokio::test]
    async fn master_stopped_is_the_difference_of_two_listings() {
        let api = Arc::new(
            MockCatalogApi::new()
                .with_master(master_record("001", "20240101", "99991231"))
                .with_master(master_record("002", "20200101", "20201231"))
                .with_master(master_record("003", "20240101", "99991231")),
        );
        let entries = dispatcher(api)
            .dispatch(
                &QueryRequest::new(QueryMode::MasterStopped, ""),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let codes: Vec<_> = entries.iter().map(DispatchEntry::code).collect();
        assert_eq!(codes, vec!["002"]);
    }

    #[test]
    fn rows_are_numbered_densely() {
        let entries = vec![
            DispatchEntry::Record(master_record("001", "20240101", "20241231")),
            DispatchEntry::Failed {
                code: "002".into(),
                kind: RowErrorKind::NotFound,
            },
        ];
        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let rows = build_rows(entries, &LabelTables::default(), today, 1);
        assert_eq!(rows.iter().map(|r| r.no).collect::<Vec<_>>(), vec![1, 2]);
        assert!(rows[0].loading);
        assert!(rows[1].is_error());
    }
}
