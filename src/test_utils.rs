//! Test utilities for catalog-inspector
//!
//! Record builders and an in-memory [`CatalogApi`] shared by the unit tests,
//! the integration tests under `tests/` and the benches.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::constants::open_ended_date;
use crate::domain::{parse_sale_date, ChannelRecord, DescriptorRecord, RawRecord};
use crate::infrastructure::catalog_api::{
    ApiError, CatalogApi, ChannelPage, ChannelQuery, EndDateFilter, MasterPage, MasterQuery,
};

/// Master record named `Product {code}` with fixed label codes
pub fn master_record(code: &str, sale_start: &str, sale_end: &str) -> RawRecord {
    RawRecord {
        code: code.to_string(),
        name: format!("Product {code}"),
        currency_code: "01".to_string(),
        unit_code: "1".to_string(),
        coverage_type_code: "L".to_string(),
        sale_start: sale_start.to_string(),
        sale_end: sale_end.to_string(),
    }
}

pub fn channel_record(code: &str, channel: &str, sale_start: &str, sale_end: &str) -> ChannelRecord {
    ChannelRecord {
        code: code.to_string(),
        channel: channel.to_string(),
        sale_start: sale_start.to_string(),
        sale_end: sale_end.to_string(),
    }
}

pub fn descriptor_record(code: &str, descriptor: &str) -> DescriptorRecord {
    DescriptorRecord {
        code: code.to_string(),
        descriptor: descriptor.to_string(),
    }
}

/// Endpoint a call was counted against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Master,
    Descriptor,
    Channel,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn matches_end_filter(sale_end: &str, filter: EndDateFilter) -> bool {
    match filter {
        EndDateFilter::Unrestricted => true,
        EndDateFilter::OpenEnded => parse_sale_date(sale_end) == Some(open_ended_date()),
    }
}

/// 1-based page slice; `page_size == 0` returns everything
fn page_of<T: Clone>(records: &[T], page: u32, page_size: u32) -> Vec<T> {
    if page_size == 0 {
        return records.to_vec();
    }
    let start = (page.max(1) as usize - 1) * page_size as usize;
    records.iter().skip(start).take(page_size as usize).cloned().collect()
}

/// In-memory catalog.
///
/// Lookups are served from the registered records. Failures, delays and a
/// cancel trigger can be programmed per code; every call that reaches the
/// backend is counted per endpoint and key.
#[derive(Debug, Default)]
pub struct MockCatalogApi {
    masters: Vec<RawRecord>,
    descriptors: HashMap<String, Vec<DescriptorRecord>>,
    channels: Vec<ChannelRecord>,
    failing_codes: Mutex<HashSet<String>>,
    failing_details: HashSet<String>,
    unauthorized_codes: HashSet<String>,
    delay: Option<Duration>,
    cancel_after: Option<(usize, CancellationToken)>,
    master_calls: AtomicUsize,
    descriptor_calls: AtomicUsize,
    channel_calls: AtomicUsize,
    calls: Mutex<HashMap<(Endpoint, String), usize>>,
}

impl MockCatalogApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_master(mut self, record: RawRecord) -> Self {
        self.masters.push(record);
        self
    }

    pub fn with_descriptor(mut self, code: &str, descriptor: &str) -> Self {
        self.descriptors
            .entry(code.to_string())
            .or_default()
            .push(descriptor_record(code, descriptor));
        self
    }

    pub fn with_channel(mut self, record: ChannelRecord) -> Self {
        self.channels.push(record);
        self
    }

    /// Master lookups of `code` fail with a server error
    pub fn with_failing_code(self, code: &str) -> Self {
        lock(&self.failing_codes).insert(code.to_string());
        self
    }

    /// Lets master lookups of `code` succeed from now on
    pub fn recover_code(&self, code: &str) {
        lock(&self.failing_codes).remove(code);
    }

    /// Descriptor and channel lookups of `code` fail with a server error
    pub fn with_failing_detail(mut self, code: &str) -> Self {
        self.failing_details.insert(code.to_string());
        self
    }

    /// Every lookup keyed by `code` is rejected as unauthorized
    pub fn with_unauthorized_code(mut self, code: &str) -> Self {
        self.unauthorized_codes.insert(code.to_string());
        self
    }

    /// Every call waits `delay` before answering, unless cancelled first
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Cancels `token` once the `calls`-th descriptor lookup has been made
    pub fn cancel_after_descriptor_calls(mut self, calls: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((calls, token));
        self
    }

    pub fn master_calls(&self) -> usize {
        self.master_calls.load(Ordering::SeqCst)
    }

    pub fn descriptor_calls(&self) -> usize {
        self.descriptor_calls.load(Ordering::SeqCst)
    }

    pub fn channel_calls(&self) -> usize {
        self.channel_calls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.master_calls() + self.descriptor_calls() + self.channel_calls()
    }

    /// Calls made against `endpoint` for `key` (a code, a channel or a name
    /// keyword; listings without either count under `""`)
    pub fn calls_for(&self, endpoint: Endpoint, key: &str) -> usize {
        lock(&self.calls)
            .get(&(endpoint, key.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Counts the call and applies delay and credential rules.
    ///
    /// A call arriving after cancellation never reaches the backend and is
    /// not counted.
    async fn begin(
        &self,
        endpoint: Endpoint,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ApiError> {
        if cancel.is_cancelled() {
            return Err(ApiError::Cancelled);
        }

        let counter = match endpoint {
            Endpoint::Master => &self.master_calls,
            Endpoint::Descriptor => &self.descriptor_calls,
            Endpoint::Channel => &self.channel_calls,
        };
        let made = counter.fetch_add(1, Ordering::SeqCst) + 1;
        *lock(&self.calls).entry((endpoint, key.to_string())).or_insert(0) += 1;
        debug!("Mock {:?} call #{} for '{}'", endpoint, made, key);

        if endpoint == Endpoint::Descriptor {
            if let Some((after, token)) = &self.cancel_after {
                if made == *after {
                    token.cancel();
                }
            }
        }

        if let Some(delay) = self.delay {
            tokio::select! {
                () = cancel.cancelled() => return Err(ApiError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
        }

        if self.unauthorized_codes.contains(key) {
            return Err(ApiError::Unauthorized(format!("token rejected for {key}")));
        }
        Ok(())
    }

    fn detail_failure(&self, code: &str) -> Option<ApiError> {
        self.failing_details.contains(code).then(|| ApiError::Http {
            status: 500,
            message: format!("detail lookup of {code} failed"),
        })
    }
}

#[async_trait]
impl CatalogApi for MockCatalogApi {
    async fn query_master(
        &self,
        query: &MasterQuery,
        cancel: &CancellationToken,
    ) -> Result<MasterPage, ApiError> {
        let key = query
            .code
            .as_deref()
            .or(query.name_keyword.as_deref())
            .unwrap_or("");
        self.begin(Endpoint::Master, key, cancel).await?;

        if let Some(code) = &query.code {
            if lock(&self.failing_codes).contains(code) {
                return Err(ApiError::Http {
                    status: 500,
                    message: format!("master lookup of {code} failed"),
                });
            }
        }

        let keyword = query.name_keyword.as_deref().map(str::to_lowercase);
        let matched: Vec<RawRecord> = self
            .masters
            .iter()
            .filter(|r| query.code.as_ref().is_none_or(|code| &r.code == code))
            .filter(|r| {
                keyword
                    .as_ref()
                    .is_none_or(|k| r.name.to_lowercase().contains(k.as_str()))
            })
            .filter(|r| matches_end_filter(&r.sale_end, query.end_filter))
            .cloned()
            .collect();

        Ok(MasterPage {
            records: page_of(&matched, query.page, query.page_size),
            total: Some(matched.len() as u64),
        })
    }

    async fn query_descriptor(
        &self,
        code: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<DescriptorRecord>, ApiError> {
        self.begin(Endpoint::Descriptor, code, cancel).await?;
        if let Some(err) = self.detail_failure(code) {
            return Err(err);
        }
        Ok(self.descriptors.get(code).cloned().unwrap_or_default())
    }

    async fn query_channels(
        &self,
        query: &ChannelQuery,
        cancel: &CancellationToken,
    ) -> Result<ChannelPage, ApiError> {
        match query {
            ChannelQuery::ByMaster { code } => {
                self.begin(Endpoint::Channel, code, cancel).await?;
                if let Some(err) = self.detail_failure(code) {
                    return Err(err);
                }
                let records: Vec<ChannelRecord> = self
                    .channels
                    .iter()
                    .filter(|r| &r.code == code)
                    .cloned()
                    .collect();
                let total = records.len() as u64;
                Ok(ChannelPage {
                    records,
                    total: Some(total),
                })
            }
            ChannelQuery::ByChannel {
                channel,
                end_filter,
                page,
                page_size,
            } => {
                self.begin(Endpoint::Channel, channel, cancel).await?;
                let matched: Vec<ChannelRecord> = self
                    .channels
                    .iter()
                    .filter(|r| &r.channel == channel)
                    .filter(|r| matches_end_filter(&r.sale_end, *end_filter))
                    .cloned()
                    .collect();
                Ok(ChannelPage {
                    records: page_of(&matched, *page, *page_size),
                    total: Some(matched.len() as u64),
                })
            }
        }
    }
}
