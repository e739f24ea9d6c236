//! HTTP client for the catalog API with rate limiting and error handling
//!
//! Provides [`HttpCatalogClient`], the production [`CatalogApi`]. Every call
//! is paced by a governor quota, retried on transient statuses with
//! exponential backoff, and raced against the session's cancellation token.

use async_trait::async_trait;
use governor::{
    clock::DefaultClock,
    state::{direct::NotKeyed, InMemoryState},
    Quota, RateLimiter,
};
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::domain::{ChannelRecord, DescriptorRecord, RawRecord};
use crate::infrastructure::catalog_api::{
    ApiError, CatalogApi, ChannelPage, ChannelQuery, CredentialProvider, EndDateFilter,
    MasterPage, MasterQuery,
};
use crate::infrastructure::config::ApiConfig;

/// Response envelope shared by the three endpoints
#[derive(Debug, Deserialize)]
struct RecordsEnvelope<T> {
    #[serde(default = "Vec::new")]
    records: Vec<T>,
    #[serde(default)]
    total: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MasterRequestBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sale_end: Option<&'a str>,
    page_no: u32,
    page_size: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CodeRequestBody<'a> {
    code: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChannelSalesRequestBody<'a> {
    channel: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sale_end: Option<&'a str>,
    page_no: u32,
    page_size: u32,
}

/// Catalog API client over HTTP
pub struct HttpCatalogClient {
    client: Client,
    config: ApiConfig,
    base_url: Url,
    credentials: Arc<dyn CredentialProvider>,
    rate_limiter: Option<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl HttpCatalogClient {
    /// Create a new client with the given configuration
    pub fn new(config: ApiConfig, credentials: Arc<dyn CredentialProvider>) -> anyhow::Result<Self> {
        use anyhow::Context;

        let base_url = Url::parse(&config.base_url)
            .with_context(|| format!("Invalid catalog base URL: {}", config.base_url))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(&config.user_agent)
            .gzip(true)
            .build()
            .context("Failed to create HTTP client")?;

        // 0 disables pacing
        let rate_limiter = NonZeroU32::new(config.max_requests_per_second)
            .map(|rps| RateLimiter::direct(Quota::per_second(rps)));

        Ok(Self {
            client,
            config,
            base_url,
            credentials,
            rate_limiter,
        })
    }

    /// Get the configuration
    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(path)
            .map_err(|e| ApiError::InvalidRequest(format!("Invalid endpoint path '{path}': {e}")))
    }

    /// Wire value of an end date filter; `None` omits the field
    fn end_filter_value(&self, filter: EndDateFilter) -> Option<&str> {
        match filter {
            EndDateFilter::Unrestricted => {
                Some(self.config.unrestricted_end_date.as_str()).filter(|v| !v.is_empty())
            }
            EndDateFilter::OpenEnded => Some(self.config.open_ended_end_date.as_str()),
        }
    }

    fn page_size(&self, requested: u32) -> u32 {
        if requested == 0 {
            self.config.page_size
        } else {
            requested
        }
    }

    async fn wait_for_slot(&self, cancel: &CancellationToken) -> Result<(), ApiError> {
        if let Some(limiter) = &self.rate_limiter {
            tokio::select! {
                _ = limiter.until_ready() => {},
                _ = cancel.cancelled() => return Err(ApiError::Cancelled),
            }
        }
        Ok(())
    }

    async fn backoff(&self, attempt: u32, floor_secs: u64, cancel: &CancellationToken) -> Result<(), ApiError> {
        let base_ms = 1000 * 2_u64.pow(attempt.saturating_sub(1));
        // Up to 25% extra so parallel lookups do not retry in lockstep
        let jitter_ms = fastrand::u64(0..=base_ms / 4);
        let delay = Duration::from_millis(base_ms + jitter_ms).max(Duration::from_secs(floor_secs));
        debug!("Retrying in {:?}", delay);
        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(()),
            _ = cancel.cancelled() => Err(ApiError::Cancelled),
        }
    }

    /// Read a response body, giving up as soon as the token fires
    async fn read_body(response: reqwest::Response, cancel: &CancellationToken) -> Result<String, ApiError> {
        tokio::select! {
            result = response.text() => result
                .map_err(|e| ApiError::Network(format!("Failed to read response body: {e}"))),
            _ = cancel.cancelled() => Err(ApiError::Cancelled),
        }
    }

    /// Endpoint path serving a channel query
    fn channel_query_path(&self, query: &ChannelQuery) -> &str {
        match query {
            ChannelQuery::ByMaster { .. } => &self.config.channel_path,
            ChannelQuery::ByChannel { .. } => &self.config.channel_sales_path,
        }
    }

    /// POST a JSON body and decode the JSON response, retrying transient
    /// failures. 401 is surfaced immediately as [`ApiError::Unauthorized`].
    async fn post_json<B, T>(&self, path: &str, body: &B, cancel: &CancellationToken) -> Result<T, ApiError>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let url = self.endpoint(path)?;
        let max_attempts = self.config.max_retries.max(1);
        let mut last_err: Option<ApiError> = None;

        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                return Err(ApiError::Cancelled);
            }
            self.wait_for_slot(cancel).await?;

            let mut request = self.client.post(url.clone()).json(body);
            if let Some(token) = self.credentials.bearer_token() {
                request = request.bearer_auth(token);
            }

            debug!("🌐 HTTP POST (attempt {}/{}): {}", attempt, max_attempts, url);
            let sent = tokio::select! {
                result = request.send() => result,
                _ = cancel.cancelled() => {
                    warn!("🛑 HTTP request cancelled for URL: {}", url);
                    return Err(ApiError::Cancelled);
                }
            };

            match sent {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let text = Self::read_body(response, cancel).await?;
                        return serde_json::from_str(&text).map_err(|e| ApiError::Decode(e.to_string()));
                    }

                    if status == StatusCode::UNAUTHORIZED {
                        let message = match Self::read_body(response, cancel).await {
                            Err(ApiError::Cancelled) => return Err(ApiError::Cancelled),
                            body => body.unwrap_or_default(),
                        };
                        warn!("🔑 Catalog rejected credential: {}", url);
                        return Err(ApiError::Unauthorized(message));
                    }

                    let retryable = matches!(
                        status,
                        StatusCode::REQUEST_TIMEOUT
                            | StatusCode::TOO_MANY_REQUESTS
                            | StatusCode::BAD_GATEWAY
                            | StatusCode::SERVICE_UNAVAILABLE
                            | StatusCode::GATEWAY_TIMEOUT
                            | StatusCode::INTERNAL_SERVER_ERROR
                    );
                    error!("❌ HTTP error {} on attempt {}: {}", status, attempt, url);

                    // Respect Retry-After if present on 429/503
                    let retry_after = response
                        .headers()
                        .get(reqwest::header::RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|s| s.parse::<u64>().ok())
                        .unwrap_or(0);
                    let message = match Self::read_body(response, cancel).await {
                        Err(ApiError::Cancelled) => return Err(ApiError::Cancelled),
                        body => body.unwrap_or_default(),
                    };
                    let http_err = ApiError::Http {
                        status: status.as_u16(),
                        message,
                    };

                    if !retryable {
                        return Err(http_err);
                    }
                    last_err = Some(http_err);
                    if attempt < max_attempts {
                        self.backoff(attempt, retry_after, cancel).await?;
                    }
                }
                Err(e) => {
                    warn!("⚠️ Network error on attempt {}: {}", attempt, e);
                    last_err = Some(ApiError::Network(e.to_string()));
                    if attempt < max_attempts {
                        self.backoff(attempt, 0, cancel).await?;
                    }
                }
            }
        }

        Err(last_err.unwrap_or_else(|| ApiError::Network(format!("Unknown HTTP error for {url}"))))
    }
}

#[async_trait]
impl CatalogApi for HttpCatalogClient {
    async fn query_master(&self, query: &MasterQuery, cancel: &CancellationToken) -> Result<MasterPage, ApiError> {
        let body = MasterRequestBody {
            code: query.code.as_deref(),
            name: query.name_keyword.as_deref(),
            sale_end: self.end_filter_value(query.end_filter),
            page_no: query.page.max(1),
            page_size: self.page_size(query.page_size),
        };
        let envelope: RecordsEnvelope<RawRecord> =
            self.post_json(&self.config.master_path, &body, cancel).await?;
        info!("📦 Master query page {} returned {} records", body.page_no, envelope.records.len());

        Ok(MasterPage {
            records: envelope.records,
            total: envelope.total,
        })
    }

    async fn query_descriptor(&self, code: &str, cancel: &CancellationToken) -> Result<Vec<DescriptorRecord>, ApiError> {
        let envelope: RecordsEnvelope<DescriptorRecord> = self
            .post_json(&self.config.descriptor_path, &CodeRequestBody { code }, cancel)
            .await?;
        Ok(envelope.records)
    }

    async fn query_channels(&self, query: &ChannelQuery, cancel: &CancellationToken) -> Result<ChannelPage, ApiError> {
        let path = self.channel_query_path(query);
        let envelope: RecordsEnvelope<ChannelRecord> = match query {
            ChannelQuery::ByMaster { code } => {
                self.post_json(path, &CodeRequestBody { code }, cancel).await?
            }
            ChannelQuery::ByChannel {
                channel,
                end_filter,
                page,
                page_size,
            } => {
                let body = ChannelSalesRequestBody {
                    channel,
                    sale_end: self.end_filter_value(*end_filter),
                    page_no: (*page).max(1),
                    page_size: self.page_size(*page_size),
                };
                self.post_json(path, &body, cancel).await?
            }
        };

        Ok(ChannelPage {
            records: envelope.records,
            total: envelope.total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::catalog_api::StaticToken;

    fn client(config: ApiConfig) -> HttpCatalogClient {
        HttpCatalogClient::new(config, Arc::new(StaticToken("t".into()))).unwrap()
    }

    #[test]
    fn test_client_creation() {
        let c = client(ApiConfig::default());
        assert_eq!(c.config().page_size, 200);
        assert!(c.rate_limiter.is_some());
    }

    #[test]
    fn test_zero_rps_disables_pacing() {
        let c = client(ApiConfig {
            max_requests_per_second: 0,
            ..ApiConfig::default()
        });
        assert!(c.rate_limiter.is_none());
    }

    #[test]
    fn test_invalid_base_url_is_rejected() {
        let result = HttpCatalogClient::new(
            ApiConfig {
                base_url: "not a url".into(),
                ..ApiConfig::default()
            },
            Arc::new(StaticToken("t".into())),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_end_filter_wire_values() {
        let c = client(ApiConfig::default());
        assert_eq!(c.end_filter_value(EndDateFilter::Unrestricted), None);
        assert_eq!(c.end_filter_value(EndDateFilter::OpenEnded), Some("9999-12-31"));

        let c = client(ApiConfig {
            unrestricted_end_date: "1900-01-01".into(),
            ..ApiConfig::default()
        });
        assert_eq!(c.end_filter_value(EndDateFilter::Unrestricted), Some("1900-01-01"));
    }

    #[test]
    fn test_endpoint_joins_paths() {
        let c = client(ApiConfig {
            base_url: "https://catalog.example/".into(),
            ..ApiConfig::default()
        });
        assert_eq!(
            c.endpoint("/api/catalog/master/query").unwrap().as_str(),
            "https://catalog.example/api/catalog/master/query"
        );
    }

    #[tokio::test]
    async fn test_cancelled_token_short_circuits() {
        let c = client(ApiConfig::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = c.query_descriptor("0001", &cancel).await;
        assert_eq!(result, Err(ApiError::Cancelled));
    }

    #[test]
    fn test_channel_listing_uses_channel_sales_endpoint() {
        let c = client(ApiConfig::default());
        let by_master = ChannelQuery::ByMaster { code: "001".into() };
        let by_channel = ChannelQuery::ByChannel {
            channel: "AGENCY".into(),
            end_filter: EndDateFilter::OpenEnded,
            page: 1,
            page_size: 50,
        };
        assert_eq!(c.channel_query_path(&by_master), c.config().channel_path);
        assert_eq!(c.channel_query_path(&by_channel), c.config().channel_sales_path);
        assert_ne!(c.config().channel_path, c.config().channel_sales_path);
    }

    /// Serves one response whose headers arrive but whose body never does
    async fn stalled_body_server(status_line: &'static str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0_u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    return;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let head = format!("HTTP/1.1 {status_line}\r\nContent-Length: 1024\r\n\r\npartial");
            socket.write_all(head.as_bytes()).await.unwrap();
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        format!("http://{addr}")
    }

    #[rstest::rstest]
    #[case("401 Unauthorized")]
    #[case("404 Not Found")]
    #[tokio::test]
    async fn test_error_body_read_honors_cancellation(#[case] status_line: &'static str) {
        let base_url = stalled_body_server(status_line).await;
        let c = client(ApiConfig {
            base_url,
            max_retries: 1,
            max_requests_per_second: 0,
            ..ApiConfig::default()
        });
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let result = tokio::time::timeout(Duration::from_secs(5), c.query_descriptor("001", &cancel))
            .await
            .expect("cancellation ends the body read");
        assert_eq!(result, Err(ApiError::Cancelled));
    }

    #[test]
    fn test_master_body_omits_absent_filters() {
        let body = MasterRequestBody {
            code: Some("00123"),
            name: None,
            sale_end: None,
            page_no: 1,
            page_size: 50,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["code"], "00123");
        assert!(json.get("name").is_none());
        assert!(json.get("saleEnd").is_none());
        assert_eq!(json["pageSize"], 50);
    }
}
