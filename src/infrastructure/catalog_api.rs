//! Logical contract of the catalog backend
//!
//! The engine only talks to [`CatalogApi`]; the HTTP implementation lives in
//! `http_client` and tests plug in `test_utils::MockCatalogApi`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::domain::{ChannelRecord, DescriptorRecord, RawRecord};

/// Failures of a single catalog call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// 401-equivalent; the external re-authentication flow must intervene
    #[error("Invalid credential: {0}")]
    Unauthorized(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("HTTP error {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ApiError {
    pub fn is_credential(&self) -> bool {
        matches!(self, ApiError::Unauthorized(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ApiError::Cancelled)
    }

    /// Credential failures and cancellation stop a whole query cycle; every
    /// other error stays local to the row that triggered it.
    pub fn is_fatal(&self) -> bool {
        self.is_credential() || self.is_cancelled()
    }
}

/// Sale end filter understood by the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndDateFilter {
    /// Every record regardless of end date. On the wire this is the value the
    /// backend treats as "no filter" (see `ApiConfig::unrestricted_end_date`).
    Unrestricted,
    /// Records whose end date is the open-ended sentinel
    OpenEnded,
}

/// Master query parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterQuery {
    pub code: Option<String>,
    pub name_keyword: Option<String>,
    pub end_filter: EndDateFilter,
    /// 1-based
    pub page: u32,
    pub page_size: u32,
}

impl MasterQuery {
    pub fn by_code(code: &str) -> Self {
        Self {
            code: Some(code.to_string()),
            name_keyword: None,
            end_filter: EndDateFilter::Unrestricted,
            page: 1,
            page_size: 0,
        }
    }

    pub fn by_name(keyword: &str) -> Self {
        Self {
            code: None,
            name_keyword: Some(keyword.to_string()),
            end_filter: EndDateFilter::Unrestricted,
            page: 1,
            page_size: 0,
        }
    }

    pub fn with_end_filter(end_filter: EndDateFilter) -> Self {
        Self {
            code: None,
            name_keyword: None,
            end_filter,
            page: 1,
            page_size: 0,
        }
    }

    pub fn page(mut self, page: u32, page_size: u32) -> Self {
        self.page = page;
        self.page_size = page_size;
        self
    }
}

/// Channel query: either every window of one master code, or a paged
/// channel-sales listing filtered by channel and end date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum ChannelQuery {
    ByMaster {
        code: String,
    },
    ByChannel {
        channel: String,
        end_filter: EndDateFilter,
        page: u32,
        page_size: u32,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterPage {
    pub records: Vec<RawRecord>,
    /// Total matching records when the backend reports it
    #[serde(default)]
    pub total: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelPage {
    pub records: Vec<ChannelRecord>,
    #[serde(default)]
    pub total: Option<u64>,
}

/// Catalog backend. Every call receives the session's cancellation token and
/// must return [`ApiError::Cancelled`] promptly once it fires.
#[async_trait]
pub trait CatalogApi: Send + Sync {
    async fn query_master(
        &self,
        query: &MasterQuery,
        cancel: &CancellationToken,
    ) -> Result<MasterPage, ApiError>;

    async fn query_descriptor(
        &self,
        code: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<DescriptorRecord>, ApiError>;

    async fn query_channels(
        &self,
        query: &ChannelQuery,
        cancel: &CancellationToken,
    ) -> Result<ChannelPage, ApiError>;
}

/// Source of the bearer token attached to every call
pub trait CredentialProvider: Send + Sync {
    fn bearer_token(&self) -> Option<String>;
}

/// Fixed token, mostly useful for tests and scripted runs
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

impl CredentialProvider for StaticToken {
    fn bearer_token(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Token read from an environment variable on every call, so an external
/// re-authentication flow can rotate it without restarting the engine
#[derive(Debug, Clone)]
pub struct EnvToken {
    pub variable: String,
}

impl CredentialProvider for EnvToken {
    fn bearer_token(&self) -> Option<String> {
        std::env::var(&self.variable)
            .ok()
            .filter(|token| !token.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_credential_and_cancel_are_fatal() {
        assert!(ApiError::Unauthorized("expired".into()).is_fatal());
        assert!(ApiError::Cancelled.is_fatal());
        assert!(!ApiError::Network("reset".into()).is_fatal());
        assert!(!ApiError::Http {
            status: 500,
            message: "boom".into()
        }
        .is_fatal());
    }

    #[test]
    fn channel_query_serializes_with_tag() {
        let q = ChannelQuery::ByChannel {
            channel: "AGENCY".into(),
            end_filter: EndDateFilter::OpenEnded,
            page: 2,
            page_size: 50,
        };
        let json = serde_json::to_value(&q).unwrap();
        assert_eq!(json["by"], "by_channel");
        assert_eq!(json["end_filter"], "open_ended");
    }
}
