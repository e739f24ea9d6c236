//! Errors that escape a query cycle
//!
//! Row-level failures (not found, one lookup failing) never show up here; they
//! are stored on the row itself.

use thiserror::Error;

use crate::infrastructure::catalog_api::ApiError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The catalog rejected the bearer token; re-authentication is needed
    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    #[error("Query cancelled")]
    Cancelled,

    #[error("Catalog query failed: {0}")]
    Query(ApiError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Row {index} out of range ({len} rows)")]
    RowOutOfRange { index: usize, len: usize },

    #[error("No query has been run")]
    NoSession,

    #[error("Enrichment task failed: {0}")]
    Task(String),
}

impl EngineError {
    pub fn is_credential(&self) -> bool {
        matches!(self, EngineError::InvalidCredential(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineError::Cancelled)
    }
}

impl From<ApiError> for EngineError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Unauthorized(message) => EngineError::InvalidCredential(message),
            ApiError::Cancelled => EngineError::Cancelled,
            ApiError::InvalidRequest(message) => EngineError::InvalidRequest(message),
            other => EngineError::Query(other),
        }
    }
}

impl From<tokio::task::JoinError> for EngineError {
    fn from(err: tokio::task::JoinError) -> Self {
        EngineError::Task(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_errors_map_to_engine_kinds() {
        assert!(EngineError::from(ApiError::Unauthorized("expired".into())).is_credential());
        assert!(EngineError::from(ApiError::Cancelled).is_cancelled());
        assert_eq!(
            EngineError::from(ApiError::Network("reset".into())),
            EngineError::Query(ApiError::Network("reset".into()))
        );
    }
}
