//! Infrastructure layer for the catalog backend, configuration and logging
//!
//! - `catalog_api`: backend contract and credential providers
//! - `http_client`: reqwest implementation with rate limiting and retries
//! - `config`: JSON configuration with environment overrides
//! - `logging`: tracing subscriber setup

pub mod catalog_api;
pub mod config;
pub mod http_client;
pub mod logging;

// Re-export commonly used items
pub use catalog_api::{ApiError, CatalogApi, CredentialProvider, EnvToken, StaticToken};
pub use config::{AppConfig, ConfigManager};
pub use http_client::HttpCatalogClient;
pub use logging::init_logging_with_config;
