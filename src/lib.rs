//! Catalog Inspector - catalog enrichment and sales status reconciliation
//!
//! Queries a paginated catalog backend, enriches every result row with its
//! descriptor and channel sales windows, derives sales statuses and flags
//! rows whose master and channel windows disagree.

// Module declarations
pub mod application;
pub mod domain;
pub mod infrastructure;

#[doc(hidden)]
pub mod test_utils;

// Re-export the engine surface for easier access
pub use application::{CatalogEngine, EngineError, SortKey, View, ViewParams};
pub use domain::{EngineEvent, QueryMode, QueryRequest, Row, SalesStatus};
pub use infrastructure::{AppConfig, CatalogApi, ConfigManager, HttpCatalogClient};
