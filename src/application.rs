//! Application layer - query sessions and their pipelines
//!
//! - `dispatcher`: turns a query request into master records
//! - `enrichment`: fills descriptor and channel data in bounded batches
//! - `cache`: per-session memoization of the two detail lookups
//! - `result_store`: row collection and derived views
//! - `engine`: session controller tying the pieces together

pub mod cache;
pub mod dispatcher;
pub mod engine;
pub mod enrichment;
pub mod error;
pub mod result_store;

// Re-export commonly used items for convenience
pub use cache::{CacheStats, DetailCache, MemoCache};
pub use dispatcher::{DispatchEntry, QueryDispatcher};
pub use engine::CatalogEngine;
pub use enrichment::EnrichmentPipeline;
pub use error::EngineError;
pub use result_store::{ExportRow, ResultStore, SortKey, StoreCounts, View, ViewParams};
