//! Domain module - catalog records, rows and the sales status rules
//!
//! Everything here is synchronous and free of I/O:
//! - `status`: sales status derivation and anomaly detection
//! - `product`: wire records, enriched rows and display labels
//! - `query`: query modes and request parsing
//! - `events`: progress events published by the engine

pub mod constants;
pub mod events;
pub mod product;
pub mod query;
pub mod status;

// Re-export commonly used items for convenience
pub use events::{EngineEvent, EnrichmentSummary};
pub use product::{
    Channel, ChannelRecord, Descriptor, DescriptorRecord, LabelTables, RawRecord, Row,
    RowErrorKind,
};
pub use query::{parse_codes, QueryMode, QueryRequest};
pub use status::{compute_status, detect_anomaly, parse_sale_date, Anomaly, SalesStatus};
