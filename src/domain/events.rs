//! Progress events emitted by the engine
//!
//! Consumers subscribe through `CatalogEngine::subscribe` and refresh their
//! view whenever a row changes. Every event carries the query session id so a
//! late event from a superseded session can be ignored.

use serde::{Deserialize, Serialize};

use super::product::Row;
use super::query::QueryMode;

/// Outcome counters of one enrichment run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentSummary {
    /// Rows handed to the pipeline
    pub requested: usize,
    /// Rows whose descriptor and channels were populated
    pub enriched: usize,
    /// Rows whose lookups failed
    pub failed: usize,
    /// Rows skipped (error rows)
    pub skipped: usize,
}

impl EnrichmentSummary {
    pub fn completed(&self) -> usize {
        self.enriched + self.failed + self.skipped
    }

    pub fn absorb(&mut self, other: EnrichmentSummary) {
        self.requested += other.requested;
        self.enriched += other.enriched;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    QueryStarted {
        session_id: String,
        mode: QueryMode,
    },
    /// Master records are in the store; enrichment follows
    MasterLoaded {
        session_id: String,
        total_rows: usize,
        error_rows: usize,
    },
    RowUpdated {
        session_id: String,
        index: usize,
        row: Box<Row>,
    },
    BatchCompleted {
        session_id: String,
        batch_index: usize,
        completed: usize,
        total: usize,
    },
    EnrichmentFinished {
        session_id: String,
        summary: EnrichmentSummary,
    },
    EnrichmentCancelled {
        session_id: String,
        completed: usize,
    },
    /// A whole query cycle failed; `credential` marks a rejected token
    QueryFailed {
        session_id: String,
        message: String,
        credential: bool,
    },
}

impl EngineEvent {
    pub fn session_id(&self) -> &str {
        match self {
            EngineEvent::QueryStarted { session_id, .. }
            | EngineEvent::MasterLoaded { session_id, .. }
            | EngineEvent::RowUpdated { session_id, .. }
            | EngineEvent::BatchCompleted { session_id, .. }
            | EngineEvent::EnrichmentFinished { session_id, .. }
            | EngineEvent::EnrichmentCancelled { session_id, .. }
            | EngineEvent::QueryFailed { session_id, .. } => session_id,
        }
    }
}
