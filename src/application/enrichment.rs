//! Incremental row enrichment
//!
//! Rows are processed in index order, one bounded batch at a time. Within a
//! batch every row runs its descriptor and channel lookups concurrently
//! through the session cache, and the row is written back and announced as
//! soon as both lookups settle.

use chrono::{Local, NaiveDate};
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::cache::DetailCache;
use super::error::EngineError;
use super::result_store::{EnrichTarget, ResultStore};
use crate::domain::{detect_anomaly, Channel, ChannelRecord, Descriptor, EngineEvent, EnrichmentSummary, Row};
use crate::infrastructure::catalog_api::{ApiError, CatalogApi, ChannelQuery};
use crate::infrastructure::config::defaults;

/// Result of both lookups for one row
enum RowOutcome {
    Enriched {
        descriptor: Descriptor,
        channels: Vec<ChannelRecord>,
    },
    Failed(ApiError),
}

#[derive(Clone)]
pub struct EnrichmentPipeline {
    api: Arc<dyn CatalogApi>,
    cache: Arc<DetailCache>,
    store: Arc<RwLock<ResultStore>>,
    events: broadcast::Sender<EngineEvent>,
    session_id: String,
    batch_size: usize,
    today: NaiveDate,
}

impl EnrichmentPipeline {
    pub fn new(
        api: Arc<dyn CatalogApi>,
        cache: Arc<DetailCache>,
        store: Arc<RwLock<ResultStore>>,
        events: broadcast::Sender<EngineEvent>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            api,
            cache,
            store,
            events,
            session_id: session_id.into(),
            batch_size: defaults::ENRICHMENT_BATCH_SIZE,
            today: Local::now().date_naive(),
        }
    }

    /// Clamped to 10..=20
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.clamp(
            defaults::MIN_ENRICHMENT_BATCH_SIZE,
            defaults::MAX_ENRICHMENT_BATCH_SIZE,
        );
        self
    }

    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Enriches `targets` batch by batch.
    ///
    /// Returns `Cancelled` as soon as the token fires between batches; rows
    /// of unstarted batches and rows whose lookups were interrupted stay
    /// loading. A rejected token lets the current batch drain, then returns
    /// `InvalidCredential`.
    pub async fn run(
        &self,
        targets: Vec<EnrichTarget>,
        force_fetch: bool,
        cancel: &CancellationToken,
    ) -> Result<EnrichmentSummary, EngineError> {
        let mut summary = EnrichmentSummary {
            requested: targets.len(),
            ..EnrichmentSummary::default()
        };
        let total_batches = targets.len().div_ceil(self.batch_size);
        info!(
            "🚀 Enriching {} rows in {} batches of {} (force_fetch: {})",
            targets.len(),
            total_batches,
            self.batch_size,
            force_fetch
        );

        for (batch_index, batch) in targets.chunks(self.batch_size).enumerate() {
            if cancel.is_cancelled() {
                info!("🛑 Enrichment cancelled before batch {}", batch_index + 1);
                return Err(EngineError::Cancelled);
            }

            summary.skipped += batch.iter().filter(|target| target.is_error).count();
            let mut in_flight: FuturesUnordered<_> = batch
                .iter()
                .filter(|target| !target.is_error)
                .map(|target| async move {
                    let outcome = self.lookup(&target.code, force_fetch, cancel).await;
                    (target, outcome)
                })
                .collect();

            let mut halt: Option<EngineError> = None;
            while let Some((target, outcome)) = in_flight.next().await {
                match outcome {
                    RowOutcome::Failed(ApiError::Cancelled) => {
                        halt.get_or_insert(EngineError::Cancelled);
                    }
                    RowOutcome::Failed(err) => {
                        if err.is_credential() {
                            warn!("🔒 Credential rejected while enriching {}", target.code);
                            halt = Some(err.clone().into());
                        } else {
                            warn!("⚠️ Enrichment of {} failed: {}", target.code, err);
                        }
                        summary.failed += 1;
                        self.commit(target, |row| {
                            row.descriptor = Descriptor::Failed;
                            row.channels.clear();
                        })
                        .await;
                    }
                    RowOutcome::Enriched {
                        descriptor,
                        channels,
                    } => {
                        summary.enriched += 1;
                        let today = self.today;
                        self.commit(target, |row| {
                            row.descriptor = descriptor;
                            row.channels = channels
                                .iter()
                                .map(|record| Channel::from_record(record, today))
                                .collect();
                        })
                        .await;
                    }
                }
            }

            self.emit(EngineEvent::BatchCompleted {
                session_id: self.session_id.clone(),
                batch_index,
                completed: summary.completed(),
                total: summary.requested,
            });
            debug!(
                "Batch {}/{} done ({} of {} rows)",
                batch_index + 1,
                total_batches,
                summary.completed(),
                summary.requested
            );

            if let Some(err) = halt {
                return Err(err);
            }
        }

        info!(
            "✅ Enrichment finished: {} enriched, {} failed, {} skipped",
            summary.enriched, summary.failed, summary.skipped
        );
        Ok(summary)
    }

    async fn lookup(&self, code: &str, force_fetch: bool, cancel: &CancellationToken) -> RowOutcome {
        let api = &self.api;
        let (descriptor, channels) = tokio::join!(
            self.cache.descriptors.get_or_fetch(code, force_fetch, || async move {
                let records = api.query_descriptor(code, cancel).await?;
                Ok::<_, ApiError>(Descriptor::from_records(&records))
            }),
            self.cache.channels.get_or_fetch(code, force_fetch, || async move {
                let query = ChannelQuery::ByMaster {
                    code: code.to_string(),
                };
                Ok::<_, ApiError>(api.query_channels(&query, cancel).await?.records)
            }),
        );

        match (descriptor, channels) {
            (Ok(descriptor), Ok(channels)) => RowOutcome::Enriched {
                descriptor,
                channels,
            },
            (Err(ApiError::Cancelled), _) | (_, Err(ApiError::Cancelled)) => {
                RowOutcome::Failed(ApiError::Cancelled)
            }
            (Err(err), _) | (_, Err(err)) => RowOutcome::Failed(err),
        }
    }

    /// Writes the outcome, recomputes anomalies and announces the row
    async fn commit<F>(&self, target: &EnrichTarget, apply: F)
    where
        F: FnOnce(&mut Row),
    {
        let updated = {
            let mut store = self.store.write().await;
            store.update_row(target.handle, |row| {
                apply(row);
                row.loading = false;
                row.anomalies = detect_anomaly(row);
            })
        };

        match updated {
            Some((index, row)) => self.emit(EngineEvent::RowUpdated {
                session_id: self.session_id.clone(),
                index,
                row: Box::new(row),
            }),
            None => debug!("Row {} left the result set before enrichment finished", target.code),
        }
    }

    fn emit(&self, event: EngineEvent) {
        if self.events.send(event).is_err() {
            debug!("No event subscribers");
        }
    }
}
