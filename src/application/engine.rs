//! Query session controller
//!
//! `CatalogEngine` owns the current query session: its result store, lookup
//! cache and cancellation tokens. `run_query` returns once the master records
//! are in the store; enrichment continues on a spawned task and reports
//! through the broadcast event stream.

use chrono::{Local, NaiveDate};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::cache::DetailCache;
use super::dispatcher::{build_rows, QueryDispatcher};
use super::enrichment::EnrichmentPipeline;
use super::error::EngineError;
use super::result_store::{EnrichTarget, ExportRow, ResultStore, StoreCounts, View, ViewParams};
use crate::domain::{Descriptor, EngineEvent, EnrichmentSummary, LabelTables, QueryRequest};
use crate::infrastructure::catalog_api::CatalogApi;
use crate::infrastructure::config::AppConfig;

const EVENT_CHANNEL_CAPACITY: usize = 1000;

type EnrichmentTask = JoinHandle<Result<EnrichmentSummary, EngineError>>;

/// 쿼리 세션 상태
struct QuerySession {
    id: String,
    store: Arc<RwLock<ResultStore>>,
    cache: Arc<DetailCache>,
    /// Fires when a newer query replaces this session
    retired: CancellationToken,
    /// Token of the work currently running; a child of `retired`
    work: Mutex<CancellationToken>,
    detail_runs: AtomicU32,
    tasks: Mutex<Vec<EnrichmentTask>>,
}

impl QuerySession {
    fn new(params: ViewParams) -> Self {
        let retired = CancellationToken::new();
        let work = retired.child_token();
        Self {
            id: Uuid::new_v4().to_string(),
            store: Arc::new(RwLock::new(ResultStore::with_params(params))),
            cache: Arc::new(DetailCache::new()),
            retired,
            work: Mutex::new(work),
            detail_runs: AtomicU32::new(0),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Token for new work; replaces a token that was cancelled earlier
    async fn token(&self) -> CancellationToken {
        let mut work = self.work.lock().await;
        if work.is_cancelled() && !self.retired.is_cancelled() {
            *work = self.retired.child_token();
        }
        work.clone()
    }

    async fn cancel(&self) {
        self.work.lock().await.cancel();
    }

    fn retire(&self) {
        self.retired.cancel();
    }

    /// Awaits every spawned enrichment task of this session
    async fn drain(&self) -> Result<EnrichmentSummary, EngineError> {
        let handles = std::mem::take(&mut *self.tasks.lock().await);
        let mut summary = EnrichmentSummary::default();
        let mut first_err = None;

        for handle in handles {
            match handle.await {
                Ok(Ok(partial)) => summary.absorb(partial),
                Ok(Err(err)) => {
                    first_err.get_or_insert(err);
                }
                Err(join_err) => {
                    first_err.get_or_insert(join_err.into());
                }
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(summary),
        }
    }
}

/// 카탈로그 조회 엔진
pub struct CatalogEngine {
    api: Arc<dyn CatalogApi>,
    dispatcher: QueryDispatcher,
    labels: LabelTables,
    enrichment_batch_size: usize,
    /// 이벤트 브로드캐스트 채널
    event_sender: broadcast::Sender<EngineEvent>,
    /// 현재 세션
    session: RwLock<Option<Arc<QuerySession>>>,
    /// Fixed clock for tests; the local date otherwise
    today: Option<NaiveDate>,
}

impl CatalogEngine {
    pub fn new(api: Arc<dyn CatalogApi>, config: &AppConfig) -> Self {
        let (event_sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            dispatcher: QueryDispatcher::new(api.clone(), config),
            api,
            labels: config.labels.clone(),
            enrichment_batch_size: config.query.effective_enrichment_batch_size(),
            event_sender,
            session: RwLock::new(None),
            today: None,
        }
    }

    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Local::now().date_naive())
    }

    /// 이벤트 수신자 생성
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.event_sender.subscribe()
    }

    async fn current(&self) -> Option<Arc<QuerySession>> {
        self.session.read().await.clone()
    }

    pub async fn session_id(&self) -> Option<String> {
        self.current().await.map(|s| s.id.clone())
    }

    /// Starts a new query session.
    ///
    /// Any previous session is cancelled and its cache dropped. Resolves with
    /// the row count once the master records are stored; enrichment keeps
    /// running in the background.
    pub async fn run_query(&self, request: QueryRequest) -> Result<usize, EngineError> {
        let params = match self.current().await {
            Some(previous) => ViewParams {
                page_number: 1,
                ..previous.store.read().await.params().clone()
            },
            None => ViewParams::default(),
        };

        let session = Arc::new(QuerySession::new(params));
        if let Some(previous) = self.session.write().await.replace(session.clone()) {
            debug!("Retiring session {}", previous.id);
            previous.retire();
        }

        info!("🔍 Query session {} started: {}", session.id, request.mode);
        self.emit(EngineEvent::QueryStarted {
            session_id: session.id.clone(),
            mode: request.mode,
        });

        let cancel = session.token().await;
        let entries = match self.dispatcher.dispatch(&request, &cancel).await {
            Ok(entries) => entries,
            Err(err) => {
                self.report_failure(&session.id, &err);
                return Err(err);
            }
        };

        let rows = build_rows(entries, &self.labels, self.today(), 1);
        let total_rows = rows.len();
        let error_rows = rows.iter().filter(|r| r.is_error()).count();
        let targets = {
            let mut store = session.store.write().await;
            store.replace_rows(rows);
            store.enrichment_targets(|_| true)
        };

        info!(
            "📋 {} rows loaded ({} unresolved), enrichment starting",
            total_rows, error_rows
        );
        self.emit(EngineEvent::MasterLoaded {
            session_id: session.id.clone(),
            total_rows,
            error_rows,
        });

        self.spawn_enrichment(&session, targets, false, cancel).await;
        Ok(total_rows)
    }

    /// Stops the work of the current session. Rows already enriched keep
    /// their data. Returns false when no query has been run.
    pub async fn cancel(&self) -> bool {
        match self.current().await {
            Some(session) => {
                info!("🛑 Cancelling session {}", session.id);
                session.cancel().await;
                true
            }
            None => false,
        }
    }

    /// Waits until every enrichment task of the current session has ended
    pub async fn wait_for_enrichment(&self) -> Result<EnrichmentSummary, EngineError> {
        let session = self.current().await.ok_or(EngineError::NoSession)?;
        session.drain().await
    }

    /// Whether the next `handle_detail_query` clears the cache and refetches
    /// every row
    pub async fn detail_query_is_destructive(&self) -> bool {
        match self.current().await {
            Some(session) => session.detail_runs.load(Ordering::SeqCst) > 0,
            None => false,
        }
    }

    /// Re-runs enrichment for the current result set.
    ///
    /// The first call only picks up rows that are still loading. Later calls
    /// clear the whole cache and refetch every resolvable row. Running
    /// enrichment is stopped first. Returns the number of rows scheduled.
    pub async fn handle_detail_query(&self) -> Result<usize, EngineError> {
        let session = self.current().await.ok_or(EngineError::NoSession)?;

        session.cancel().await;
        if let Err(err) = session.drain().await {
            debug!("Previous enrichment ended with: {}", err);
        }

        let destructive = session.detail_runs.fetch_add(1, Ordering::SeqCst) > 0;
        let cancel = session.token().await;

        let targets = if destructive {
            warn!("♻️ Clearing lookup cache and refetching every row");
            session.cache.clear().await;
            let mut store = session.store.write().await;
            let targets = store.enrichment_targets(|row| !row.is_error());
            for target in &targets {
                store.update_row(target.handle, |row| {
                    row.loading = true;
                    row.descriptor = Descriptor::Loading;
                    row.channels.clear();
                    row.anomalies.clear();
                });
            }
            targets
        } else {
            session
                .store
                .read()
                .await
                .enrichment_targets(|row| row.loading && !row.is_error())
        };

        let scheduled = targets.len();
        info!("🔁 Detail query scheduled {} rows", scheduled);
        self.spawn_enrichment(&session, targets, destructive, cancel).await;
        Ok(scheduled)
    }

    /// Looks the row's code up again and splices the result in its place.
    ///
    /// The replacement rows are renumbered with the rest of the set and
    /// enriched bypassing the cache. Returns how many rows were inserted.
    pub async fn retry_row(&self, index: usize) -> Result<usize, EngineError> {
        let session = self.current().await.ok_or(EngineError::NoSession)?;

        let (handle, code) = {
            let store = session.store.read().await;
            let len = store.len();
            match (store.handle(index), store.row(index)) {
                (Some(handle), Some(row)) => (handle, row.code.clone()),
                _ => return Err(EngineError::RowOutOfRange { index, len }),
            }
        };

        info!("🔄 Retrying row {} ({})", index + 1, code);
        let cancel = session.token().await;
        let entries = match self.dispatcher.dispatch_codes(&[code], &cancel).await {
            Ok(entries) => entries,
            Err(err) => {
                self.report_failure(&session.id, &err);
                return Err(err);
            }
        };

        let rows = build_rows(entries, &self.labels, self.today(), 0);
        let inserted = rows.len();
        let (targets, announced) = {
            let mut store = session.store.write().await;
            let len = store.len();
            let targets = store
                .splice(handle, rows)
                .ok_or(EngineError::RowOutOfRange { index, len })?;
            let announced: Vec<_> = targets
                .iter()
                .filter_map(|t| store.locate(t.handle).and_then(|i| store.row(i).map(|r| (i, r.clone()))))
                .collect();
            (targets, announced)
        };

        for (index, row) in announced {
            self.emit(EngineEvent::RowUpdated {
                session_id: session.id.clone(),
                index,
                row: Box::new(row),
            });
        }

        self.spawn_enrichment(&session, targets, true, cancel).await;
        Ok(inserted)
    }

    /// Page of the current result set under `params`
    pub async fn get_view(&self, params: &ViewParams) -> View {
        match self.current().await {
            Some(session) => session.store.read().await.view_with(params),
            None => View::empty(),
        }
    }

    /// Page under the store's own view parameters
    pub async fn view(&self) -> View {
        match self.current().await {
            Some(session) => session.store.read().await.view(),
            None => View::empty(),
        }
    }

    /// Applies view parameter changes and returns the refreshed view
    pub async fn update_view<F>(&self, update: F) -> View
    where
        F: FnOnce(&mut ResultStore),
    {
        match self.current().await {
            Some(session) => {
                let mut store = session.store.write().await;
                update(&mut store);
                store.view()
            }
            None => View::empty(),
        }
    }

    pub async fn export(&self, params: &ViewParams) -> Vec<ExportRow> {
        match self.current().await {
            Some(session) => session.store.read().await.export_rows(params),
            None => Vec::new(),
        }
    }

    pub async fn counts(&self) -> StoreCounts {
        match self.current().await {
            Some(session) => session.store.read().await.counts(),
            None => StoreCounts::default(),
        }
    }

    async fn spawn_enrichment(
        &self,
        session: &Arc<QuerySession>,
        targets: Vec<EnrichTarget>,
        force_fetch: bool,
        cancel: CancellationToken,
    ) {
        let pipeline = EnrichmentPipeline::new(
            self.api.clone(),
            session.cache.clone(),
            session.store.clone(),
            self.event_sender.clone(),
            session.id.clone(),
        )
        .with_batch_size(self.enrichment_batch_size)
        .with_today(self.today());

        let events = self.event_sender.clone();
        let store = session.store.clone();
        let session_id = session.id.clone();

        let handle = tokio::spawn(async move {
            let result = pipeline.run(targets, force_fetch, &cancel).await;
            let event = match &result {
                Ok(summary) => EngineEvent::EnrichmentFinished {
                    session_id,
                    summary: *summary,
                },
                Err(err) if err.is_cancelled() => {
                    let counts = store.read().await.counts();
                    EngineEvent::EnrichmentCancelled {
                        session_id,
                        completed: counts.total - counts.loading,
                    }
                }
                Err(err) => {
                    warn!("❌ Enrichment stopped: {}", err);
                    EngineEvent::QueryFailed {
                        session_id,
                        message: err.to_string(),
                        credential: err.is_credential(),
                    }
                }
            };
            if events.send(event).is_err() {
                debug!("No event subscribers");
            }
            result
        });

        session.tasks.lock().await.push(handle);
    }

    fn report_failure(&self, session_id: &str, err: &EngineError) {
        if err.is_cancelled() {
            info!("Query session {} cancelled", session_id);
            return;
        }
        warn!("❌ Query session {} failed: {}", session_id, err);
        self.emit(EngineEvent::QueryFailed {
            session_id: session_id.to_string(),
            message: err.to_string(),
            credential: err.is_credential(),
        });
    }

    fn emit(&self, event: EngineEvent) {
        if self.event_sender.send(event).is_err() {
            debug!("No event subscribers");
        }
    }
}
