//! Sync orchestration.
//!
//! A run is the cross product of projects and entity types; each pair is a
//! *unit*. Units run concurrently (bounded by `sync.max_concurrent_units`)
//! and fail independently. Within a unit the pipeline is:
//!
//! ```text
//! PageStream ──► window guard ──► transform ──► buffer
//!                                                 │ (≥ embed batch size, or end of stream)
//!                                                 ▼
//!                      embed_batched ──► VectorStore::upsert ──► CheckpointStore::set
//! ```
//!
//! The checkpoint only moves after the records it covers are upserted, so
//! an interrupted unit resumes from the last flushed page on the next run.
//! An authentication failure anywhere cancels every unit and abandons
//! whatever they have buffered.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use reportportal_sync_core::embedding::Embedder;
use reportportal_sync_core::models::{
    EntityType, NormalizedRecord, StoreCount, SyncCheckpoint, SyncType, VectorRecord,
};
use reportportal_sync_core::run::{RunState, SyncRun, UnitReport};
use reportportal_sync_core::store::{CheckpointStore, VectorStore};
use reportportal_sync_core::transform::transform;

use crate::config::Config;
use crate::embedding::embed_batched;
use crate::error::SyncError;
use crate::fetcher::{EntityFetcher, PageStream};
use crate::progress::{NoProgress, SyncProgressEvent, SyncProgressReporter};
use crate::strategy::{CheckpointAction, SyncStrategy};

/// Tunables for [`SyncOrchestrator`].
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Buffered records that trigger a flush; also the embedding slice size.
    pub embed_batch_size: usize,
    pub max_concurrent_units: usize,
    pub lookback_days: u32,
    pub default_project: Option<String>,
    pub enable_full_sync: bool,
    pub enable_incremental_sync: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            embed_batch_size: 32,
            max_concurrent_units: 4,
            lookback_days: 7,
            default_project: None,
            enable_full_sync: true,
            enable_incremental_sync: true,
        }
    }
}

impl SyncOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            embed_batch_size: config.embedding.batch_size,
            max_concurrent_units: config.sync.max_concurrent_units,
            lookback_days: config.sync.lookback_days,
            default_project: config.api.default_project.clone(),
            enable_full_sync: config.sync.enable_full_sync,
            enable_incremental_sync: config.sync.enable_incremental_sync,
        }
    }
}

/// What to sync. Empty lists mean "the defaults".
#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub sync_type: SyncType,
    pub project_names: Vec<String>,
    pub entity_types: Vec<EntityType>,
}

impl SyncRequest {
    pub fn full() -> Self {
        Self {
            sync_type: SyncType::Full,
            project_names: Vec::new(),
            entity_types: Vec::new(),
        }
    }

    pub fn incremental() -> Self {
        Self {
            sync_type: SyncType::Incremental,
            project_names: Vec::new(),
            entity_types: Vec::new(),
        }
    }

    pub fn with_projects<I, S>(mut self, projects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.project_names = projects.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_entity_types(mut self, entity_types: impl IntoIterator<Item = EntityType>) -> Self {
        self.entity_types = entity_types.into_iter().collect();
        self
    }
}

/// Checkpoints and stored record counts, as returned by [`SyncOrchestrator::status`].
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub checkpoints: Vec<SyncCheckpoint>,
    pub records: Vec<StoreCount>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OrchestratorState {
    Idle,
    Running(SyncType),
}

/// Returns the orchestrator to `Idle` when the run ends, however it ends.
struct RunGuard<'a> {
    state: &'a Mutex<OrchestratorState>,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            *state = OrchestratorState::Idle;
        }
    }
}

/// Mutable state of one unit while it runs.
struct UnitRun {
    report: UnitReport,
    buffer: Vec<(NormalizedRecord, String)>,
    /// Highest `last_synced_at` known to be stored for this unit.
    watermark: Option<DateTime<Utc>>,
    /// Cursor of the newest buffered page.
    cursor: Option<String>,
    /// Set once any entity failed to embed; later flushes keep the checkpoint.
    checkpoint_blocked: bool,
}

pub struct SyncOrchestrator {
    fetcher: Arc<dyn EntityFetcher>,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    progress: Arc<dyn SyncProgressReporter>,
    options: SyncOptions,
    state: Mutex<OrchestratorState>,
}

impl SyncOrchestrator {
    pub fn new(
        fetcher: Arc<dyn EntityFetcher>,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        options: SyncOptions,
    ) -> Self {
        Self {
            fetcher,
            embedder,
            store,
            checkpoints,
            progress: Arc::new(NoProgress),
            options,
            state: Mutex::new(OrchestratorState::Idle),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn SyncProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn is_running(&self) -> bool {
        self.state
            .lock()
            .map(|s| matches!(*s, OrchestratorState::Running(_)))
            .unwrap_or(false)
    }

    fn begin(&self, sync_type: SyncType) -> Result<RunGuard<'_>> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow!("orchestrator state lock poisoned"))?;
        if let OrchestratorState::Running(current) = *state {
            bail!("a {} sync is already running", current);
        }
        *state = OrchestratorState::Running(sync_type);
        Ok(RunGuard { state: &self.state })
    }

    fn strategy_for(&self, sync_type: SyncType) -> Result<SyncStrategy> {
        match sync_type {
            SyncType::Full if !self.options.enable_full_sync => {
                bail!("full sync is disabled (sync.enable_full_sync = false)")
            }
            SyncType::Incremental if !self.options.enable_incremental_sync => {
                bail!("incremental sync is disabled (sync.enable_incremental_sync = false)")
            }
            SyncType::Full => Ok(SyncStrategy::Full),
            SyncType::Incremental => Ok(SyncStrategy::incremental_days(self.options.lookback_days)),
        }
    }

    /// Run one sync to completion.
    ///
    /// Returns `Err` only when the run cannot start (already running, or
    /// the requested mode is disabled). Everything that goes wrong once
    /// the run has started is reported in the returned [`SyncRun`].
    /// Cancelling `cancel` stops every unit between pages; already-fetched
    /// pages are still flushed.
    pub async fn sync(&self, request: SyncRequest, cancel: CancellationToken) -> Result<SyncRun> {
        let strategy = self.strategy_for(request.sync_type)?;
        let _guard = self.begin(request.sync_type)?;

        let run_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let entity_types = dedup(if request.entity_types.is_empty() {
            EntityType::ALL.to_vec()
        } else {
            request.entity_types
        });

        tracing::info!(%run_id, sync_type = %request.sync_type, "sync started");

        let project_names = match self.resolve_projects(request.project_names).await {
            Ok(projects) => projects,
            Err(err) => {
                tracing::error!(%run_id, error = %err, "could not determine projects to sync");
                return Ok(SyncRun {
                    run_id,
                    sync_type: request.sync_type,
                    project_names: Vec::new(),
                    entity_types,
                    started_at,
                    finished_at: Utc::now(),
                    state: RunState::Failed,
                    units: Vec::new(),
                    errors: vec![err.to_string()],
                });
            }
        };

        let units: Vec<(String, EntityType)> = project_names
            .iter()
            .flat_map(|project| entity_types.iter().map(move |et| (project.clone(), *et)))
            .collect();

        let abort = cancel.child_token();
        let auth_failed = AtomicBool::new(false);

        let mut reports: Vec<(usize, UnitReport)> = stream::iter(units.into_iter().enumerate())
            .map(|(index, (project, entity_type))| {
                let abort = &abort;
                let auth_failed = &auth_failed;
                let span = tracing::info_span!("unit", project = %project, entity_type = %entity_type);
                async move {
                    let report = self
                        .sync_unit(strategy, &project, entity_type, abort, auth_failed)
                        .await;
                    (index, report)
                }
                .instrument(span)
            })
            .buffer_unordered(self.options.max_concurrent_units.max(1))
            .collect()
            .await;
        reports.sort_by_key(|(index, _)| *index);
        let units: Vec<UnitReport> = reports.into_iter().map(|(_, report)| report).collect();

        let aborted = auth_failed.load(Ordering::SeqCst);
        let mut errors = Vec::new();
        if aborted {
            errors.push("run aborted: authentication failed".to_string());
        } else if cancel.is_cancelled() {
            errors.push("run cancelled".to_string());
        }

        let run = SyncRun {
            state: SyncRun::overall_state(&units, aborted),
            run_id,
            sync_type: request.sync_type,
            project_names,
            entity_types,
            started_at,
            finished_at: Utc::now(),
            units,
            errors,
        };
        let totals = run.totals();
        tracing::info!(
            run_id = %run.run_id,
            state = ?run.state,
            upserted = totals.upserted,
            failed = totals.failed,
            "sync finished"
        );
        Ok(run)
    }

    /// Checkpoints per unit plus stored record counts.
    pub async fn status(&self) -> Result<SyncStatus> {
        Ok(SyncStatus {
            checkpoints: self.checkpoints.list().await?,
            records: self.store.stats().await?,
        })
    }

    async fn resolve_projects(&self, requested: Vec<String>) -> Result<Vec<String>, SyncError> {
        if !requested.is_empty() {
            return Ok(dedup(requested));
        }
        if let Some(project) = &self.options.default_project {
            return Ok(vec![project.clone()]);
        }
        self.fetcher.list_projects().await
    }

    async fn sync_unit(
        &self,
        strategy: SyncStrategy,
        project: &str,
        entity_type: EntityType,
        abort: &CancellationToken,
        auth_failed: &AtomicBool,
    ) -> UnitReport {
        let mut unit = UnitRun {
            report: UnitReport::new(project, entity_type),
            buffer: Vec::new(),
            watermark: None,
            cursor: None,
            checkpoint_blocked: false,
        };
        if abort.is_cancelled() {
            unit.report.finish(true);
            return unit.report;
        }

        let unit_started_at = Utc::now();
        self.progress.report(SyncProgressEvent::UnitStarted {
            project: project.to_string(),
            entity_type,
            sync_type: strategy.sync_type(),
        });

        let checkpoint = if strategy.reads_checkpoint() {
            match self.checkpoints.get(project, entity_type).await {
                Ok(checkpoint) => checkpoint,
                Err(e) => {
                    let err = SyncError::CheckpointUnavailable(e.to_string());
                    tracing::warn!(error = %err, "using default lookback window");
                    None
                }
            }
        } else {
            None
        };
        unit.watermark = checkpoint.as_ref().map(|c| c.last_synced_at);
        let since = strategy.compute_fetch_window(checkpoint.as_ref(), unit_started_at);
        tracing::debug!(since = ?since, "fetch window");

        let mut pages = PageStream::new(self.fetcher.as_ref(), entity_type, project, since);
        let mut reconciled = !strategy.reconciles();
        let mut cancelled = false;
        // Set once every page of the window has been pulled.
        let mut exhausted = false;

        loop {
            if abort.is_cancelled() {
                cancelled = true;
                break;
            }
            let page = match pages.next_page().await {
                None => {
                    exhausted = true;
                    break;
                }
                Some(Ok(page)) => page,
                Some(Err(err)) => {
                    if err.is_fatal() {
                        auth_failed.store(true, Ordering::SeqCst);
                        abort.cancel();
                    }
                    tracing::warn!(cursor = ?pages.cursor(), error = %err, "page fetch failed");
                    unit.report.record_error(&err);
                    break;
                }
            };

            unit.report.stats.pages += 1;
            unit.report.stats.fetched += page.entities.len() as u64;
            self.progress.report(SyncProgressEvent::PageFetched {
                project: project.to_string(),
                entity_type,
                page: unit.report.stats.pages,
                entities: page.entities.len() as u64,
            });

            if !reconciled {
                match self.store.delete_where(project, entity_type).await {
                    Ok(removed) => {
                        tracing::debug!(removed, "cleared stored records for full sync");
                        reconciled = true;
                    }
                    Err(e) => {
                        let err = SyncError::UpsertFailed(e.to_string());
                        tracing::warn!(error = %err, "could not clear stored records");
                        unit.report.record_error(&err);
                        break;
                    }
                }
            }

            for entity in &page.entities {
                if let (Some(since), Some(modified)) = (since, entity.last_modified_at) {
                    if modified <= since {
                        continue;
                    }
                }
                match transform(entity) {
                    Ok(pair) => {
                        unit.report.stats.transformed += 1;
                        unit.buffer.push(pair);
                    }
                    Err(e) => {
                        let err = SyncError::from(e);
                        tracing::warn!(entity_id = ?entity.id, error = %err, "skipping entity");
                        unit.report.stats.failed += 1;
                        unit.report.record_error(&err);
                    }
                }
            }
            unit.cursor = Some(page.cursor);

            if unit.buffer.len() >= self.options.embed_batch_size
                && !self
                    .flush(strategy, project, entity_type, &mut unit, pages.is_finished())
                    .await
            {
                break;
            }
        }

        if !unit.buffer.is_empty() && !auth_failed.load(Ordering::SeqCst) {
            self.flush(strategy, project, entity_type, &mut unit, exhausted)
                .await;
        }

        unit.report.finish(cancelled);

        if let CheckpointAction::ResetTo(ts) = strategy.on_complete(unit.report.state, unit_started_at) {
            match self.reset_checkpoint(project, entity_type, ts).await {
                Ok(()) => unit.watermark = Some(ts),
                Err(e) => {
                    let err = SyncError::CheckpointUnavailable(e.to_string());
                    tracing::warn!(error = %err, "could not reset checkpoint after full sync");
                }
            }
        }
        unit.report.checkpoint = unit.watermark;

        let stats = &unit.report.stats;
        tracing::info!(
            state = ?unit.report.state,
            pages = stats.pages,
            upserted = stats.upserted,
            failed = stats.failed,
            "unit finished"
        );
        self.progress.report(SyncProgressEvent::UnitFinished {
            project: project.to_string(),
            entity_type,
            state: unit.report.state,
            upserted: stats.upserted,
            failed: stats.failed,
        });
        unit.report
    }

    async fn reset_checkpoint(
        &self,
        project: &str,
        entity_type: EntityType,
        ts: DateTime<Utc>,
    ) -> Result<()> {
        self.checkpoints.reset(project, entity_type).await?;
        self.checkpoints
            .set(&SyncCheckpoint::new(project, entity_type, ts))
            .await?;
        Ok(())
    }

    /// Embed and upsert everything buffered, then advance the checkpoint.
    /// Returns `false` when the unit must stop.
    ///
    /// Unless the stream is `exhausted`, the checkpoint stops short of the
    /// newest flushed timestamp: an unread page may open with entities
    /// modified at that same instant, and `filter.gt` would skip them.
    async fn flush(
        &self,
        strategy: SyncStrategy,
        project: &str,
        entity_type: EntityType,
        unit: &mut UnitRun,
        exhausted: bool,
    ) -> bool {
        let batch = std::mem::take(&mut unit.buffer);
        let documents: Vec<String> = batch.iter().map(|(_, doc)| doc.clone()).collect();
        let outcome =
            embed_batched(self.embedder.as_ref(), &documents, self.options.embed_batch_size).await;
        unit.report.stats.embed_batches += outcome.batches;

        let mut records = Vec::with_capacity(batch.len());
        let mut embed_failed = 0usize;
        for ((record, document), vector) in batch.into_iter().zip(outcome.vectors) {
            match vector {
                Some(vector) => records.push(VectorRecord::new(record, document, vector)),
                None => embed_failed += 1,
            }
        }
        if embed_failed > 0 {
            let err = SyncError::EmbeddingFailed {
                count: embed_failed,
                message: outcome.errors.first().cloned().unwrap_or_default(),
            };
            tracing::warn!(count = embed_failed, error = %err, "checkpoint held back");
            unit.report.stats.failed += embed_failed as u64;
            unit.report.record_error(&err);
            unit.checkpoint_blocked = true;
        }
        if records.is_empty() {
            return true;
        }

        match self.store.upsert(&records).await {
            Ok(written) => unit.report.stats.upserted += written,
            Err(e) => {
                let err = SyncError::UpsertFailed(e.to_string());
                tracing::warn!(count = records.len(), error = %err, "flush failed");
                unit.report.record_error(&err);
                return false;
            }
        }
        self.progress.report(SyncProgressEvent::Flushed {
            project: project.to_string(),
            entity_type,
            upserted: records.len() as u64,
            total_upserted: unit.report.stats.upserted,
        });

        if !strategy.advances_checkpoint() || unit.checkpoint_blocked {
            return true;
        }
        let Some(newest) = safe_watermark(
            records.iter().filter_map(|r| r.metadata.last_modified_at),
            exhausted,
        ) else {
            return true;
        };
        if unit.watermark.is_some_and(|w| newest <= w) {
            return true;
        }
        let checkpoint =
            SyncCheckpoint::new(project, entity_type, newest).with_cursor(unit.cursor.clone());
        match self.checkpoints.set(&checkpoint).await {
            Ok(_) => unit.watermark = Some(newest),
            Err(e) => {
                let err = SyncError::CheckpointUnavailable(e.to_string());
                tracing::warn!(error = %err, "checkpoint not advanced");
            }
        }
        true
    }
}

/// Newest timestamp the checkpoint may move to after a flush.
///
/// With pages still unread, the newest flushed instant is excluded.
fn safe_watermark<I>(timestamps: I, exhausted: bool) -> Option<DateTime<Utc>>
where
    I: IntoIterator<Item = DateTime<Utc>>,
{
    let timestamps: Vec<DateTime<Utc>> = timestamps.into_iter().collect();
    let newest = timestamps.iter().max().copied()?;
    if exhausted {
        return Some(newest);
    }
    timestamps.into_iter().filter(|ts| *ts < newest).max()
}

fn dedup<T: PartialEq>(items: Vec<T>) -> Vec<T> {
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}
