use chrono::Duration;
use tracing::{error, info, warn};

use freightdesk_core::config::CrmConfig;
use freightdesk_core::{
    BatchStatus, EntitySummary, RunCounters, StopReason, SyncAction, SyncEntityType, SyncReport,
    SyncRequest, SyncRunStatus, SyncScope,
};
use freightdesk_db::repositories::{
    BatchProgressRepository, ConnectionRepository, FieldMappingRepository, RecordRepository,
    RepositoryError, SyncRunRepository,
};
use freightdesk_db::DbPool;

use crate::client::CrmApiClient;
use crate::error::SyncError;
use crate::fetcher::{FetchSettings, PageFetcher};
use crate::reconciler::reconcile_page;
use crate::token::TokenManager;

/// A `running` row older than this belongs to a process that died mid-run.
const STALE_RUN_CUTOFF_MINUTES: i64 = 60;

/// Drives one sync run: token upkeep, then a serial entity loop in the fixed
/// dependency order, with page-level persistence so an interrupted run
/// resumes where it stopped.
///
/// Failure scoping: a token failure fails the whole run before any fetch; an
/// API failure ends one entity's loop and the run moves on to the next
/// entity; a storage failure aborts the rest of the run; a bad record fails
/// alone inside its page.
pub struct SyncOrchestrator<C> {
    client: C,
    crm: CrmConfig,
    connections: ConnectionRepository,
    mappings: FieldMappingRepository,
    records: RecordRepository,
    runs: SyncRunRepository,
    progress: BatchProgressRepository,
}

impl<C: CrmApiClient> SyncOrchestrator<C> {
    pub fn new(pool: DbPool, client: C, crm: CrmConfig) -> Self {
        Self {
            client,
            crm,
            connections: ConnectionRepository::new(pool.clone()),
            mappings: FieldMappingRepository::new(pool.clone()),
            records: RecordRepository::new(pool.clone()),
            runs: SyncRunRepository::new(pool.clone()),
            progress: BatchProgressRepository::new(pool),
        }
    }

    /// Runs one invocation for a user. At most one run per user is in
    /// flight; a second invocation is rejected, not queued.
    pub async fn run(&self, user_id: &str, request: &SyncRequest) -> Result<SyncReport, SyncError> {
        if request.action == SyncAction::Export {
            return Err(SyncError::ExportUnsupported);
        }
        let reaped = self
            .runs
            .fail_stale(user_id, Duration::minutes(STALE_RUN_CUTOFF_MINUTES))
            .await?;
        if reaped > 0 {
            warn!(user_id, reaped, "closed stale runs left behind by an interrupted process");
        }
        if self.runs.has_running(user_id).await? {
            return Err(SyncError::RunInProgress);
        }

        let run_id = self.runs.start(user_id, request.action.as_str()).await?;
        info!(user_id, run_id = %run_id, action = request.action.as_str(),
            scope = %request.scope.label(), "sync run started");

        let token = match TokenManager::new(&self.client, &self.connections)
            .ensure_valid(user_id)
            .await
        {
            Ok(token) => token,
            Err(token_error) => {
                error!(user_id, run_id = %run_id, error = %token_error,
                    "sync run aborted before any fetch");
                let errors = vec![token_error.to_string()];
                self.runs
                    .finalize(&run_id, SyncRunStatus::Failed, RunCounters::default(), &errors)
                    .await?;
                return Ok(SyncReport {
                    run_id,
                    status: SyncRunStatus::Failed,
                    processed: 0,
                    success: 0,
                    failed: 0,
                    errors,
                    entities: Vec::new(),
                });
            }
        };

        let full = request.full_sync || request.action == SyncAction::FullImport;
        let settings = self.resolve_settings(request, full);

        let mut totals = RunCounters::default();
        let mut errors = Vec::new();
        let mut entities = Vec::new();
        let mut storage_aborted = false;

        let scope_entities = request.scope.entities();
        for entity in &scope_entities {
            match self.sync_entity(user_id, &token, *entity, settings, full).await {
                Ok((summary, entity_errors)) => {
                    totals.merge(summary.counters);
                    errors.extend(entity_errors);
                    entities.push(summary);
                }
                Err(storage_error) => {
                    // Storage is shared across entity loops; if it is down
                    // for one entity it is down for all of them.
                    error!(user_id, run_id = %run_id, entity = %entity,
                        error = %storage_error, "sync run aborted on storage failure");
                    errors.push(format!("{entity}: {storage_error}"));
                    totals.failed += 1;
                    storage_aborted = true;
                    break;
                }
            }
        }

        // API failures are reported per entity, not fatal: the run completed
        // once every requested entity type was attempted.
        let status = if storage_aborted {
            SyncRunStatus::Failed
        } else {
            SyncRunStatus::Completed
        };
        self.runs.finalize(&run_id, status, totals, &errors).await?;
        info!(user_id, run_id = %run_id, status = status.as_str(),
            processed = totals.processed, success = totals.success, failed = totals.failed,
            "sync run finished");

        Ok(SyncReport {
            run_id,
            status,
            processed: totals.processed,
            success: totals.success,
            failed: totals.failed,
            errors,
            entities,
        })
    }

    /// Continues an interrupted import for one entity type from its stored
    /// cursor.
    pub async fn resume(
        &self,
        user_id: &str,
        entity: SyncEntityType,
    ) -> Result<SyncReport, SyncError> {
        let request = SyncRequest {
            action: SyncAction::Import,
            scope: SyncScope::One(entity),
            full_sync: false,
            batch_size: None,
            max_pages: None,
        };
        self.run(user_id, &request).await
    }

    fn resolve_settings(&self, request: &SyncRequest, full: bool) -> FetchSettings {
        let (default_size, default_ceiling) = if full {
            (self.crm.full_page_size, self.crm.full_max_pages)
        } else {
            (self.crm.page_size, self.crm.max_pages)
        };
        FetchSettings {
            page_size: request.batch_size.unwrap_or(default_size).clamp(1, 100),
            max_pages: request.max_pages.unwrap_or(default_ceiling).max(1),
            page_delay_ms: self.crm.page_delay_ms,
        }
    }

    /// One entity type's page loop. API failures are absorbed here: the
    /// cursor keeps the pages that already landed and the loop reports what
    /// happened. Only storage failures propagate.
    async fn sync_entity(
        &self,
        user_id: &str,
        token: &str,
        entity: SyncEntityType,
        settings: FetchSettings,
        full: bool,
    ) -> Result<(EntitySummary, Vec<String>), RepositoryError> {
        self.mappings.ensure_defaults(user_id, entity).await?;
        let mappings = self.mappings.list_enabled(user_id, entity).await?;

        if full {
            self.progress.reset(user_id, entity).await?;
        } else if let Some(cursor) = self.progress.get(user_id, entity).await? {
            // Resumption is for interrupted imports. A finished one starts
            // over from page 1 so upstream edits are re-reconciled.
            if cursor.status == BatchStatus::Completed {
                self.progress.reset(user_id, entity).await?;
            }
        }
        self.progress.mark_active(user_id, entity).await?;
        let start_page = match self.progress.get(user_id, entity).await? {
            Some(cursor) => cursor.last_imported_page as u32 + 1,
            None => 1,
        };

        let mut fetcher = PageFetcher::new(&self.client, token, entity, settings, start_page);
        let mut counters = RunCounters::default();
        let mut errors = Vec::new();
        let mut pages = 0u32;

        loop {
            let page = match fetcher.next_page().await {
                Ok(Some(page)) => page,
                Ok(None) => break,
                Err(api_error) => {
                    let message = format!("{entity} page {}: {api_error}", pages + start_page);
                    warn!(user_id, entity = %entity, error = %api_error,
                        "entity sync aborted, cursor kept for resume");
                    counters.failed += 1;
                    errors.push(message.clone());
                    self.progress
                        .finish(user_id, entity, BatchStatus::Failed, Some(&message))
                        .await?;
                    let summary = EntitySummary { entity, pages, stop: None, counters };
                    return Ok((summary, errors));
                }
            };

            let record_count = page.records.len() as i64;
            let outcome =
                reconcile_page(&self.records, user_id, entity, &mappings, &page.records).await?;
            let imported = outcome.imported();
            self.progress.record_page(user_id, entity, page.number as i64, imported).await?;
            counters.merge(outcome.counters());
            errors.extend(outcome.errors);
            pages += 1;
            info!(user_id, entity = %entity, page = page.number, records = record_count,
                imported, "imported page");
        }

        // A ceiling stop is not completion; the cursor stays open so a
        // follow-up run picks up the remaining pages.
        let batch_status = match fetcher.stop_reason() {
            Some(StopReason::CeilingReached) => BatchStatus::Pending,
            _ => BatchStatus::Completed,
        };
        self.progress.finish(user_id, entity, batch_status, None).await?;
        let summary = EntitySummary { entity, pages, stop: fetcher.stop_reason(), counters };
        Ok((summary, errors))
    }
}
