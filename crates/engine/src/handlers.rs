//! Task handlers. Each consumes the task's opaque `params` blob, drives
//! the stores/fetchers, and returns the opaque `result` blob. Handlers
//! check for shutdown between units of work (chunks, employer fetches) so
//! cancellation lands at a clean boundary.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::watch;

use vh_auth::AuthRegistry;
use vh_domain::config::Config;
use vh_domain::filter::FiltersFile;
use vh_domain::task::{TaskRecord, TaskType};
use vh_domain::{Error, Result};
use vh_fetcher::{FetchChunkParams, Fetcher};
use vh_store::Store;

use crate::monitor::{host_status, SystemMonitor};

/// Hard cap on pages per load task, matching the upstream's practical
/// depth for one filter.
const MAX_PAGES_PER_TASK: u32 = 200;

/// Employer batch cap per `load_employers` run.
const EMPLOYER_BATCH_CAP: usize = 100;

#[derive(Clone)]
pub struct HandlerContext {
    pub store: Arc<Store>,
    pub config: Arc<Config>,
    pub auth: Arc<AuthRegistry>,
    pub monitor: Arc<SystemMonitor>,
    pub filters_path: PathBuf,
    pub shutdown: watch::Receiver<bool>,
}

impl HandlerContext {
    pub fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }
}

/// Execute one task to its result payload.
pub async fn run_task(ctx: &HandlerContext, task: &TaskRecord) -> Result<Value> {
    let Some(kind) = TaskType::parse(&task.kind) else {
        return Err(Error::Handler(format!("unknown task type: {}", task.kind)));
    };
    let params = task.params.clone().unwrap_or_else(|| json!({}));

    match kind {
        TaskType::LoadVacancies => load_vacancies(ctx, task, &params).await,
        TaskType::LoadEmployers => load_employers(ctx, &params).await,
        TaskType::Cleanup => cleanup(ctx, &params),
        TaskType::ProcessPipeline => process_pipeline(ctx, &params),
        TaskType::Test => test_task(ctx, &params).await,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// load_vacancies
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn load_vacancies(ctx: &HandlerContext, task: &TaskRecord, params: &Value) -> Result<Value> {
    let filter = resolve_filter(ctx, params)?;
    let mut fetcher = Fetcher::new(&ctx.config.api, ctx.store.clone(), ctx.auth.clone())?;

    let total_pages = match params.get("max_pages").and_then(Value::as_u64) {
        Some(n) if n > 0 => n as u32,
        _ => fetcher.estimate_total_pages(&filter).await,
    }
    .min(MAX_PAGES_PER_TASK);

    let pages_per_chunk = (ctx.config.task_dispatcher.chunk_size / 100).max(1) as u32;

    let mut loaded_count = 0u64;
    let mut processed_pages = 0u32;
    let mut chunks_processed = 0u32;
    let mut errors = Vec::new();
    let mut page = 0u32;

    while page < total_pages {
        if ctx.is_shutdown() {
            tracing::info!(task_id = %task.id, page, "load interrupted by shutdown");
            return Err(Error::TaskCancelled);
        }

        let page_end = (page + pages_per_chunk).min(total_pages);
        let report = fetcher
            .fetch_chunk(FetchChunkParams {
                page_start: page,
                page_end,
                filter: filter.clone(),
                task_id: Some(task.id.clone()),
            })
            .await;

        loaded_count += report.loaded_count;
        processed_pages += report.processed_pages;
        chunks_processed += 1;
        let chunk_errors = report.errors.len();
        errors.extend(report.errors);

        tracing::info!(
            task_id = %task.id,
            chunk = chunks_processed,
            loaded = loaded_count,
            errors = chunk_errors,
            "chunk finished"
        );

        // The chunk ended before its page range: short or empty page.
        let completed_range = report.last_page == i64::from(page_end) - 1
            && report.processed_pages == page_end - page;
        if !completed_range {
            break;
        }
        page = page_end;
    }

    Ok(json!({
        "loaded_count": loaded_count,
        "processed_pages": processed_pages,
        "chunks_processed": chunks_processed,
        "errors": errors,
        "filter_id": filter.get("id").cloned().unwrap_or(Value::Null),
    }))
}

/// A load task carries either an inline `filter`, a `filter_id` resolved
/// against the filters file, or flat filter params.
fn resolve_filter(ctx: &HandlerContext, params: &Value) -> Result<Value> {
    if let Some(filter) = params.get("filter") {
        return Ok(filter.clone());
    }
    if let Some(filter_id) = params.get("filter_id").and_then(Value::as_str) {
        let filters = FiltersFile::load(&ctx.filters_path)?;
        let spec = filters
            .get(filter_id)
            .ok_or_else(|| Error::Handler(format!("unknown filter id: {filter_id}")))?;
        return Ok(serde_json::to_value(spec)?);
    }
    Ok(params.clone())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// load_employers / cleanup
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn load_employers(ctx: &HandlerContext, params: &Value) -> Result<Value> {
    let batch = params
        .get("batch_size")
        .and_then(Value::as_u64)
        .map(|n| n as usize)
        .unwrap_or(EMPLOYER_BATCH_CAP)
        .min(EMPLOYER_BATCH_CAP);

    let ids = ctx.store.get_missing_employer_ids(batch)?;
    let mut fetcher = Fetcher::new(&ctx.config.api, ctx.store.clone(), ctx.auth.clone())?;

    let mut fetched = 0usize;
    let mut not_found = 0usize;
    let mut errors = 0usize;

    for id in &ids {
        if ctx.is_shutdown() {
            return Err(Error::TaskCancelled);
        }
        match fetcher.fetch_employer(id).await {
            Ok(Some(_)) => fetched += 1,
            Ok(None) => not_found += 1,
            Err(e) => {
                tracing::warn!(employer_id = %id, error = %e, "employer fetch failed");
                errors += 1;
            }
        }
    }

    Ok(json!({
        "requested": ids.len(),
        "fetched": fetched,
        "not_found": not_found,
        "errors": errors,
    }))
}

fn cleanup(ctx: &HandlerContext, params: &Value) -> Result<Value> {
    let days = params
        .get("keep_days")
        .and_then(Value::as_u64)
        .map(|n| n as u32)
        .unwrap_or(ctx.config.cleanup.days);
    let vacuum = params
        .get("vacuum_db")
        .and_then(Value::as_bool)
        .unwrap_or(true);

    let report = ctx.store.cleanup_old_tasks(days, vacuum)?;
    Ok(json!({
        "cleaned_tasks": report.cleaned_count,
        "days_kept": report.days_kept,
        "vacuumed": vacuum,
    }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// process_pipeline / test
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Reserved hook. Downstream host stubs are routed here by the scheduler;
/// anything else records a skipped result.
fn process_pipeline(ctx: &HandlerContext, params: &Value) -> Result<Value> {
    match params.get("stub").and_then(Value::as_str) {
        Some("sync_host2") => {
            if !ctx.config.hosts.host2.enabled {
                return Ok(json!({"status": "skipped", "message": "host2 disabled", "synced": 0}));
            }
            let ids = ctx.store.get_unsynced_vacancy_ids(1000)?;
            let synced = ctx.store.mark_vacancies_synced(&ids)?;
            Ok(json!({"status": "success", "synced": synced}))
        }
        Some("analyze_host3") => {
            if !ctx.config.hosts.host3.enabled {
                return Ok(json!({"status": "skipped", "message": "host3 disabled", "analyzed": 0}));
            }
            let batch = params
                .get("batch_size")
                .and_then(Value::as_u64)
                .map(|n| n as usize)
                .unwrap_or(50);
            let new_only = params
                .get("analyze_new_only")
                .and_then(Value::as_bool)
                .unwrap_or(true);

            let pending = ctx
                .store
                .get_unanalyzed_vacancies("host3_analysis", batch, new_only)?;
            for row in &pending {
                ctx.store.save_plugin_result(
                    row.id,
                    "host3_analysis",
                    &json!({
                        "status": "success",
                        "work_format": "UNKNOWN",
                        "relevance_score": 0.0,
                    }),
                )?;
            }
            Ok(json!({"status": "success", "analyzed": pending.len()}))
        }
        _ => Ok(json!({"status": "skipped", "reason": "pipeline hook not implemented"})),
    }
}

async fn test_task(ctx: &HandlerContext, params: &Value) -> Result<Value> {
    // Cancellable sleep knob for exercising timeouts and shutdown.
    if let Some(ms) = params.get("sleep_ms").and_then(Value::as_u64) {
        let mut shutdown = ctx.shutdown.clone();
        tokio::select! {
            _ = tokio::time::sleep(std::time::Duration::from_millis(ms)) => {}
            _ = shutdown.wait_for(|stop| *stop) => return Err(Error::TaskCancelled),
        }
    }

    if params.get("stub").and_then(Value::as_str) == Some("system_health") {
        let metrics = ctx
            .monitor
            .sample_and_record(host_status(&ctx.config.hosts))
            .await;
        return Ok(serde_json::to_value(&metrics)?);
    }

    Ok(json!({"status": "ok"}))
}
