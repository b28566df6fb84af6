//! Summarization dispatcher, worker and task finalization

use super::{merge_result, resolve_quota, write_task_status};
use crate::context::PipelineContext;
use crate::db::models::{FetchJob, NewSummarizedItem, SummaryEntry, Task, TaskStatus, TaskUpdate};
use crate::error::{PipelineError, Result};
use crate::queue::{self, StageCommand};
use crate::summarizer::{overview_prompt, summary_prompt};
use futures::future::join_all;
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, Serialize)]
pub struct SummaryDispatchReport {
    pub selected: usize,
    pub summarized: usize,
    pub failed: usize,
    /// Tasks whose digest generation was enqueued by this dispatch
    pub finalized_tasks: Vec<i64>,
}

/// Summarize a batch of fetched articles concurrently.
///
/// Failed jobs stay selectable until their attempts run out; a delayed
/// re-dispatch picks them up again. Tasks with nothing left to summarize are
/// finalized.
pub async fn dispatch_summaries(
    ctx: &PipelineContext,
    task_id: Option<i64>,
) -> Result<SummaryDispatchReport> {
    let jobs = ctx
        .store
        .unsummarized_fetch_jobs(
            task_id,
            ctx.config.max_summary_attempts,
            ctx.config.summary_batch_size,
        )
        .await?;

    let mut report = SummaryDispatchReport {
        selected: jobs.len(),
        ..Default::default()
    };

    let outcomes = join_all(jobs.iter().map(|job| summarize_job(ctx, job))).await;

    let mut retry_tasks = BTreeSet::new();
    for (job, outcome) in jobs.iter().zip(outcomes) {
        match outcome {
            Ok(()) => report.summarized += 1,
            Err(e) => {
                warn!("Summary failed for fetch job {}: {}", job.id, e);
                ctx.store.record_summary_failure(job.id, &e.to_string()).await?;
                report.failed += 1;
                retry_tasks.insert(job.task_id);
            }
        }
    }

    for retry_task in &retry_tasks {
        queue::enqueue_after(
            ctx.store.as_ref(),
            StageCommand::DispatchSummaries {
                task_id: Some(*retry_task),
            },
            ctx.config.summary_retry_delay,
        )
        .await?;
    }

    // A full batch may have left more work behind
    if jobs.len() as i64 >= ctx.config.summary_batch_size && retry_tasks.is_empty() {
        queue::enqueue(ctx.store.as_ref(), StageCommand::DispatchSummaries { task_id }).await?;
    }

    let mut touched: BTreeSet<i64> = jobs.iter().map(|job| job.task_id).collect();
    touched.extend(task_id);
    for candidate in touched {
        if finalize_if_settled(ctx, candidate).await? {
            report.finalized_tasks.push(candidate);
        }
    }

    info!(
        "Summarization batch: {} selected, {} summarized, {} failed",
        report.selected, report.summarized, report.failed
    );

    Ok(report)
}

/// Summarize one fetched job and persist the content item with its summary
async fn summarize_job(ctx: &PipelineContext, job: &FetchJob) -> Result<()> {
    let content = job.content.as_deref().unwrap_or_default();
    let title = job
        .article_title
        .clone()
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| job.article_url.clone());

    let request = summary_prompt(&title, content, ctx.config.summary_prompt_chars);
    let timeout = ctx.config.summary_timeout;
    let summary = tokio::time::timeout(timeout, ctx.completions.complete(&request))
        .await
        .map_err(|_| PipelineError::timeout("Summary completion", timeout))??;

    let summary = summary.trim();
    let length = summary.chars().count();
    if length < ctx.config.min_summary_length {
        return Err(PipelineError::SummaryTooShort { length });
    }

    let inserted = ctx
        .store
        .insert_summarized_item(&NewSummarizedItem {
            fetch_job_id: job.id,
            task_id: job.task_id,
            owner_id: job.owner_id.clone(),
            source_id: job.source_id,
            title,
            url: job.article_url.clone(),
            content: content.to_string(),
            published_at: job.published_at.unwrap_or(job.created_at),
            summary_text: summary.to_string(),
            model: ctx.completions.model().to_string(),
        })
        .await?;

    match inserted {
        Some(summary_id) => debug!("Stored summary {} for fetch job {}", summary_id, job.id),
        None => debug!("Fetch job {} was already summarized", job.id),
    }

    Ok(())
}

/// Record the task aggregate and enqueue digest generation once every job has settled.
///
/// Returns true when digest generation was enqueued.
pub async fn finalize_if_settled(ctx: &PipelineContext, task_id: i64) -> Result<bool> {
    let Some(task) = ctx.store.get_task(task_id).await? else {
        return Ok(false);
    };
    if task.task_status() != Some(TaskStatus::Processing) {
        return Ok(false);
    }

    let counts = ctx
        .store
        .fetch_job_counts(task_id, ctx.config.max_summary_attempts)
        .await?;
    if counts.total == 0 || counts.pending > 0 || counts.fetching > 0 || counts.unsummarized() > 0 {
        return Ok(false);
    }

    let entries = task_entries(ctx, &task).await?;
    let source_count = entries
        .iter()
        .map(|entry| entry.source_id)
        .collect::<HashSet<_>>()
        .len();
    let overview = build_overview(ctx, &entries).await;

    let aggregate = json!({
        "item_count": counts.summarized,
        "source_count": source_count,
        "failed_count": counts.failed + counts.summary_exhausted,
        "overview": overview,
    });
    let result = merge_result(task.result.as_ref(), json!({ "aggregate": aggregate }));
    let update = TaskUpdate::default()
        .with_result(result)
        .only_from(TaskStatus::Processing);
    if write_task_status(ctx, task_id, &update).await?.is_none() {
        debug!("Task {} left processing before finalization", task_id);
        return Ok(false);
    }

    queue::enqueue(ctx.store.as_ref(), StageCommand::GenerateDigest { task_id }).await?;
    info!(
        "Task {} settled: {} summarized, {} failed; digest enqueued",
        task_id,
        counts.summarized,
        counts.failed + counts.summary_exhausted
    );

    Ok(true)
}

/// Summaries produced by this task, newest first
async fn task_entries(ctx: &PipelineContext, task: &Task) -> Result<Vec<SummaryEntry>> {
    let quota = resolve_quota(ctx, &task.owner_id).await?;
    let source_ids: Vec<i64> = ctx
        .store
        .active_sources(&task.owner_id, quota.max_sources)
        .await?
        .iter()
        .map(|source| source.id)
        .collect();

    Ok(ctx
        .store
        .summaries_for_sources(&source_ids)
        .await?
        .into_iter()
        .filter(|entry| entry.task_id == task.id)
        .collect())
}

/// Optional overview across the task's summaries. Failures only cost the overview.
async fn build_overview(ctx: &PipelineContext, entries: &[SummaryEntry]) -> Option<String> {
    if entries.is_empty() {
        return None;
    }

    let items: Vec<(String, String)> = entries
        .iter()
        .map(|entry| (entry.title.clone(), entry.summary_text.clone()))
        .collect();
    let request = overview_prompt(&items);
    let timeout = ctx.config.summary_timeout;

    match tokio::time::timeout(timeout, ctx.completions.complete(&request)).await {
        Ok(Ok(text)) if text.trim().chars().count() >= ctx.config.min_overview_length => {
            Some(text.trim().to_string())
        }
        Ok(Ok(text)) => {
            warn!("Discarding overview of {} chars", text.trim().chars().count());
            None
        }
        Ok(Err(e)) => {
            warn!("Overview generation failed: {}", e);
            None
        }
        Err(_) => {
            warn!("Overview generation timed out after {:?}", timeout);
            None
        }
    }
}
