//! Digest generation
//!
//! Collects the owner's summaries inside the task window, groups them by
//! source and renders a markdown digest. Title and generation date follow the
//! owner's timezone.

use super::{merge_result, resolve_quota, write_task_status};
use crate::context::PipelineContext;
use crate::db::models::{Digest, NewDigest, Source, SummaryEntry, TaskStatus, TaskUpdate};
use crate::error::{PipelineError, Result};
use crate::window::TimeWindow;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};

const DATE_FORMAT: &str = "%B %-d, %Y";

/// What to build a digest from
#[derive(Debug, Clone)]
pub struct DigestRequest {
    pub owner_id: String,
    pub time_range: String,
    pub task_id: Option<i64>,
    /// Some fetch jobs of the task failed
    pub partial: bool,
    /// IANA zone name, UTC when absent
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DigestOutcome {
    Generated {
        digest: Digest,
        item_count: usize,
        source_count: usize,
    },
    /// Nothing to digest; the owning task was marked failed
    Empty { reason: String },
}

/// Build and persist a digest, racing the configured timeout.
///
/// Any error or timeout marks the owning task failed before being returned.
pub async fn generate_digest(ctx: &PipelineContext, request: &DigestRequest) -> Result<DigestOutcome> {
    let timeout = ctx.config.digest_timeout;
    let result = match tokio::time::timeout(timeout, build_digest(ctx, request)).await {
        Ok(result) => result,
        Err(_) => Err(PipelineError::timeout("Digest generation", timeout)),
    };

    if let Err(e) = &result {
        error!("Digest generation for {} failed: {}", request.owner_id, e);
        if let Some(task_id) = request.task_id {
            let update = TaskUpdate::failed(e.to_string()).only_from(TaskStatus::Processing);
            if let Err(write_err) = write_task_status(ctx, task_id, &update).await {
                error!("Could not mark task {} failed: {}", task_id, write_err);
            }
        }
    }

    result
}

/// Generate the digest for a processing task.
///
/// Returns `None` when the task is not in `processing`, so redelivered
/// triggers do not produce a second digest.
pub async fn generate_for_task(ctx: &PipelineContext, task_id: i64) -> Result<Option<DigestOutcome>> {
    let task = ctx
        .store
        .get_task(task_id)
        .await?
        .ok_or(PipelineError::TaskNotFound(task_id))?;

    if task.task_status() != Some(TaskStatus::Processing) {
        info!("Task {} is {}, skipping digest generation", task_id, task.status);
        return Ok(None);
    }

    let counts = ctx
        .store
        .fetch_job_counts(task_id, ctx.config.max_summary_attempts)
        .await?;
    let timezone = ctx.store.owner_timezone(&task.owner_id).await?;

    let request = DigestRequest {
        owner_id: task.owner_id.clone(),
        time_range: task.time_range(),
        task_id: Some(task_id),
        partial: counts.has_errors(),
        timezone,
    };

    generate_digest(ctx, &request).await.map(Some)
}

async fn build_digest(ctx: &PipelineContext, request: &DigestRequest) -> Result<DigestOutcome> {
    let owner_id = request.owner_id.trim();
    if owner_id.is_empty() {
        return Err(PipelineError::Validation("owner_id is required".to_string()));
    }

    let tz = owner_tz(request.timezone.as_deref());
    let window = TimeWindow::parse(&request.time_range);
    let now = Utc::now();

    let quota = resolve_quota(ctx, owner_id).await?;
    let sources = ctx.store.active_sources(owner_id, quota.max_sources).await?;
    if sources.is_empty() {
        return mark_empty(ctx, request, "No active sources to build a digest from").await;
    }

    let source_ids: Vec<i64> = sources.iter().map(|s| s.id).collect();
    let entries: Vec<SummaryEntry> = ctx
        .store
        .summaries_for_sources(&source_ids)
        .await?
        .into_iter()
        .filter(|entry| window.contains(now, entry.published_at))
        .collect();

    if entries.is_empty() {
        let reason = format!("No summaries published in the {} window", window.as_str());
        return mark_empty(ctx, request, &reason).await;
    }

    let sections = group_by_source(&sources, &entries);
    let item_count = entries.len();
    let source_count = sections.len();

    let local_now = now.with_timezone(&tz);
    let generated_on = local_now.format(DATE_FORMAT).to_string();
    let content = render_markdown(window, &generated_on, &sections);

    let digest = ctx
        .store
        .insert_digest(&NewDigest {
            owner_id: owner_id.to_string(),
            task_id: request.task_id,
            title: format!("{} Digest - {}", window.label(), generated_on),
            content,
            time_range: window.as_str().to_string(),
            generation_date: local_now.date_naive(),
            item_count: item_count as i32,
            source_count: source_count as i32,
        })
        .await?;

    let summary_ids: Vec<i64> = sections
        .iter()
        .flat_map(|(_, items)| items.iter().map(|entry| entry.summary_id))
        .collect();
    ctx.store.replace_digest_items(digest.id, &summary_ids).await?;

    if let Some(task_id) = request.task_id {
        let status = if request.partial {
            TaskStatus::CompletedWithErrors
        } else {
            TaskStatus::Completed
        };
        let existing = ctx.store.get_task(task_id).await?.and_then(|t| t.result);
        let result = merge_result(
            existing.as_ref(),
            json!({
                "digest_id": digest.id,
                "item_count": item_count,
                "source_count": source_count,
            }),
        );
        let update = TaskUpdate::status(status)
            .with_result(result)
            .only_from(TaskStatus::Processing);
        if write_task_status(ctx, task_id, &update).await?.is_none() {
            warn!(
                "Task {} was no longer processing; digest {} kept without updating it",
                task_id, digest.id
            );
        }
    }

    info!(
        "Generated digest {} for {}: {} item(s) from {} source(s)",
        digest.id, owner_id, item_count, source_count
    );

    Ok(DigestOutcome::Generated {
        digest,
        item_count,
        source_count,
    })
}

async fn mark_empty(
    ctx: &PipelineContext,
    request: &DigestRequest,
    reason: &str,
) -> Result<DigestOutcome> {
    warn!("No digest for {}: {}", request.owner_id, reason);

    if let Some(task_id) = request.task_id {
        let existing = ctx.store.get_task(task_id).await?.and_then(|t| t.result);
        let result = merge_result(
            existing.as_ref(),
            json!({ "item_count": 0, "message": reason }),
        );
        let update = TaskUpdate::failed(reason)
            .with_result(result)
            .only_from(TaskStatus::Processing);
        write_task_status(ctx, task_id, &update).await?;
    }

    Ok(DigestOutcome::Empty {
        reason: reason.to_string(),
    })
}

/// Parse an owner timezone, falling back to UTC
pub(crate) fn owner_tz(name: Option<&str>) -> Tz {
    match name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => name.parse::<Tz>().unwrap_or_else(|_| {
            warn!("Unknown timezone '{}', using UTC", name);
            Tz::UTC
        }),
        None => Tz::UTC,
    }
}

/// Entries grouped by source in source order; sources without entries are dropped
fn group_by_source<'a>(
    sources: &'a [Source],
    entries: &'a [SummaryEntry],
) -> Vec<(&'a Source, Vec<&'a SummaryEntry>)> {
    sources
        .iter()
        .map(|source| {
            let items: Vec<&SummaryEntry> = entries
                .iter()
                .filter(|entry| entry.source_id == source.id)
                .collect();
            (source, items)
        })
        .filter(|(_, items)| !items.is_empty())
        .collect()
}

fn render_markdown(
    window: TimeWindow,
    generated_on: &str,
    sections: &[(&Source, Vec<&SummaryEntry>)],
) -> String {
    let item_count: usize = sections.iter().map(|(_, items)| items.len()).sum();

    let mut out = format!("# {} Digest\n\n", window.label());
    out.push_str(&format!("*Generated on {}*\n\n", generated_on));
    out.push_str(&format!(
        "This digest includes {} articles from {} sources.\n\n---\n\n",
        item_count,
        sections.len()
    ));

    for (source, items) in sections {
        out.push_str(&format!("## {}\n\n", source.name));
        for entry in items {
            let title = if entry.title.trim().is_empty() {
                "Untitled"
            } else {
                entry.title.as_str()
            };
            out.push_str(&format!("### [{}]({})\n", title, entry.url));
            out.push_str(&format!("{}\n\n", entry.summary_text));
        }
        out.push_str("---\n\n");
    }

    out.push_str("\n*This digest was automatically generated from your subscribed sources.*");
    out
}

/// Local calendar date of `at` in the owner's zone
pub(crate) fn local_date(at: DateTime<Utc>, tz: Tz) -> chrono::NaiveDate {
    at.with_timezone(&tz).date_naive()
}
