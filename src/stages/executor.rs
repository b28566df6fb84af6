//! Task execution: feed listing and fetch job fan-out

use super::{resolve_quota, write_task_status};
use crate::context::PipelineContext;
use crate::db::models::{NewFetchJob, SkippedSource, Source, Task, TaskProgress, TaskStatus, TaskUpdate};
use crate::error::{PipelineError, Result};
use crate::feed::FeedEntry;
use crate::queue::{self, StageCommand};
use crate::stages::digest;
use crate::window::TimeWindow;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::json;
use std::collections::HashSet;
use tracing::{error, info, warn};

/// Feeds listed at once while fanning out
const FEED_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionReport {
    pub task_id: i64,
    /// False when the task was no longer pending
    pub claimed: bool,
    pub sources: usize,
    pub jobs_created: u64,
    pub skipped_sources: usize,
}

/// Claim a pending task and fan its sources out into fetch jobs.
///
/// A task that is no longer pending is left alone. Fan-out failures mark the
/// task failed.
pub async fn execute_task(ctx: &PipelineContext, task_id: i64) -> Result<ExecutionReport> {
    let Some(task) = ctx.store.claim_pending_task(task_id).await? else {
        if ctx.store.get_task(task_id).await?.is_none() {
            return Err(PipelineError::TaskNotFound(task_id));
        }
        info!("Task {} is not pending, skipping execution", task_id);
        return Ok(ExecutionReport {
            task_id,
            ..Default::default()
        });
    };

    info!("Executing task {} for {}", task.id, task.owner_id);

    match fan_out(ctx, &task).await {
        Ok(report) => Ok(report),
        Err(e) => {
            error!("Task {} failed during fan-out: {}", task.id, e);
            let update = TaskUpdate::failed(e.to_string()).only_from(TaskStatus::Running);
            write_task_status(ctx, task.id, &update).await?;
            Err(e)
        }
    }
}

async fn fan_out(ctx: &PipelineContext, task: &Task) -> Result<ExecutionReport> {
    let quota = resolve_quota(ctx, &task.owner_id).await?;
    let sources = ctx
        .store
        .active_sources(&task.owner_id, quota.max_sources)
        .await?;

    let mut report = ExecutionReport {
        task_id: task.id,
        claimed: true,
        sources: sources.len(),
        ..Default::default()
    };

    if sources.is_empty() {
        info!("Task {} has no active sources", task.id);
        let update = TaskUpdate::status(TaskStatus::Completed)
            .with_result(json!({
                "message": "no active sources",
                "item_count": 0,
                "source_count": 0,
            }))
            .only_from(TaskStatus::Running);
        if write_task_status(ctx, task.id, &update).await?.is_none() {
            info!("Task {} left running before completion, leaving it", task.id);
        }
        return Ok(report);
    }

    let window = task.time_window();
    let now = Utc::now();

    let listing_futures: Vec<_> = sources.iter().map(|source| list_source(ctx, source)).collect();
    let listings: Vec<(&Source, Result<Vec<FeedEntry>>)> =
        stream::iter(listing_futures)
            .buffered(FEED_CONCURRENCY)
            .collect()
            .await;

    let mut progress = TaskProgress {
        total: sources.len() as i64,
        ..Default::default()
    };
    let mut jobs = Vec::new();

    for (source, listing) in listings {
        progress.current += 1;

        let entries = match listing {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Skipping source {} ({}): {}", source.name, source.feed_url, e);
                progress.skipped_sources.push(SkippedSource {
                    source: source.name.clone(),
                    reason: e.to_string(),
                });
                continue;
            }
        };

        let candidates = select_entries(entries, window, now, ctx.config.max_articles_per_source);
        let urls: Vec<String> = candidates.iter().map(|e| e.url.clone()).collect();
        let existing = ctx.store.existing_article_urls(source.id, &urls).await?;

        let before = jobs.len();
        jobs.extend(
            candidates
                .into_iter()
                .filter(|entry| !existing.contains(&entry.url))
                .map(|entry| {
                    NewFetchJob::new(
                        task.id,
                        &task.owner_id,
                        source.id,
                        &entry.url,
                        entry.title,
                        entry.published_at,
                    )
                }),
        );

        info!(
            "Source {}: {} new article(s), {} already stored",
            source.name,
            jobs.len() - before,
            existing.len()
        );
        progress.processed_sources.push(source.name.clone());
    }

    report.skipped_sources = progress.skipped_sources.len();
    report.jobs_created = ctx.store.insert_fetch_jobs(&jobs).await?;

    let update = TaskUpdate::status(TaskStatus::Processing)
        .with_progress(progress)
        .only_from(TaskStatus::Running);
    if write_task_status(ctx, task.id, &update).await?.is_none() {
        // Reaped or otherwise settled while the feeds were being listed
        warn!("Task {} is no longer running, abandoning its fan-out", task.id);
        return Ok(report);
    }

    if report.jobs_created == 0 {
        info!("Task {} has no new articles, generating digest now", task.id);
        digest::generate_for_task(ctx, task.id).await?;
    } else {
        info!("Task {} fanned out {} fetch job(s)", task.id, report.jobs_created);
        queue::enqueue(
            ctx.store.as_ref(),
            StageCommand::DispatchFetch {
                task_id: Some(task.id),
            },
        )
        .await?;
    }

    Ok(report)
}

/// List one source's feed under the feed timeout, paired with the source
async fn list_source<'a>(
    ctx: &'a PipelineContext,
    source: &'a Source,
) -> (&'a Source, Result<Vec<FeedEntry>>) {
    let timeout = ctx.config.feed_timeout;
    let listing = match tokio::time::timeout(timeout, ctx.feeds.list_entries(&source.feed_url)).await {
        Ok(result) => result,
        Err(_) => Err(PipelineError::timeout(
            format!("Feed listing for {}", source.name),
            timeout,
        )),
    };
    (source, listing)
}

/// Entries inside the window, one per URL, capped at `cap`.
///
/// Undated entries are kept; their publish time falls back to fetch time later.
fn select_entries(
    entries: Vec<FeedEntry>,
    window: TimeWindow,
    now: DateTime<Utc>,
    cap: usize,
) -> Vec<FeedEntry> {
    let mut seen = HashSet::new();
    entries
        .into_iter()
        .filter(|entry| entry.published_at.map_or(true, |at| window.contains(now, at)))
        .filter(|entry| seen.insert(entry.url.clone()))
        .take(cap)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn entry(url: &str, published_at: Option<DateTime<Utc>>) -> FeedEntry {
        FeedEntry {
            url: url.to_string(),
            title: None,
            published_at,
        }
    }

    #[test]
    fn select_entries_applies_window_and_cap() {
        let now = Utc.with_ymd_and_hms(2026, 5, 10, 12, 0, 0).unwrap();
        let entries = vec![
            entry("https://a.test/1", Some(now - Duration::hours(2))),
            entry("https://a.test/2", Some(now - Duration::days(3))),
            entry("https://a.test/3", None),
            entry("https://a.test/1", Some(now - Duration::hours(1))),
            entry("https://a.test/4", Some(now - Duration::minutes(5))),
        ];

        let today = select_entries(entries.clone(), TimeWindow::Today, now, 50);
        let urls: Vec<&str> = today.iter().map(|e| e.url.as_str()).collect();
        assert_eq!(urls, vec!["https://a.test/1", "https://a.test/3", "https://a.test/4"]);

        let capped = select_entries(entries, TimeWindow::Week, now, 2);
        assert_eq!(capped.len(), 2);
    }
}
