//! Fetch dispatcher and worker

use crate::context::PipelineContext;
use crate::crawler::truncate_chars;
use crate::db::models::{FetchJobStatus, FetchOutcome};
use crate::error::{PipelineError, Result};
use crate::queue::{self, StageCommand};
use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, Serialize)]
pub struct FetchDispatchReport {
    pub claimed: usize,
    pub job_ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchWorkerReport {
    pub job_id: i64,
    pub task_id: i64,
    /// Terminal status written, `None` if the job was not ours to finish
    pub status: Option<FetchJobStatus>,
    pub content_length: Option<usize>,
    pub error: Option<String>,
}

/// Claim the next batch of pending jobs and enqueue a worker trigger for each
pub async fn dispatch_fetch(
    ctx: &PipelineContext,
    task_id: Option<i64>,
) -> Result<FetchDispatchReport> {
    let jobs = ctx
        .store
        .claim_pending_fetch_jobs(task_id, ctx.config.fetch_batch_size)
        .await?;

    if jobs.is_empty() {
        debug!("No pending fetch jobs (task filter: {:?})", task_id);
        return Ok(FetchDispatchReport::default());
    }

    for job in &jobs {
        queue::enqueue(
            ctx.store.as_ref(),
            StageCommand::FetchArticle {
                job_id: job.id,
                task_id: job.task_id,
            },
        )
        .await?;
    }

    info!("Dispatched {} fetch job(s)", jobs.len());

    Ok(FetchDispatchReport {
        claimed: jobs.len(),
        job_ids: jobs.iter().map(|job| job.id).collect(),
    })
}

/// Fetch and extract one claimed article, then trigger the next stage.
///
/// Only acts on jobs still in `fetching`, so redelivered triggers are no-ops.
pub async fn run_fetch_worker(ctx: &PipelineContext, job_id: i64) -> Result<FetchWorkerReport> {
    let job = ctx
        .store
        .get_fetch_job(job_id)
        .await?
        .ok_or(PipelineError::FetchJobNotFound(job_id))?;

    let mut report = FetchWorkerReport {
        job_id,
        task_id: job.task_id,
        status: None,
        content_length: None,
        error: None,
    };

    if job.job_status() != Some(FetchJobStatus::Fetching) {
        debug!("Fetch job {} is {}, nothing to do", job_id, job.status);
        return Ok(report);
    }

    let timeout = ctx.config.fetch_timeout;
    let extracted = match tokio::time::timeout(timeout, ctx.pages.fetch_article_text(&job.article_url)).await {
        Ok(result) => result,
        Err(_) => Err(PipelineError::timeout("Article fetch", timeout)),
    };

    let outcome = match extracted {
        Ok(text) => {
            let length = text.chars().count();
            if length < ctx.config.min_content_length {
                FetchOutcome::Failed {
                    error: PipelineError::ContentTooShort { length }.to_string(),
                }
            } else {
                FetchOutcome::Completed {
                    content: truncate_chars(&text, ctx.config.max_content_length),
                }
            }
        }
        Err(e) => FetchOutcome::Failed {
            error: e.to_string(),
        },
    };

    if !ctx.store.finish_fetch_job(job_id, &outcome).await? {
        debug!("Fetch job {} was released before it finished", job_id);
        return Ok(report);
    }

    match &outcome {
        FetchOutcome::Completed { content } => {
            info!("Fetched {} ({} chars)", job.article_url, content.chars().count());
            report.status = Some(FetchJobStatus::Completed);
            report.content_length = Some(content.chars().count());
        }
        FetchOutcome::Failed { error } => {
            warn!("Fetch failed for {}: {}", job.article_url, error);
            report.status = Some(FetchJobStatus::Failed);
            report.error = Some(error.clone());
        }
    }

    advance_after_fetch(ctx, job.task_id).await?;
    Ok(report)
}

/// Keep fetching while jobs are pending, otherwise hand over to summarization
async fn advance_after_fetch(ctx: &PipelineContext, task_id: i64) -> Result<()> {
    let counts = ctx
        .store
        .fetch_job_counts(task_id, ctx.config.max_summary_attempts)
        .await?;

    let next = if counts.pending == 0 {
        StageCommand::DispatchSummaries {
            task_id: Some(task_id),
        }
    } else {
        StageCommand::DispatchFetch {
            task_id: Some(task_id),
        }
    };

    queue::enqueue(ctx.store.as_ref(), next).await?;
    Ok(())
}
