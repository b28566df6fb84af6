//! Completion monitor
//!
//! Safety net behind the stage queue: finishes tasks whose jobs have all
//! settled and re-triggers stages that stalled because a trigger was lost.

use super::digest::{self, DigestOutcome, DigestRequest};
use crate::context::PipelineContext;
use crate::db::models::{Task, TaskStatus};
use crate::error::Result;
use crate::queue::{self, StageCommand};
use chrono::Utc;
use serde::Serialize;
use tracing::{error, info};

#[derive(Debug, Clone, Default, Serialize)]
pub struct MonitorReport {
    pub released_jobs: u64,
    pub checked: usize,
    pub completed: Vec<i64>,
    pub failed: Vec<i64>,
    pub nudged: Vec<i64>,
}

enum TaskCheck {
    Completed,
    Failed,
    Nudged,
    Waiting,
}

/// One monitor pass over every processing task
pub async fn run_monitor(ctx: &PipelineContext) -> Result<MonitorReport> {
    let mut report = MonitorReport::default();

    let lease = chrono::Duration::from_std(ctx.config.fetch_lease)
        .unwrap_or_else(|_| chrono::Duration::zero());
    report.released_jobs = ctx.store.release_stale_fetch_jobs(Utc::now() - lease).await?;
    if report.released_jobs > 0 {
        info!("Released {} stale fetch job(s)", report.released_jobs);
    }

    let tasks = ctx.store.tasks_with_status(TaskStatus::Processing).await?;
    for task in tasks {
        report.checked += 1;
        match check_task(ctx, &task).await {
            Ok(TaskCheck::Completed) => report.completed.push(task.id),
            Ok(TaskCheck::Failed) => report.failed.push(task.id),
            Ok(TaskCheck::Nudged) => report.nudged.push(task.id),
            Ok(TaskCheck::Waiting) => {}
            Err(e) => error!("Monitor could not check task {}: {}", task.id, e),
        }
    }

    info!(
        "Monitor checked {} task(s): {} completed, {} failed, {} nudged",
        report.checked,
        report.completed.len(),
        report.failed.len(),
        report.nudged.len()
    );

    Ok(report)
}

async fn check_task(ctx: &PipelineContext, task: &Task) -> Result<TaskCheck> {
    let counts = ctx
        .store
        .fetch_job_counts(task.id, ctx.config.max_summary_attempts)
        .await?;

    if counts.total == 0 {
        return Ok(TaskCheck::Waiting);
    }

    if counts.is_settled() {
        let request = DigestRequest {
            owner_id: task.owner_id.clone(),
            time_range: task.time_range(),
            task_id: Some(task.id),
            partial: counts.has_errors(),
            timezone: ctx.store.owner_timezone(&task.owner_id).await?,
        };
        info!("Task {} has settled, generating digest", task.id);
        return Ok(match digest::generate_digest(ctx, &request).await {
            Ok(DigestOutcome::Generated { .. }) => TaskCheck::Completed,
            Ok(DigestOutcome::Empty { .. }) | Err(_) => TaskCheck::Failed,
        });
    }

    let command = if counts.pending > 0 {
        StageCommand::DispatchFetch {
            task_id: Some(task.id),
        }
    } else if counts.fetching == 0 && counts.unsummarized() > 0 {
        StageCommand::DispatchSummaries {
            task_id: Some(task.id),
        }
    } else {
        return Ok(TaskCheck::Waiting);
    };

    queue::enqueue(ctx.store.as_ref(), command).await?;
    Ok(TaskCheck::Nudged)
}
