//! Pipeline stages
//!
//! Each stage is a free function over a [`PipelineContext`]:
//! - orchestrator: validate and insert a task
//! - executor: list feeds and fan out fetch jobs
//! - fetch: claim jobs and extract article text
//! - summarize: summarize fetched articles and finalize tasks
//! - digest: render and persist the digest
//! - monitor, scheduler, reaper: periodic and on-demand housekeeping

pub mod digest;
pub mod executor;
pub mod fetch;
pub mod monitor;
pub mod orchestrator;
pub mod reaper;
pub mod scheduler;
pub mod summarize;

pub use digest::{generate_digest, generate_for_task, DigestOutcome, DigestRequest};
pub use executor::{execute_task, ExecutionReport};
pub use fetch::{dispatch_fetch, run_fetch_worker, FetchDispatchReport, FetchWorkerReport};
pub use monitor::{run_monitor, MonitorReport};
pub use orchestrator::{start_task, submit_task};
pub use reaper::{reap_stuck_tasks, REAPED_MESSAGE};
pub use scheduler::{tick, tick_at, ScheduleAction, ScheduleDecision, SchedulerReport};
pub use summarize::{dispatch_summaries, finalize_if_settled, SummaryDispatchReport};

use crate::context::PipelineContext;
use crate::db::models::{OwnerQuota, Task, TaskUpdate};
use crate::error::{ErrorKind, Result};
use crate::queue::StageCommand;
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Run the stage a queued command points at
pub async fn run_command(ctx: &PipelineContext, command: &StageCommand) -> Result<()> {
    debug!("Running stage command {:?}", command);

    match command {
        StageCommand::ExecuteTask { task_id } => {
            executor::execute_task(ctx, *task_id).await?;
        }
        StageCommand::DispatchFetch { task_id } => {
            fetch::dispatch_fetch(ctx, *task_id).await?;
        }
        StageCommand::FetchArticle { job_id, .. } => {
            fetch::run_fetch_worker(ctx, *job_id).await?;
        }
        StageCommand::DispatchSummaries { task_id } => {
            summarize::dispatch_summaries(ctx, *task_id).await?;
        }
        StageCommand::GenerateDigest { task_id } => {
            digest::generate_for_task(ctx, *task_id).await?;
        }
    }

    Ok(())
}

/// Write a task update, retrying transient persistence failures with backoff
pub(crate) async fn write_task_status(
    ctx: &PipelineContext,
    task_id: i64,
    update: &TaskUpdate,
) -> Result<Option<Task>> {
    let policy = ctx.config.status_retry;
    let mut attempt = 0;

    loop {
        attempt += 1;
        match ctx.store.update_task(task_id, update).await {
            Ok(task) => return Ok(task),
            Err(e) if e.kind() == ErrorKind::Persistence && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    "Status write for task {} failed (attempt {}/{}), retrying in {:?}: {}",
                    task_id, attempt, policy.max_attempts, delay, e
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Shallow-merge `patch` into an existing JSON object result
pub(crate) fn merge_result(existing: Option<&Value>, patch: Value) -> Value {
    let mut merged = match existing {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    };

    if let Value::Object(fields) = patch {
        for (key, value) in fields {
            merged.insert(key, value);
        }
    }

    Value::Object(merged)
}

/// The owner's quota row, or the configured free-tier defaults
pub(crate) async fn resolve_quota(ctx: &PipelineContext, owner_id: &str) -> Result<OwnerQuota> {
    Ok(ctx
        .store
        .owner_quota(owner_id)
        .await?
        .unwrap_or_else(|| OwnerQuota {
            owner_id: owner_id.to_string(),
            max_sources: ctx.config.default_max_sources,
            can_schedule: ctx.config.default_can_schedule,
        }))
}
