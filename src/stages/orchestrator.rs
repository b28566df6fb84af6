//! Task creation

use super::resolve_quota;
use crate::context::PipelineContext;
use crate::db::models::{NewTask, Task, TaskType};
use crate::error::{PipelineError, Result};
use crate::queue::{self, StageCommand};
use tracing::info;

/// Insert a pending task for `owner_id`.
///
/// Fails with `Conflict` (carrying the active task's id) if the owner already
/// has a non-terminal task. `progress.total` is the active source count capped
/// by the owner's quota.
pub async fn start_task(
    ctx: &PipelineContext,
    owner_id: &str,
    time_range: &str,
    task_type: TaskType,
) -> Result<Task> {
    let owner_id = owner_id.trim();
    if owner_id.is_empty() {
        return Err(PipelineError::Validation("owner_id is required".to_string()));
    }

    if let Some(existing) = ctx.store.active_task_for_owner(owner_id).await? {
        return Err(PipelineError::Conflict {
            owner_id: owner_id.to_string(),
            existing_task_id: existing.id,
        });
    }

    let quota = resolve_quota(ctx, owner_id).await?;
    let active_sources = ctx.store.count_active_sources(owner_id).await?;
    let total = active_sources.min(quota.max_sources.max(0));

    let time_range = match time_range.trim() {
        "" => "week",
        keyword => keyword,
    };

    // The store's unique index turns a lost race into Conflict as well
    let task = ctx
        .store
        .create_task(&NewTask {
            owner_id: owner_id.to_string(),
            task_type,
            time_range: time_range.to_string(),
            total,
        })
        .await?;

    info!(
        "Created {} task {} for {} ({} sources, window {})",
        task_type.as_str(),
        task.id,
        owner_id,
        total,
        time_range
    );

    Ok(task)
}

/// Start a task and enqueue its execution
pub async fn submit_task(
    ctx: &PipelineContext,
    owner_id: &str,
    time_range: &str,
    task_type: TaskType,
) -> Result<Task> {
    let task = start_task(ctx, owner_id, time_range, task_type).await?;
    queue::enqueue(ctx.store.as_ref(), StageCommand::ExecuteTask { task_id: task.id }).await?;
    Ok(task)
}
