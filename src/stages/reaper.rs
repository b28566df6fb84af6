//! Stuck-task reaper

use crate::context::PipelineContext;
use crate::db::models::{Task, TaskStatus};
use crate::error::Result;
use tracing::{info, warn};

pub const REAPED_MESSAGE: &str = "Task was stuck and has been marked failed by the reaper";

/// Force every pending or running task to failed, regardless of age
pub async fn reap_stuck_tasks(ctx: &PipelineContext) -> Result<Vec<Task>> {
    let reaped = ctx
        .store
        .fail_tasks_with_status(&[TaskStatus::Pending, TaskStatus::Running], REAPED_MESSAGE)
        .await?;

    for task in &reaped {
        warn!("Reaped task {} for {}", task.id, task.owner_id);
    }
    info!("Reaper marked {} task(s) failed", reaped.len());

    Ok(reaped)
}
