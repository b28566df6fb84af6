//! Tasks database operations

use crate::db::models::{NewTask, Task, TaskStatus, TaskUpdate};
use crate::db::DbPool;
use crate::error::{PipelineError, Result};

const ACTIVE_INDEX: &str = "tasks_one_active_per_owner";

/// Insert a pending task.
///
/// The partial unique index on active tasks decides concurrent inserts; the loser
/// gets `Conflict` carrying the winner's id.
pub async fn create_task(pool: &DbPool, task: &NewTask) -> Result<Task> {
    let inserted = sqlx::query_as::<_, Task>(
        r#"
        INSERT INTO tasks (owner_id, task_type, status, config, progress)
        VALUES ($1, $2, 'pending', $3, $4)
        RETURNING *
        "#,
    )
    .bind(&task.owner_id)
    .bind(task.task_type.as_str())
    .bind(task.config_json())
    .bind(task.progress_json())
    .fetch_one(pool)
    .await;

    match inserted {
        Ok(row) => Ok(row),
        Err(sqlx::Error::Database(db_err)) if db_err.constraint() == Some(ACTIVE_INDEX) => {
            let existing = get_active_task_for_owner(pool, &task.owner_id).await?;
            Err(PipelineError::Conflict {
                owner_id: task.owner_id.clone(),
                existing_task_id: existing.map(|t| t.id).unwrap_or_default(),
            })
        }
        Err(e) => Err(e.into()),
    }
}

/// Get a task by ID
pub async fn get_task_by_id(pool: &DbPool, task_id: i64) -> Result<Option<Task>> {
    let task = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = $1")
        .bind(task_id)
        .fetch_optional(pool)
        .await?;

    Ok(task)
}

/// The owner's non-terminal task, if any
pub async fn get_active_task_for_owner(pool: &DbPool, owner_id: &str) -> Result<Option<Task>> {
    let task = sqlx::query_as::<_, Task>(
        r#"
        SELECT * FROM tasks
        WHERE owner_id = $1
          AND status IN ('pending', 'running', 'processing')
        ORDER BY created_at DESC
        LIMIT 1
        "#,
    )
    .bind(owner_id)
    .fetch_optional(pool)
    .await?;

    Ok(task)
}

/// Atomically claim a pending task for execution.
///
/// A duplicate invocation finds the row already running and gets `None`.
pub async fn claim_pending_task(pool: &DbPool, task_id: i64) -> Result<Option<Task>> {
    let task = sqlx::query_as::<_, Task>(
        r#"
        UPDATE tasks
        SET status = 'running',
            started_at = NOW(),
            updated_at = NOW()
        WHERE id = $1
          AND status = 'pending'
        RETURNING *
        "#,
    )
    .bind(task_id)
    .fetch_optional(pool)
    .await?;

    Ok(task)
}

/// Apply a partial update; unset fields keep their stored value.
///
/// With `expected_status` set, a task in any other status is left untouched
/// and `None` is returned.
pub async fn update_task(pool: &DbPool, task_id: i64, update: &TaskUpdate) -> Result<Option<Task>> {
    let progress = update
        .progress
        .as_ref()
        .map(serde_json::to_value)
        .transpose()?;
    let terminal = update.status.map(|s| s.is_terminal()).unwrap_or(false);

    let task = sqlx::query_as::<_, Task>(
        r#"
        UPDATE tasks
        SET status = COALESCE($2, status),
            progress = COALESCE($3, progress),
            result = COALESCE($4, result),
            error_message = COALESCE($5, error_message),
            completed_at = CASE WHEN $6 THEN NOW() ELSE completed_at END,
            updated_at = NOW()
        WHERE id = $1
          AND ($7::text IS NULL OR status = $7)
        RETURNING *
        "#,
    )
    .bind(task_id)
    .bind(update.status.map(|s| s.as_str()))
    .bind(progress)
    .bind(&update.result)
    .bind(&update.error_message)
    .bind(terminal)
    .bind(update.expected_status.map(|s| s.as_str()))
    .fetch_optional(pool)
    .await?;

    Ok(task)
}

/// List tasks in one status, oldest first
pub async fn list_tasks_by_status(pool: &DbPool, status: TaskStatus) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks WHERE status = $1 ORDER BY created_at ASC",
    )
    .bind(status.as_str())
    .fetch_all(pool)
    .await?;

    Ok(tasks)
}

/// Force tasks in any of `statuses` to failed
pub async fn fail_tasks_by_status(
    pool: &DbPool,
    statuses: &[TaskStatus],
    message: &str,
) -> Result<Vec<Task>> {
    let statuses: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();

    let tasks = sqlx::query_as::<_, Task>(
        r#"
        UPDATE tasks
        SET status = 'failed',
            error_message = $2,
            completed_at = NOW(),
            updated_at = NOW()
        WHERE status = ANY($1)
        RETURNING *
        "#,
    )
    .bind(&statuses)
    .bind(message)
    .fetch_all(pool)
    .await?;

    Ok(tasks)
}

#[cfg(test)]
mod tests {
    // Tests require a running database - see integration tests
}
