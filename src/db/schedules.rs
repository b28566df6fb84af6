//! Schedule configuration database operations

use crate::db::models::UserScheduleConfig;
use crate::db::DbPool;
use crate::error::Result;
use chrono::{DateTime, Utc};

/// All schedules with auto digests switched on
pub async fn list_enabled_schedules(pool: &DbPool) -> Result<Vec<UserScheduleConfig>> {
    let schedules = sqlx::query_as::<_, UserScheduleConfig>(
        "SELECT * FROM schedule_configs WHERE enabled ORDER BY owner_id",
    )
    .fetch_all(pool)
    .await?;

    Ok(schedules)
}

/// The owner's configured timezone name
pub async fn get_owner_timezone(pool: &DbPool, owner_id: &str) -> Result<Option<String>> {
    let timezone = sqlx::query_scalar::<_, Option<String>>(
        "SELECT timezone FROM schedule_configs WHERE owner_id = $1",
    )
    .bind(owner_id)
    .fetch_optional(pool)
    .await?;

    Ok(timezone.flatten())
}

/// Stamp the last successful scheduled run
pub async fn update_last_run(pool: &DbPool, owner_id: &str, at: DateTime<Utc>) -> Result<()> {
    sqlx::query("UPDATE schedule_configs SET last_run_at = $2 WHERE owner_id = $1")
        .bind(owner_id)
        .bind(at)
        .execute(pool)
        .await?;

    Ok(())
}
