//! Sources and owner quota database operations

use crate::db::models::{OwnerQuota, Source};
use crate::db::DbPool;
use crate::error::Result;

/// Active sources for an owner in creation order
pub async fn list_active_sources(pool: &DbPool, owner_id: &str, limit: i64) -> Result<Vec<Source>> {
    let sources = sqlx::query_as::<_, Source>(
        r#"
        SELECT * FROM sources
        WHERE owner_id = $1
          AND is_active
        ORDER BY created_at ASC, id ASC
        LIMIT $2
        "#,
    )
    .bind(owner_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(sources)
}

/// Count an owner's active sources
pub async fn count_active_sources(pool: &DbPool, owner_id: &str) -> Result<i64> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM sources WHERE owner_id = $1 AND is_active",
    )
    .bind(owner_id)
    .fetch_one(pool)
    .await?;

    Ok(count)
}

/// Create a new source record
pub async fn create_source(pool: &DbPool, owner_id: &str, name: &str, feed_url: &str) -> Result<i64> {
    let id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO sources (owner_id, name, feed_url)
        VALUES ($1, $2, $3)
        RETURNING id
        "#,
    )
    .bind(owner_id)
    .bind(name)
    .bind(feed_url)
    .fetch_one(pool)
    .await?;

    Ok(id)
}

/// Billing limits for an owner, if a row exists
pub async fn get_owner_quota(pool: &DbPool, owner_id: &str) -> Result<Option<OwnerQuota>> {
    let quota = sqlx::query_as::<_, OwnerQuota>("SELECT * FROM owner_quotas WHERE owner_id = $1")
        .bind(owner_id)
        .fetch_optional(pool)
        .await?;

    Ok(quota)
}

#[cfg(test)]
mod tests {
    // Tests require a running database - see integration tests
}
