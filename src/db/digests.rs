//! Digests and digest items database operations

use crate::db::models::{Digest, DigestItem, NewDigest};
use crate::db::DbPool;
use crate::error::Result;

/// Insert a new digest row
pub async fn insert_digest(pool: &DbPool, digest: &NewDigest) -> Result<Digest> {
    let row = sqlx::query_as::<_, Digest>(
        r#"
        INSERT INTO digests (
            owner_id, task_id, title, content, time_range, generation_date, item_count, source_count
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING *
        "#,
    )
    .bind(&digest.owner_id)
    .bind(digest.task_id)
    .bind(&digest.title)
    .bind(&digest.content)
    .bind(&digest.time_range)
    .bind(digest.generation_date)
    .bind(digest.item_count)
    .bind(digest.source_count)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Get a digest by ID
pub async fn get_digest_by_id(pool: &DbPool, digest_id: i64) -> Result<Option<Digest>> {
    let digest = sqlx::query_as::<_, Digest>("SELECT * FROM digests WHERE id = $1")
        .bind(digest_id)
        .fetch_optional(pool)
        .await?;

    Ok(digest)
}

/// Replace a digest's items: delete then insert, in one transaction
pub async fn replace_digest_items(pool: &DbPool, digest_id: i64, summary_ids: &[i64]) -> Result<()> {
    let positions: Vec<i32> = (0..summary_ids.len() as i32).collect();

    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM digest_items WHERE digest_id = $1")
        .bind(digest_id)
        .execute(&mut *tx)
        .await?;

    if !summary_ids.is_empty() {
        sqlx::query(
            r#"
            INSERT INTO digest_items (digest_id, summary_id, position)
            SELECT $1, summary_id, position
            FROM UNNEST($2::bigint[], $3::int[]) AS t(summary_id, position)
            "#,
        )
        .bind(digest_id)
        .bind(summary_ids)
        .bind(&positions)
        .execute(&mut *tx)
        .await?;
    }

    sqlx::query("UPDATE digests SET updated_at = NOW() WHERE id = $1")
        .bind(digest_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

/// Items of a digest in display order
pub async fn list_digest_items(pool: &DbPool, digest_id: i64) -> Result<Vec<DigestItem>> {
    let items = sqlx::query_as::<_, DigestItem>(
        "SELECT * FROM digest_items WHERE digest_id = $1 ORDER BY position ASC",
    )
    .bind(digest_id)
    .fetch_all(pool)
    .await?;

    Ok(items)
}
