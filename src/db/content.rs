//! Content items and summaries database operations

use crate::db::models::{NewSummarizedItem, SummaryEntry};
use crate::db::DbPool;
use crate::error::Result;

/// Insert a content item and its summary in one transaction.
///
/// Returns `None` when the fetch job already produced an item.
pub async fn insert_summarized_item(pool: &DbPool, item: &NewSummarizedItem) -> Result<Option<i64>> {
    let mut tx = pool.begin().await?;

    let content_item_id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO content_items (
            fetch_job_id, task_id, owner_id, source_id, title, url, content, published_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (fetch_job_id) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(item.fetch_job_id)
    .bind(item.task_id)
    .bind(&item.owner_id)
    .bind(item.source_id)
    .bind(&item.title)
    .bind(&item.url)
    .bind(&item.content)
    .bind(item.published_at)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(content_item_id) = content_item_id else {
        tx.rollback().await?;
        return Ok(None);
    };

    let summary_id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO summaries (content_item_id, summary_text, model)
        VALUES ($1, $2, $3)
        RETURNING id
        "#,
    )
    .bind(content_item_id)
    .bind(&item.summary_text)
    .bind(&item.model)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(Some(summary_id))
}

/// Summaries joined to their content items for the given sources, newest first
pub async fn list_summaries_for_sources(
    pool: &DbPool,
    source_ids: &[i64],
) -> Result<Vec<SummaryEntry>> {
    if source_ids.is_empty() {
        return Ok(Vec::new());
    }

    let entries = sqlx::query_as::<_, SummaryEntry>(
        r#"
        SELECT
            s.id AS summary_id,
            c.id AS content_item_id,
            c.task_id,
            c.source_id,
            c.title,
            c.url,
            s.summary_text,
            c.published_at
        FROM summaries s
        JOIN content_items c ON c.id = s.content_item_id
        WHERE c.source_id = ANY($1)
        ORDER BY c.published_at DESC, s.id ASC
        "#,
    )
    .bind(source_ids)
    .fetch_all(pool)
    .await?;

    Ok(entries)
}
