//! Fetch jobs database operations

use crate::db::models::{FetchJob, FetchJobCounts, FetchOutcome, NewFetchJob};
use crate::db::DbPool;
use crate::error::Result;
use chrono::{DateTime, Utc};
use sqlx::Row;
use std::collections::HashSet;

/// Bulk insert fan-out jobs, skipping articles already queued for the task
pub async fn insert_fetch_jobs(pool: &DbPool, jobs: &[NewFetchJob]) -> Result<u64> {
    if jobs.is_empty() {
        return Ok(0);
    }

    let task_ids: Vec<i64> = jobs.iter().map(|j| j.task_id).collect();
    let owner_ids: Vec<&str> = jobs.iter().map(|j| j.owner_id.as_str()).collect();
    let source_ids: Vec<i64> = jobs.iter().map(|j| j.source_id).collect();
    let urls: Vec<&str> = jobs.iter().map(|j| j.article_url.as_str()).collect();
    let keys: Vec<&str> = jobs.iter().map(|j| j.article_key.as_str()).collect();
    let titles: Vec<Option<String>> = jobs.iter().map(|j| j.article_title.clone()).collect();
    let published: Vec<Option<DateTime<Utc>>> = jobs.iter().map(|j| j.published_at).collect();

    let result = sqlx::query(
        r#"
        INSERT INTO fetch_jobs (
            task_id, owner_id, source_id, article_url, article_key, article_title, published_at
        )
        SELECT * FROM UNNEST(
            $1::bigint[], $2::text[], $3::bigint[], $4::text[], $5::text[], $6::text[], $7::timestamptz[]
        )
        ON CONFLICT (task_id, article_key) DO NOTHING
        "#,
    )
    .bind(&task_ids)
    .bind(&owner_ids)
    .bind(&source_ids)
    .bind(&urls)
    .bind(&keys)
    .bind(&titles)
    .bind(&published)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// URLs among `urls` that already exist as content items for the source
pub async fn existing_article_urls(
    pool: &DbPool,
    source_id: i64,
    urls: &[String],
) -> Result<HashSet<String>> {
    if urls.is_empty() {
        return Ok(HashSet::new());
    }

    let found = sqlx::query_scalar::<_, String>(
        "SELECT DISTINCT url FROM content_items WHERE source_id = $1 AND url = ANY($2)",
    )
    .bind(source_id)
    .bind(urls)
    .fetch_all(pool)
    .await?;

    Ok(found.into_iter().collect())
}

/// Atomically claim the next batch of pending jobs.
///
/// Safe for concurrent dispatchers: each row moves pending -> fetching once.
pub async fn claim_pending_fetch_jobs(
    pool: &DbPool,
    task_id: Option<i64>,
    limit: i64,
) -> Result<Vec<FetchJob>> {
    let jobs = sqlx::query_as::<_, FetchJob>(
        r#"
        WITH next_jobs AS (
            SELECT id FROM fetch_jobs
            WHERE status = 'pending'
              AND ($1::bigint IS NULL OR task_id = $1)
            ORDER BY created_at ASC, id ASC
            LIMIT $2
            FOR UPDATE SKIP LOCKED
        )
        UPDATE fetch_jobs
        SET status = 'fetching',
            claimed_at = NOW(),
            updated_at = NOW()
        WHERE id IN (SELECT id FROM next_jobs)
        RETURNING *
        "#,
    )
    .bind(task_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(jobs)
}

/// Get a fetch job by ID
pub async fn get_fetch_job(pool: &DbPool, job_id: i64) -> Result<Option<FetchJob>> {
    let job = sqlx::query_as::<_, FetchJob>("SELECT * FROM fetch_jobs WHERE id = $1")
        .bind(job_id)
        .fetch_optional(pool)
        .await?;

    Ok(job)
}

/// Write a terminal status for a job that is still fetching
pub async fn finish_fetch_job(pool: &DbPool, job_id: i64, outcome: &FetchOutcome) -> Result<bool> {
    let (status, content, error) = match outcome {
        FetchOutcome::Completed { content } => ("completed", Some(content.as_str()), None),
        FetchOutcome::Failed { error } => ("failed", None, Some(error.as_str())),
    };

    let result = sqlx::query(
        r#"
        UPDATE fetch_jobs
        SET status = $2,
            content = $3,
            error_message = $4,
            updated_at = NOW()
        WHERE id = $1
          AND status = 'fetching'
        "#,
    )
    .bind(job_id)
    .bind(status)
    .bind(content)
    .bind(error)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Release jobs whose worker never reported back
pub async fn release_stale_fetch_jobs(pool: &DbPool, claimed_before: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE fetch_jobs
        SET status = 'pending',
            claimed_at = NULL,
            updated_at = NOW()
        WHERE status = 'fetching'
          AND claimed_at < $1
        "#,
    )
    .bind(claimed_before)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Tally a task's jobs by fetch and summary state
pub async fn count_fetch_jobs(pool: &DbPool, task_id: i64, max_attempts: i32) -> Result<FetchJobCounts> {
    let row = sqlx::query(
        r#"
        SELECT
            COUNT(*) AS total,
            COUNT(*) FILTER (WHERE j.status = 'pending') AS pending,
            COUNT(*) FILTER (WHERE j.status = 'fetching') AS fetching,
            COUNT(*) FILTER (WHERE j.status = 'completed') AS completed,
            COUNT(*) FILTER (WHERE j.status = 'failed') AS failed,
            COUNT(*) FILTER (WHERE j.status = 'completed' AND c.id IS NOT NULL) AS summarized,
            COUNT(*) FILTER (
                WHERE j.status = 'completed' AND c.id IS NULL AND j.summary_attempts >= $2
            ) AS summary_exhausted
        FROM fetch_jobs j
        LEFT JOIN content_items c ON c.fetch_job_id = j.id
        WHERE j.task_id = $1
        "#,
    )
    .bind(task_id)
    .bind(max_attempts)
    .fetch_one(pool)
    .await?;

    Ok(FetchJobCounts {
        total: row.get("total"),
        pending: row.get("pending"),
        fetching: row.get("fetching"),
        completed: row.get("completed"),
        failed: row.get("failed"),
        summarized: row.get("summarized"),
        summary_exhausted: row.get("summary_exhausted"),
    })
}

/// Completed jobs still waiting for a summary
pub async fn list_unsummarized_fetch_jobs(
    pool: &DbPool,
    task_id: Option<i64>,
    max_attempts: i32,
    limit: i64,
) -> Result<Vec<FetchJob>> {
    let jobs = sqlx::query_as::<_, FetchJob>(
        r#"
        SELECT j.* FROM fetch_jobs j
        WHERE j.status = 'completed'
          AND ($1::bigint IS NULL OR j.task_id = $1)
          AND j.summary_attempts < $2
          AND NOT EXISTS (SELECT 1 FROM content_items c WHERE c.fetch_job_id = j.id)
        ORDER BY j.updated_at ASC, j.id ASC
        LIMIT $3
        "#,
    )
    .bind(task_id)
    .bind(max_attempts)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(jobs)
}

/// Count one failed summarization attempt
pub async fn record_summary_failure(pool: &DbPool, job_id: i64, error: &str) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE fetch_jobs
        SET summary_attempts = summary_attempts + 1,
            summary_error = $2,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(job_id)
    .bind(error)
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    // Tests require a running database - see tests/postgres_claims.rs
}
