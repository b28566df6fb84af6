//! Stage message queue database operations

use crate::db::models::{EnqueueResult, MessageStatus, NewStageMessage, StageMessage};
use crate::db::DbPool;
use crate::error::Result;
use chrono::{DateTime, Utc};

/// Enqueue a message, coalescing into an existing pending one with the same key
pub async fn enqueue_message(pool: &DbPool, message: &NewStageMessage) -> Result<EnqueueResult> {
    let id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO stage_messages (kind, payload, dedupe_key, available_at)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (dedupe_key) WHERE status = 'pending' DO NOTHING
        RETURNING id
        "#,
    )
    .bind(&message.kind)
    .bind(&message.payload)
    .bind(&message.dedupe_key)
    .bind(message.available_at)
    .fetch_optional(pool)
    .await?;

    Ok(match id {
        Some(id) => EnqueueResult::Created(id),
        None => EnqueueResult::Duplicate,
    })
}

/// Claim due pending messages and messages whose lease ran out
pub async fn claim_messages(
    pool: &DbPool,
    limit: i64,
    lease_expired_before: DateTime<Utc>,
) -> Result<Vec<StageMessage>> {
    let messages = sqlx::query_as::<_, StageMessage>(
        r#"
        WITH next_messages AS (
            SELECT id FROM stage_messages
            WHERE (status = 'pending' AND available_at <= NOW())
               OR (status = 'claimed' AND claimed_at < $2)
            ORDER BY available_at ASC, id ASC
            LIMIT $1
            FOR UPDATE SKIP LOCKED
        )
        UPDATE stage_messages
        SET status = 'claimed',
            claimed_at = NOW(),
            attempts = attempts + 1,
            updated_at = NOW()
        WHERE id IN (SELECT id FROM next_messages)
        RETURNING *
        "#,
    )
    .bind(limit)
    .bind(lease_expired_before)
    .fetch_all(pool)
    .await?;

    Ok(messages)
}

/// Mark a message handled
pub async fn ack_message(pool: &DbPool, message_id: i64) -> Result<()> {
    sqlx::query("UPDATE stage_messages SET status = 'done', updated_at = NOW() WHERE id = $1")
        .bind(message_id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Reschedule a failed message, or bury it when `retry_at` is `None`.
///
/// A retry that would collide with a newer pending trigger is folded into it.
pub async fn retry_message(
    pool: &DbPool,
    message_id: i64,
    error: &str,
    retry_at: Option<DateTime<Utc>>,
) -> Result<MessageStatus> {
    let status = sqlx::query_scalar::<_, String>(
        r#"
        UPDATE stage_messages m
        SET status = CASE
                WHEN $3::timestamptz IS NULL THEN 'dead'
                WHEN EXISTS (
                    SELECT 1 FROM stage_messages p
                    WHERE p.dedupe_key = m.dedupe_key
                      AND p.status = 'pending'
                      AND p.id <> m.id
                ) THEN 'done'
                ELSE 'pending'
            END,
            available_at = COALESCE($3, available_at),
            claimed_at = NULL,
            last_error = $2,
            updated_at = NOW()
        WHERE id = $1
        RETURNING status
        "#,
    )
    .bind(message_id)
    .bind(error)
    .bind(retry_at)
    .fetch_optional(pool)
    .await?;

    Ok(match status.as_deref() {
        Some("pending") => MessageStatus::Pending,
        Some("done") => MessageStatus::Done,
        _ => MessageStatus::Dead,
    })
}
