//! Postgres pool setup and schema migrations

use crate::error::{PipelineError, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

pub type DbPool = PgPool;

/// Connections per pool unless `DATABASE_MAX_CONNECTIONS` says otherwise.
/// Each claimed stage message holds at most one connection at a time.
const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Open a pool against `database_url`.
///
/// ```ignore
/// let pool = create_pool("postgres://pipeline@localhost/digests", 10).await?;
/// run_migrations(&pool).await?;
/// let store = PgStore::new(pool);
/// ```
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<DbPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .connect(database_url)
        .await?;

    Ok(pool)
}

/// Open a pool from `DATABASE_URL` and optional `DATABASE_MAX_CONNECTIONS`
pub async fn create_pool_from_env() -> Result<DbPool> {
    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| PipelineError::ConfigError("DATABASE_URL not set".to_string()))?;

    let max_connections = match std::env::var("DATABASE_MAX_CONNECTIONS") {
        Ok(value) => value.trim().parse().map_err(|_| {
            PipelineError::ConfigError(format!("invalid DATABASE_MAX_CONNECTIONS: {}", value))
        })?,
        Err(_) => DEFAULT_MAX_CONNECTIONS,
    };

    create_pool(&database_url, max_connections).await
}

/// Bring the schema in `migrations/` up to date
pub async fn run_migrations(pool: &DbPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn migrations_create_pipeline_tables() {
        dotenvy::dotenv().ok();
        let pool = create_pool_from_env().await.unwrap();
        run_migrations(&pool).await.unwrap();
        // Applying twice is a no-op
        run_migrations(&pool).await.unwrap();

        for table in ["tasks", "fetch_jobs", "summaries", "digest_items", "stage_messages"] {
            let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM pg_tables WHERE tablename = $1)")
                .bind(table)
                .fetch_one(&pool)
                .await
                .unwrap();
            assert!(exists, "missing table {}", table);
        }

        let index: Option<String> = sqlx::query_scalar(
            "SELECT indexname::text FROM pg_indexes WHERE indexname = 'tasks_one_active_per_owner'",
        )
        .fetch_optional(&pool)
        .await
        .unwrap();
        assert!(index.is_some());
    }
}
