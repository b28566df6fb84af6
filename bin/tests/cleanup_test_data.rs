//! Clean up test data from database
//!
//! Usage:
//!   cargo run --bin cleanup_test_data <owner_id>
//!   cargo run --bin cleanup_test_data --all-test
//!
//! Options:
//!   owner_id      Clean up everything belonging to one owner
//!   --all-test    Clean up every owner whose id starts with 'test'
//!
//! This tool removes:
//! - Stage messages pointing at the owner's tasks
//! - Digests (digest items cascade)
//! - Tasks (fetch jobs, content items and summaries cascade)
//! - Sources, quotas and schedule configs

use digest_pipeline::db::{create_pool_from_env, DbPool};
use std::io::{self, Write};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        return Ok(());
    }

    let pool = create_pool_from_env().await?;

    let owner_ids = match args[1].as_str() {
        "--all-test" => find_test_owners(&pool).await?,
        owner => vec![owner.to_string()],
    };

    if owner_ids.is_empty() {
        println!("✓ No test owners found to clean up");
        return Ok(());
    }

    println!("📋 Owners to be cleaned up:");
    for owner_id in &owner_ids {
        show_owner_info(&pool, owner_id).await?;
    }

    println!("\n⚠️  This will permanently delete the above data!");
    print!("Continue? (yes/no): ");
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    if input.trim().to_lowercase() != "yes" {
        println!("❌ Cancelled");
        return Ok(());
    }

    for owner_id in &owner_ids {
        cleanup_owner(&pool, owner_id).await?;
    }

    println!("\n✅ Cleanup complete!");
    Ok(())
}

fn print_usage() {
    println!("Usage:");
    println!("  cargo run --bin cleanup_test_data <owner_id>");
    println!("  cargo run --bin cleanup_test_data --all-test");
}

async fn find_test_owners(pool: &DbPool) -> anyhow::Result<Vec<String>> {
    let owners = sqlx::query_scalar::<_, String>(
        r#"
        SELECT owner_id FROM sources WHERE owner_id LIKE 'test%'
        UNION
        SELECT owner_id FROM tasks WHERE owner_id LIKE 'test%'
        ORDER BY 1
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(owners)
}

async fn show_owner_info(pool: &DbPool, owner_id: &str) -> anyhow::Result<()> {
    let source_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sources WHERE owner_id = $1")
        .bind(owner_id)
        .fetch_one(pool)
        .await?;
    let task_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tasks WHERE owner_id = $1")
        .bind(owner_id)
        .fetch_one(pool)
        .await?;
    let job_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM fetch_jobs WHERE owner_id = $1")
        .bind(owner_id)
        .fetch_one(pool)
        .await?;
    let digest_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM digests WHERE owner_id = $1")
        .bind(owner_id)
        .fetch_one(pool)
        .await?;

    println!("\n  Owner: {}", owner_id);
    println!("  └─ Sources: {}", source_count);
    println!("  └─ Tasks: {}", task_count);
    println!("     └─ Fetch jobs: {}", job_count);
    println!("  └─ Digests: {}", digest_count);

    Ok(())
}

async fn cleanup_owner(pool: &DbPool, owner_id: &str) -> anyhow::Result<()> {
    println!("\n🗑️  Cleaning up owner {}...", owner_id);

    let messages = sqlx::query(
        r#"
        DELETE FROM stage_messages
        WHERE payload ? 'task_id'
          AND (payload->>'task_id')::bigint IN (SELECT id FROM tasks WHERE owner_id = $1)
        "#,
    )
    .bind(owner_id)
    .execute(pool)
    .await?;
    if messages.rows_affected() > 0 {
        println!("  ✓ Deleted {} stage messages", messages.rows_affected());
    }

    let digests = sqlx::query("DELETE FROM digests WHERE owner_id = $1")
        .bind(owner_id)
        .execute(pool)
        .await?;
    println!("  ✓ Deleted {} digests", digests.rows_affected());

    let tasks = sqlx::query("DELETE FROM tasks WHERE owner_id = $1")
        .bind(owner_id)
        .execute(pool)
        .await?;
    println!("  ✓ Deleted {} tasks", tasks.rows_affected());

    let sources = sqlx::query("DELETE FROM sources WHERE owner_id = $1")
        .bind(owner_id)
        .execute(pool)
        .await?;
    println!("  ✓ Deleted {} sources", sources.rows_affected());

    for table in ["owner_quotas", "schedule_configs"] {
        sqlx::query(&format!("DELETE FROM {} WHERE owner_id = $1", table))
            .bind(owner_id)
            .execute(pool)
            .await?;
    }

    println!("✓ Owner {} cleaned up successfully", owner_id);
    Ok(())
}
