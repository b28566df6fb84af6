//! Create a test owner with one feed and queue a digest task for it
//!
//! Usage: cargo run --bin create_test_task [owner_id] [feed_url]

use digest_pipeline::db::models::{NewTask, TaskType};
use digest_pipeline::db::{create_pool_from_env, run_migrations, sources};
use digest_pipeline::queue::{self, StageCommand};
use digest_pipeline::{PgStore, PipelineStore};

const DEFAULT_OWNER: &str = "test-owner";
const DEFAULT_FEED: &str = "https://blog.rust-lang.org/feed.xml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    let owner_id = args.get(1).map(String::as_str).unwrap_or(DEFAULT_OWNER);
    let feed_url = args.get(2).map(String::as_str).unwrap_or(DEFAULT_FEED);

    println!("Connecting to database...");
    let pool = create_pool_from_env().await?;
    run_migrations(&pool).await?;
    println!("✓ Connected to database");

    let source_id = sources::create_source(&pool, owner_id, "Test Feed", feed_url).await?;
    println!("✓ Source {} created for {}", source_id, owner_id);

    let store = PgStore::new(pool);
    let task = store
        .create_task(&NewTask {
            owner_id: owner_id.to_string(),
            task_type: TaskType::Digest,
            time_range: "week".to_string(),
            total: store.count_active_sources(owner_id).await?,
        })
        .await?;
    queue::enqueue(&store, StageCommand::ExecuteTask { task_id: task.id }).await?;

    println!("✓ Test task created:");
    println!("  ID: {}", task.id);
    println!("  Owner: {}", task.owner_id);
    println!("  Status: {}", task.status);

    println!("\nNext steps:");
    println!("  1. Run worker: cargo run --release -- worker --once");
    println!("  2. Inspect task: psql $DATABASE_URL -c 'SELECT * FROM tasks WHERE id = {}'", task.id);
    println!("\n💡 To clean up test data after testing:");
    println!("  cargo run --bin cleanup_test_data -- {}", owner_id);

    Ok(())
}
