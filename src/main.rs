//! Digest Pipeline CLI
//!
//! Runs the HTTP API, the stage worker, or a single stage from the command line.

use anyhow::Result;
use clap::{Parser, Subcommand};
use digest_pipeline::db::models::TaskType;
use digest_pipeline::db::{create_pool_from_env, run_migrations};
use digest_pipeline::worker::{setup_signal_handler, StageRunner, WorkerConfig};
use digest_pipeline::{
    api, stages, CompletionClient, Crawler, FeedClient, OpenAiCompletionClient, PgStore,
    PipelineConfig, PipelineContext,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "digest-pipeline")]
#[command(about = "Fetch, summarize and digest subscribed feeds")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API
    Serve {
        /// Bind address (default: PIPELINE_BIND_ADDR or 0.0.0.0:8080)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Run as worker, draining the stage queue
    Worker {
        /// Poll interval in seconds (default: 2)
        #[arg(short, long, default_value = "2")]
        poll_interval: u64,

        /// Run one batch and exit (for testing)
        #[arg(long)]
        once: bool,

        /// Per-message timeout in seconds (default: 90)
        #[arg(short, long, default_value = "90")]
        timeout: u64,
    },

    /// Start a digest task for an owner and enqueue its execution
    Start {
        /// Owner to build a digest for
        #[arg(short, long)]
        owner: String,

        /// Time window: today or week
        #[arg(short = 'r', long, default_value = "week")]
        time_range: String,
    },

    /// Run one completion monitor pass
    Monitor,

    /// Run one auto-digest scheduler pass
    Scheduler,

    /// Mark every pending or running task failed
    Reap,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Load .env file if present
    dotenvy::dotenv().ok();

    let ctx = build_context().await?;

    match cli.command {
        Commands::Serve { bind } => {
            let addr = bind
                .or_else(|| std::env::var("PIPELINE_BIND_ADDR").ok())
                .unwrap_or_else(|| "0.0.0.0:8080".to_string());
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            info!("Listening on {}", addr);
            axum::serve(listener, api::router(ctx)).await?;
        }

        Commands::Worker {
            poll_interval,
            once,
            timeout,
        } => {
            let config = WorkerConfig::builder()
                .poll_interval_secs(poll_interval)
                .stage_timeout(Duration::from_secs(timeout))
                .build();
            let runner = StageRunner::new(ctx, config);

            if once {
                info!("Running one batch...");
                let handled = runner.run_once().await?;
                println!("Handled {} stage message(s)", handled);
            } else {
                let shutdown = runner.shutdown_handle();
                setup_signal_handler(shutdown);
                runner.run().await?;
            }
        }

        Commands::Start { owner, time_range } => {
            let task = stages::submit_task(&ctx, &owner, &time_range, TaskType::Digest).await?;
            println!("Task {} created for {} ({})", task.id, task.owner_id, time_range);
        }

        Commands::Monitor => {
            let report = stages::run_monitor(&ctx).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Scheduler => {
            let report = stages::tick(&ctx).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Reap => {
            let reaped = stages::reap_stuck_tasks(&ctx).await?;
            println!("Reaped {} task(s)", reaped.len());
            for task in reaped {
                println!("  - task {} ({})", task.id, task.owner_id);
            }
        }
    }

    Ok(())
}

/// Production context: Postgres store, HTTP crawler and feed client, OpenAI completions
async fn build_context() -> Result<PipelineContext> {
    let config = PipelineConfig::from_env()?;

    let pool = create_pool_from_env().await?;
    run_migrations(&pool).await?;
    info!("Database connection established");

    let feeds = FeedClient::new(config.feed_timeout)?;
    let completions = OpenAiCompletionClient::from_env()?;
    info!("Completion model: {}", completions.model());

    Ok(PipelineContext::new(
        Arc::new(PgStore::new(pool)),
        Arc::new(Crawler::new()?),
        Arc::new(feeds),
        Arc::new(completions),
        config,
    ))
}
