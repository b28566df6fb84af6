//! Database module for digest-pipeline
//!
//! Provides PostgreSQL operations for tasks, sources, fetch jobs, content items,
//! summaries, digests, schedules and stage messages.

pub mod connection;
pub mod content;
pub mod digests;
pub mod fetch_jobs;
pub mod messages;
pub mod models;
pub mod schedules;
pub mod sources;
pub mod tasks;

pub use connection::{create_pool, create_pool_from_env, run_migrations, DbPool};
pub use models::*;
