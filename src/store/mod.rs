//! Store abstraction over the pipeline tables.
//!
//! Every stage talks to persisted state through [`PipelineStore`].
//! - Production: [`PgStore`] backed by the sqlx Postgres pool
//! - Testing and dry runs: [`MemoryStore`] holding the tables in process

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::db::models::*;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;

#[async_trait]
pub trait PipelineStore: Send + Sync {
    // ---- tasks ----

    /// Insert a pending task. Losing the one-active-task race yields `Conflict`.
    async fn create_task(&self, task: &NewTask) -> Result<Task>;

    async fn get_task(&self, task_id: i64) -> Result<Option<Task>>;

    async fn active_task_for_owner(&self, owner_id: &str) -> Result<Option<Task>>;

    /// Atomically move a task pending -> running. `None` if it was not pending.
    async fn claim_pending_task(&self, task_id: i64) -> Result<Option<Task>>;

    async fn update_task(&self, task_id: i64, update: &TaskUpdate) -> Result<Option<Task>>;

    async fn tasks_with_status(&self, status: TaskStatus) -> Result<Vec<Task>>;

    /// Force every task in one of `statuses` to failed, returning the rows changed
    async fn fail_tasks_with_status(
        &self,
        statuses: &[TaskStatus],
        message: &str,
    ) -> Result<Vec<Task>>;

    // ---- sources ----

    /// Active sources for an owner in creation order, at most `limit`
    async fn active_sources(&self, owner_id: &str, limit: i64) -> Result<Vec<Source>>;

    async fn count_active_sources(&self, owner_id: &str) -> Result<i64>;

    async fn owner_quota(&self, owner_id: &str) -> Result<Option<OwnerQuota>>;

    // ---- fetch jobs ----

    /// Bulk insert; duplicates on (task, article key) are ignored. Returns rows inserted.
    async fn insert_fetch_jobs(&self, jobs: &[NewFetchJob]) -> Result<u64>;

    /// The subset of `urls` already stored as content items for the source
    async fn existing_article_urls(&self, source_id: i64, urls: &[String])
        -> Result<HashSet<String>>;

    /// Atomically move up to `limit` pending jobs to fetching
    async fn claim_pending_fetch_jobs(
        &self,
        task_id: Option<i64>,
        limit: i64,
    ) -> Result<Vec<FetchJob>>;

    async fn get_fetch_job(&self, job_id: i64) -> Result<Option<FetchJob>>;

    /// Write a terminal fetch status. Returns false if the job was no longer fetching.
    async fn finish_fetch_job(&self, job_id: i64, outcome: &FetchOutcome) -> Result<bool>;

    /// Move jobs claimed before `claimed_before` back to pending
    async fn release_stale_fetch_jobs(&self, claimed_before: DateTime<Utc>) -> Result<u64>;

    async fn fetch_job_counts(&self, task_id: i64, max_attempts: i32) -> Result<FetchJobCounts>;

    /// Completed jobs with no summary and attempts below `max_attempts`
    async fn unsummarized_fetch_jobs(
        &self,
        task_id: Option<i64>,
        max_attempts: i32,
        limit: i64,
    ) -> Result<Vec<FetchJob>>;

    async fn record_summary_failure(&self, job_id: i64, error: &str) -> Result<()>;

    // ---- content and digests ----

    /// Write a content item and its summary together. `None` if the job already has one.
    async fn insert_summarized_item(&self, item: &NewSummarizedItem) -> Result<Option<i64>>;

    async fn summaries_for_sources(&self, source_ids: &[i64]) -> Result<Vec<SummaryEntry>>;

    async fn insert_digest(&self, digest: &NewDigest) -> Result<Digest>;

    async fn get_digest(&self, digest_id: i64) -> Result<Option<Digest>>;

    /// Replace a digest's items with `summary_ids` in order, in one transaction
    async fn replace_digest_items(&self, digest_id: i64, summary_ids: &[i64]) -> Result<()>;

    async fn digest_items(&self, digest_id: i64) -> Result<Vec<DigestItem>>;

    // ---- schedules ----

    async fn enabled_schedules(&self) -> Result<Vec<UserScheduleConfig>>;

    async fn owner_timezone(&self, owner_id: &str) -> Result<Option<String>>;

    async fn record_schedule_run(&self, owner_id: &str, at: DateTime<Utc>) -> Result<()>;

    // ---- stage messages ----

    /// Enqueue unless a pending message with the same dedupe key exists
    async fn enqueue_message(&self, message: &NewStageMessage) -> Result<EnqueueResult>;

    /// Claim available pending messages, plus claimed ones whose lease has expired
    async fn claim_messages(
        &self,
        limit: i64,
        lease_expired_before: DateTime<Utc>,
    ) -> Result<Vec<StageMessage>>;

    async fn ack_message(&self, message_id: i64) -> Result<()>;

    /// Put a failed message back as pending at `retry_at`, or mark it dead when `None`
    async fn retry_message(
        &self,
        message_id: i64,
        error: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<MessageStatus>;
}
