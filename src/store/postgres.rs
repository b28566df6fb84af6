//! Postgres-backed store delegating to the `db` query modules

use super::PipelineStore;
use crate::db::models::*;
use crate::db::{content, digests, fetch_jobs, messages, schedules, sources, tasks, DbPool};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// Store over a sqlx Postgres pool
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl PipelineStore for PgStore {
    async fn create_task(&self, task: &NewTask) -> Result<Task> {
        tasks::create_task(&self.pool, task).await
    }

    async fn get_task(&self, task_id: i64) -> Result<Option<Task>> {
        tasks::get_task_by_id(&self.pool, task_id).await
    }

    async fn active_task_for_owner(&self, owner_id: &str) -> Result<Option<Task>> {
        tasks::get_active_task_for_owner(&self.pool, owner_id).await
    }

    async fn claim_pending_task(&self, task_id: i64) -> Result<Option<Task>> {
        tasks::claim_pending_task(&self.pool, task_id).await
    }

    async fn update_task(&self, task_id: i64, update: &TaskUpdate) -> Result<Option<Task>> {
        tasks::update_task(&self.pool, task_id, update).await
    }

    async fn tasks_with_status(&self, status: TaskStatus) -> Result<Vec<Task>> {
        tasks::list_tasks_by_status(&self.pool, status).await
    }

    async fn fail_tasks_with_status(
        &self,
        statuses: &[TaskStatus],
        message: &str,
    ) -> Result<Vec<Task>> {
        tasks::fail_tasks_by_status(&self.pool, statuses, message).await
    }

    async fn active_sources(&self, owner_id: &str, limit: i64) -> Result<Vec<Source>> {
        sources::list_active_sources(&self.pool, owner_id, limit).await
    }

    async fn count_active_sources(&self, owner_id: &str) -> Result<i64> {
        sources::count_active_sources(&self.pool, owner_id).await
    }

    async fn owner_quota(&self, owner_id: &str) -> Result<Option<OwnerQuota>> {
        sources::get_owner_quota(&self.pool, owner_id).await
    }

    async fn insert_fetch_jobs(&self, jobs: &[NewFetchJob]) -> Result<u64> {
        fetch_jobs::insert_fetch_jobs(&self.pool, jobs).await
    }

    async fn existing_article_urls(
        &self,
        source_id: i64,
        urls: &[String],
    ) -> Result<HashSet<String>> {
        fetch_jobs::existing_article_urls(&self.pool, source_id, urls).await
    }

    async fn claim_pending_fetch_jobs(
        &self,
        task_id: Option<i64>,
        limit: i64,
    ) -> Result<Vec<FetchJob>> {
        fetch_jobs::claim_pending_fetch_jobs(&self.pool, task_id, limit).await
    }

    async fn get_fetch_job(&self, job_id: i64) -> Result<Option<FetchJob>> {
        fetch_jobs::get_fetch_job(&self.pool, job_id).await
    }

    async fn finish_fetch_job(&self, job_id: i64, outcome: &FetchOutcome) -> Result<bool> {
        fetch_jobs::finish_fetch_job(&self.pool, job_id, outcome).await
    }

    async fn release_stale_fetch_jobs(&self, claimed_before: DateTime<Utc>) -> Result<u64> {
        fetch_jobs::release_stale_fetch_jobs(&self.pool, claimed_before).await
    }

    async fn fetch_job_counts(&self, task_id: i64, max_attempts: i32) -> Result<FetchJobCounts> {
        fetch_jobs::count_fetch_jobs(&self.pool, task_id, max_attempts).await
    }

    async fn unsummarized_fetch_jobs(
        &self,
        task_id: Option<i64>,
        max_attempts: i32,
        limit: i64,
    ) -> Result<Vec<FetchJob>> {
        fetch_jobs::list_unsummarized_fetch_jobs(&self.pool, task_id, max_attempts, limit).await
    }

    async fn record_summary_failure(&self, job_id: i64, error: &str) -> Result<()> {
        fetch_jobs::record_summary_failure(&self.pool, job_id, error).await
    }

    async fn insert_summarized_item(&self, item: &NewSummarizedItem) -> Result<Option<i64>> {
        content::insert_summarized_item(&self.pool, item).await
    }

    async fn summaries_for_sources(&self, source_ids: &[i64]) -> Result<Vec<SummaryEntry>> {
        content::list_summaries_for_sources(&self.pool, source_ids).await
    }

    async fn insert_digest(&self, digest: &NewDigest) -> Result<Digest> {
        digests::insert_digest(&self.pool, digest).await
    }

    async fn get_digest(&self, digest_id: i64) -> Result<Option<Digest>> {
        digests::get_digest_by_id(&self.pool, digest_id).await
    }

    async fn replace_digest_items(&self, digest_id: i64, summary_ids: &[i64]) -> Result<()> {
        digests::replace_digest_items(&self.pool, digest_id, summary_ids).await
    }

    async fn digest_items(&self, digest_id: i64) -> Result<Vec<DigestItem>> {
        digests::list_digest_items(&self.pool, digest_id).await
    }

    async fn enabled_schedules(&self) -> Result<Vec<UserScheduleConfig>> {
        schedules::list_enabled_schedules(&self.pool).await
    }

    async fn owner_timezone(&self, owner_id: &str) -> Result<Option<String>> {
        schedules::get_owner_timezone(&self.pool, owner_id).await
    }

    async fn record_schedule_run(&self, owner_id: &str, at: DateTime<Utc>) -> Result<()> {
        schedules::update_last_run(&self.pool, owner_id, at).await
    }

    async fn enqueue_message(&self, message: &NewStageMessage) -> Result<EnqueueResult> {
        messages::enqueue_message(&self.pool, message).await
    }

    async fn claim_messages(
        &self,
        limit: i64,
        lease_expired_before: DateTime<Utc>,
    ) -> Result<Vec<StageMessage>> {
        messages::claim_messages(&self.pool, limit, lease_expired_before).await
    }

    async fn ack_message(&self, message_id: i64) -> Result<()> {
        messages::ack_message(&self.pool, message_id).await
    }

    async fn retry_message(
        &self,
        message_id: i64,
        error: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<MessageStatus> {
        messages::retry_message(&self.pool, message_id, error, retry_at).await
    }
}
