//! In-process store used by tests and local dry runs.
//!
//! All tables live behind one mutex, so every operation is atomic the same way
//! a single SQL statement is.

use super::PipelineStore;
use crate::db::models::*;
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct Tables {
    next_id: i64,
    tasks: Vec<Task>,
    sources: Vec<Source>,
    quotas: HashMap<String, OwnerQuota>,
    fetch_jobs: Vec<FetchJob>,
    content_items: Vec<ContentItem>,
    summaries: Vec<Summary>,
    digests: Vec<Digest>,
    digest_items: Vec<DigestItem>,
    schedules: Vec<UserScheduleConfig>,
    messages: Vec<StageMessage>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn has_content_item(&self, fetch_job_id: i64) -> bool {
        self.content_items
            .iter()
            .any(|item| item.fetch_job_id == fetch_job_id)
    }
}

/// Store keeping every table in memory
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register an active source for an owner
    pub fn add_source(&self, owner_id: &str, name: &str, feed_url: &str) -> Source {
        let mut t = self.tables();
        let source = Source {
            id: t.next_id(),
            owner_id: owner_id.to_string(),
            name: name.to_string(),
            feed_url: feed_url.to_string(),
            is_active: true,
            created_at: Utc::now(),
        };
        t.sources.push(source.clone());
        source
    }

    pub fn set_quota(&self, quota: OwnerQuota) {
        self.tables().quotas.insert(quota.owner_id.clone(), quota);
    }

    pub fn upsert_schedule(&self, schedule: UserScheduleConfig) {
        let mut t = self.tables();
        t.schedules.retain(|s| s.owner_id != schedule.owner_id);
        t.schedules.push(schedule);
    }

    pub fn schedule_for(&self, owner_id: &str) -> Option<UserScheduleConfig> {
        self.tables()
            .schedules
            .iter()
            .find(|s| s.owner_id == owner_id)
            .cloned()
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.tables().tasks.clone()
    }

    pub fn fetch_jobs_for_task(&self, task_id: i64) -> Vec<FetchJob> {
        self.tables()
            .fetch_jobs
            .iter()
            .filter(|job| job.task_id == task_id)
            .cloned()
            .collect()
    }

    pub fn digests_for_owner(&self, owner_id: &str) -> Vec<Digest> {
        self.tables()
            .digests
            .iter()
            .filter(|d| d.owner_id == owner_id)
            .cloned()
            .collect()
    }

    pub fn messages(&self) -> Vec<StageMessage> {
        self.tables().messages.clone()
    }

    /// Move a stored article's publish time
    pub fn set_published_at(&self, content_item_id: i64, published_at: DateTime<Utc>) -> bool {
        let mut t = self.tables();
        match t.content_items.iter_mut().find(|item| item.id == content_item_id) {
            Some(item) => {
                item.published_at = published_at;
                true
            }
            None => false,
        }
    }

    /// Drop every pending stage message, simulating lost triggers
    pub fn drop_pending_messages(&self) -> usize {
        let mut t = self.tables();
        let before = t.messages.len();
        t.messages
            .retain(|m| m.status != MessageStatus::Pending.as_str());
        before - t.messages.len()
    }
}

#[async_trait]
impl PipelineStore for MemoryStore {
    async fn create_task(&self, new_task: &NewTask) -> Result<Task> {
        let mut t = self.tables();

        if let Some(existing) = t.tasks.iter().find(|task| {
            task.owner_id == new_task.owner_id && !task.is_terminal()
        }) {
            return Err(PipelineError::Conflict {
                owner_id: new_task.owner_id.clone(),
                existing_task_id: existing.id,
            });
        }

        let now = Utc::now();
        let task = Task {
            id: t.next_id(),
            owner_id: new_task.owner_id.clone(),
            task_type: new_task.task_type.as_str().to_string(),
            status: TaskStatus::Pending.as_str().to_string(),
            config: new_task.config_json(),
            progress: new_task.progress_json(),
            result: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        };
        t.tasks.push(task.clone());
        Ok(task)
    }

    async fn get_task(&self, task_id: i64) -> Result<Option<Task>> {
        Ok(self.tables().tasks.iter().find(|t| t.id == task_id).cloned())
    }

    async fn active_task_for_owner(&self, owner_id: &str) -> Result<Option<Task>> {
        Ok(self
            .tables()
            .tasks
            .iter()
            .find(|t| t.owner_id == owner_id && !t.is_terminal())
            .cloned())
    }

    async fn claim_pending_task(&self, task_id: i64) -> Result<Option<Task>> {
        let mut t = self.tables();
        let now = Utc::now();
        Ok(t.tasks
            .iter_mut()
            .find(|task| task.id == task_id && task.status == TaskStatus::Pending.as_str())
            .map(|task| {
                task.status = TaskStatus::Running.as_str().to_string();
                task.started_at = Some(now);
                task.updated_at = now;
                task.clone()
            }))
    }

    async fn update_task(&self, task_id: i64, update: &TaskUpdate) -> Result<Option<Task>> {
        let mut t = self.tables();
        let now = Utc::now();
        let Some(task) = t.tasks.iter_mut().find(|task| task.id == task_id) else {
            return Ok(None);
        };
        if let Some(expected) = update.expected_status {
            if task.status != expected.as_str() {
                return Ok(None);
            }
        }

        if let Some(status) = update.status {
            task.status = status.as_str().to_string();
            if status.is_terminal() {
                task.completed_at = Some(now);
            }
        }
        if let Some(progress) = &update.progress {
            task.progress = serde_json::to_value(progress)?;
        }
        if let Some(result) = &update.result {
            task.result = Some(result.clone());
        }
        if let Some(message) = &update.error_message {
            task.error_message = Some(message.clone());
        }
        task.updated_at = now;
        Ok(Some(task.clone()))
    }

    async fn tasks_with_status(&self, status: TaskStatus) -> Result<Vec<Task>> {
        Ok(self
            .tables()
            .tasks
            .iter()
            .filter(|t| t.status == status.as_str())
            .cloned()
            .collect())
    }

    async fn fail_tasks_with_status(
        &self,
        statuses: &[TaskStatus],
        message: &str,
    ) -> Result<Vec<Task>> {
        let mut t = self.tables();
        let now = Utc::now();
        let mut reaped = Vec::new();
        for task in t.tasks.iter_mut() {
            let matches = task
                .task_status()
                .map(|s| statuses.contains(&s))
                .unwrap_or(false);
            if matches {
                task.status = TaskStatus::Failed.as_str().to_string();
                task.error_message = Some(message.to_string());
                task.completed_at = Some(now);
                task.updated_at = now;
                reaped.push(task.clone());
            }
        }
        Ok(reaped)
    }

    async fn active_sources(&self, owner_id: &str, limit: i64) -> Result<Vec<Source>> {
        let t = self.tables();
        let mut sources: Vec<Source> = t
            .sources
            .iter()
            .filter(|s| s.owner_id == owner_id && s.is_active)
            .cloned()
            .collect();
        sources.sort_by_key(|s| (s.created_at, s.id));
        sources.truncate(limit.max(0) as usize);
        Ok(sources)
    }

    async fn count_active_sources(&self, owner_id: &str) -> Result<i64> {
        Ok(self
            .tables()
            .sources
            .iter()
            .filter(|s| s.owner_id == owner_id && s.is_active)
            .count() as i64)
    }

    async fn owner_quota(&self, owner_id: &str) -> Result<Option<OwnerQuota>> {
        Ok(self.tables().quotas.get(owner_id).cloned())
    }

    async fn insert_fetch_jobs(&self, jobs: &[NewFetchJob]) -> Result<u64> {
        let mut t = self.tables();
        let now = Utc::now();
        let mut inserted = 0;
        for job in jobs {
            let duplicate = t
                .fetch_jobs
                .iter()
                .any(|j| j.task_id == job.task_id && j.article_key == job.article_key);
            if duplicate {
                continue;
            }
            let id = t.next_id();
            t.fetch_jobs.push(FetchJob {
                id,
                task_id: job.task_id,
                owner_id: job.owner_id.clone(),
                source_id: job.source_id,
                article_url: job.article_url.clone(),
                article_key: job.article_key.clone(),
                article_title: job.article_title.clone(),
                published_at: job.published_at,
                status: FetchJobStatus::Pending.as_str().to_string(),
                content: None,
                error_message: None,
                summary_attempts: 0,
                summary_error: None,
                claimed_at: None,
                created_at: now,
                updated_at: now,
            });
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn existing_article_urls(
        &self,
        source_id: i64,
        urls: &[String],
    ) -> Result<HashSet<String>> {
        let wanted: HashSet<&String> = urls.iter().collect();
        Ok(self
            .tables()
            .content_items
            .iter()
            .filter(|item| item.source_id == source_id && wanted.contains(&item.url))
            .map(|item| item.url.clone())
            .collect())
    }

    async fn claim_pending_fetch_jobs(
        &self,
        task_id: Option<i64>,
        limit: i64,
    ) -> Result<Vec<FetchJob>> {
        let mut t = self.tables();
        let now = Utc::now();
        let mut claimed = Vec::new();
        for job in t.fetch_jobs.iter_mut() {
            if claimed.len() as i64 >= limit {
                break;
            }
            if job.status != FetchJobStatus::Pending.as_str() {
                continue;
            }
            if task_id.is_some_and(|id| id != job.task_id) {
                continue;
            }
            job.status = FetchJobStatus::Fetching.as_str().to_string();
            job.claimed_at = Some(now);
            job.updated_at = now;
            claimed.push(job.clone());
        }
        Ok(claimed)
    }

    async fn get_fetch_job(&self, job_id: i64) -> Result<Option<FetchJob>> {
        Ok(self
            .tables()
            .fetch_jobs
            .iter()
            .find(|j| j.id == job_id)
            .cloned())
    }

    async fn finish_fetch_job(&self, job_id: i64, outcome: &FetchOutcome) -> Result<bool> {
        let mut t = self.tables();
        let Some(job) = t.fetch_jobs.iter_mut().find(|j| {
            j.id == job_id && j.status == FetchJobStatus::Fetching.as_str()
        }) else {
            return Ok(false);
        };

        match outcome {
            FetchOutcome::Completed { content } => {
                job.status = FetchJobStatus::Completed.as_str().to_string();
                job.content = Some(content.clone());
                job.error_message = None;
            }
            FetchOutcome::Failed { error } => {
                job.status = FetchJobStatus::Failed.as_str().to_string();
                job.error_message = Some(error.clone());
            }
        }
        job.updated_at = Utc::now();
        Ok(true)
    }

    async fn release_stale_fetch_jobs(&self, claimed_before: DateTime<Utc>) -> Result<u64> {
        let mut t = self.tables();
        let mut released = 0;
        for job in t.fetch_jobs.iter_mut() {
            let stale = job.status == FetchJobStatus::Fetching.as_str()
                && job.claimed_at.is_some_and(|at| at < claimed_before);
            if stale {
                job.status = FetchJobStatus::Pending.as_str().to_string();
                job.claimed_at = None;
                job.updated_at = Utc::now();
                released += 1;
            }
        }
        Ok(released)
    }

    async fn fetch_job_counts(&self, task_id: i64, max_attempts: i32) -> Result<FetchJobCounts> {
        let t = self.tables();
        let mut counts = FetchJobCounts::default();
        for job in t.fetch_jobs.iter().filter(|j| j.task_id == task_id) {
            counts.total += 1;
            match job.job_status() {
                Some(FetchJobStatus::Pending) => counts.pending += 1,
                Some(FetchJobStatus::Fetching) => counts.fetching += 1,
                Some(FetchJobStatus::Failed) => counts.failed += 1,
                Some(FetchJobStatus::Completed) => {
                    counts.completed += 1;
                    if t.has_content_item(job.id) {
                        counts.summarized += 1;
                    } else if job.summary_attempts >= max_attempts {
                        counts.summary_exhausted += 1;
                    }
                }
                None => {}
            }
        }
        Ok(counts)
    }

    async fn unsummarized_fetch_jobs(
        &self,
        task_id: Option<i64>,
        max_attempts: i32,
        limit: i64,
    ) -> Result<Vec<FetchJob>> {
        let t = self.tables();
        Ok(t.fetch_jobs
            .iter()
            .filter(|j| j.status == FetchJobStatus::Completed.as_str())
            .filter(|j| task_id.map_or(true, |id| id == j.task_id))
            .filter(|j| j.summary_attempts < max_attempts)
            .filter(|j| !t.has_content_item(j.id))
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn record_summary_failure(&self, job_id: i64, error: &str) -> Result<()> {
        let mut t = self.tables();
        if let Some(job) = t.fetch_jobs.iter_mut().find(|j| j.id == job_id) {
            job.summary_attempts += 1;
            job.summary_error = Some(error.to_string());
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn insert_summarized_item(&self, item: &NewSummarizedItem) -> Result<Option<i64>> {
        let mut t = self.tables();
        if t.has_content_item(item.fetch_job_id) {
            return Ok(None);
        }

        let now = Utc::now();
        let content_item_id = t.next_id();
        t.content_items.push(ContentItem {
            id: content_item_id,
            fetch_job_id: item.fetch_job_id,
            task_id: item.task_id,
            owner_id: item.owner_id.clone(),
            source_id: item.source_id,
            title: item.title.clone(),
            url: item.url.clone(),
            content: item.content.clone(),
            published_at: item.published_at,
            created_at: now,
        });

        let summary_id = t.next_id();
        t.summaries.push(Summary {
            id: summary_id,
            content_item_id,
            summary_text: item.summary_text.clone(),
            model: item.model.clone(),
            created_at: now,
        });
        Ok(Some(summary_id))
    }

    async fn summaries_for_sources(&self, source_ids: &[i64]) -> Result<Vec<SummaryEntry>> {
        let t = self.tables();
        let items: HashMap<i64, &ContentItem> = t
            .content_items
            .iter()
            .filter(|item| source_ids.contains(&item.source_id))
            .map(|item| (item.id, item))
            .collect();

        let mut entries: Vec<SummaryEntry> = t
            .summaries
            .iter()
            .filter_map(|summary| {
                items.get(&summary.content_item_id).map(|item| SummaryEntry {
                    summary_id: summary.id,
                    content_item_id: item.id,
                    task_id: item.task_id,
                    source_id: item.source_id,
                    title: item.title.clone(),
                    url: item.url.clone(),
                    summary_text: summary.summary_text.clone(),
                    published_at: item.published_at,
                })
            })
            .collect();
        entries.sort_by(|a, b| {
            b.published_at
                .cmp(&a.published_at)
                .then(a.summary_id.cmp(&b.summary_id))
        });
        Ok(entries)
    }

    async fn insert_digest(&self, digest: &NewDigest) -> Result<Digest> {
        let mut t = self.tables();
        let now = Utc::now();
        let row = Digest {
            id: t.next_id(),
            owner_id: digest.owner_id.clone(),
            task_id: digest.task_id,
            title: digest.title.clone(),
            content: digest.content.clone(),
            time_range: digest.time_range.clone(),
            generation_date: digest.generation_date,
            item_count: digest.item_count,
            source_count: digest.source_count,
            created_at: now,
            updated_at: now,
        };
        t.digests.push(row.clone());
        Ok(row)
    }

    async fn get_digest(&self, digest_id: i64) -> Result<Option<Digest>> {
        Ok(self
            .tables()
            .digests
            .iter()
            .find(|d| d.id == digest_id)
            .cloned())
    }

    async fn replace_digest_items(&self, digest_id: i64, summary_ids: &[i64]) -> Result<()> {
        let mut t = self.tables();
        t.digest_items.retain(|item| item.digest_id != digest_id);
        for (position, summary_id) in summary_ids.iter().enumerate() {
            t.digest_items.push(DigestItem {
                digest_id,
                summary_id: *summary_id,
                position: position as i32,
            });
        }
        Ok(())
    }

    async fn digest_items(&self, digest_id: i64) -> Result<Vec<DigestItem>> {
        let mut items: Vec<DigestItem> = self
            .tables()
            .digest_items
            .iter()
            .filter(|item| item.digest_id == digest_id)
            .cloned()
            .collect();
        items.sort_by_key(|item| item.position);
        Ok(items)
    }

    async fn enabled_schedules(&self) -> Result<Vec<UserScheduleConfig>> {
        Ok(self
            .tables()
            .schedules
            .iter()
            .filter(|s| s.enabled)
            .cloned()
            .collect())
    }

    async fn owner_timezone(&self, owner_id: &str) -> Result<Option<String>> {
        Ok(self
            .tables()
            .schedules
            .iter()
            .find(|s| s.owner_id == owner_id)
            .and_then(|s| s.timezone.clone()))
    }

    async fn record_schedule_run(&self, owner_id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut t = self.tables();
        if let Some(schedule) = t.schedules.iter_mut().find(|s| s.owner_id == owner_id) {
            schedule.last_run_at = Some(at);
        }
        Ok(())
    }

    async fn enqueue_message(&self, message: &NewStageMessage) -> Result<EnqueueResult> {
        let mut t = self.tables();
        let duplicate = t.messages.iter().any(|m| {
            m.dedupe_key == message.dedupe_key && m.status == MessageStatus::Pending.as_str()
        });
        if duplicate {
            return Ok(EnqueueResult::Duplicate);
        }

        let now = Utc::now();
        let id = t.next_id();
        t.messages.push(StageMessage {
            id,
            kind: message.kind.clone(),
            payload: message.payload.clone(),
            dedupe_key: message.dedupe_key.clone(),
            status: MessageStatus::Pending.as_str().to_string(),
            attempts: 0,
            last_error: None,
            available_at: message.available_at,
            claimed_at: None,
            created_at: now,
            updated_at: now,
        });
        Ok(EnqueueResult::Created(id))
    }

    async fn claim_messages(
        &self,
        limit: i64,
        lease_expired_before: DateTime<Utc>,
    ) -> Result<Vec<StageMessage>> {
        let mut t = self.tables();
        let now = Utc::now();

        let mut candidates: Vec<usize> = t
            .messages
            .iter()
            .enumerate()
            .filter(|(_, m)| {
                (m.status == MessageStatus::Pending.as_str() && m.available_at <= now)
                    || (m.status == MessageStatus::Claimed.as_str()
                        && m.claimed_at.is_some_and(|at| at < lease_expired_before))
            })
            .map(|(idx, _)| idx)
            .collect();
        candidates.sort_by_key(|idx| (t.messages[*idx].available_at, t.messages[*idx].id));
        candidates.truncate(limit.max(0) as usize);

        let mut claimed = Vec::with_capacity(candidates.len());
        for idx in candidates {
            let message = &mut t.messages[idx];
            message.status = MessageStatus::Claimed.as_str().to_string();
            message.claimed_at = Some(now);
            message.attempts += 1;
            message.updated_at = now;
            claimed.push(message.clone());
        }
        Ok(claimed)
    }

    async fn ack_message(&self, message_id: i64) -> Result<()> {
        let mut t = self.tables();
        if let Some(message) = t.messages.iter_mut().find(|m| m.id == message_id) {
            message.status = MessageStatus::Done.as_str().to_string();
            message.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn retry_message(
        &self,
        message_id: i64,
        error: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<MessageStatus> {
        let mut t = self.tables();
        let Some(idx) = t.messages.iter().position(|m| m.id == message_id) else {
            return Ok(MessageStatus::Dead);
        };
        let dedupe_key = t.messages[idx].dedupe_key.clone();
        let pending_twin = t.messages.iter().any(|m| {
            m.id != message_id
                && m.dedupe_key == dedupe_key
                && m.status == MessageStatus::Pending.as_str()
        });

        let status = match retry_at {
            Some(_) if pending_twin => MessageStatus::Done,
            Some(_) => MessageStatus::Pending,
            None => MessageStatus::Dead,
        };

        let message = &mut t.messages[idx];
        message.status = status.as_str().to_string();
        message.last_error = Some(error.to_string());
        if let (MessageStatus::Pending, Some(at)) = (status, retry_at) {
            message.available_at = at;
            message.claimed_at = None;
        }
        message.updated_at = Utc::now();
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_task(owner: &str) -> NewTask {
        NewTask {
            owner_id: owner.to_string(),
            task_type: TaskType::Digest,
            time_range: "week".to_string(),
            total: 1,
        }
    }

    #[tokio::test]
    async fn second_active_task_conflicts() {
        let store = MemoryStore::new();
        let first = store.create_task(&new_task("alice")).await.unwrap();
        let err = store.create_task(&new_task("alice")).await.unwrap_err();
        match err {
            PipelineError::Conflict {
                existing_task_id, ..
            } => assert_eq!(existing_task_id, first.id),
            other => panic!("unexpected error: {other}"),
        }

        store
            .update_task(first.id, &TaskUpdate::status(TaskStatus::Completed))
            .await
            .unwrap();
        assert!(store.create_task(&new_task("alice")).await.is_ok());
    }

    #[tokio::test]
    async fn guarded_update_skips_tasks_in_other_statuses() {
        let store = MemoryStore::new();
        let task = store.create_task(&new_task("alice")).await.unwrap();
        store
            .fail_tasks_with_status(&[TaskStatus::Pending], "reaped")
            .await
            .unwrap();

        let update = TaskUpdate::status(TaskStatus::Processing).only_from(TaskStatus::Running);
        assert!(store.update_task(task.id, &update).await.unwrap().is_none());

        let stored = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(stored.task_status(), Some(TaskStatus::Failed));
        assert_eq!(stored.error_message.as_deref(), Some("reaped"));
    }

    #[tokio::test]
    async fn duplicate_fan_out_is_ignored() {
        let store = MemoryStore::new();
        let job = NewFetchJob::new(1, "alice", 7, "https://a.test/1", None, None);
        assert_eq!(store.insert_fetch_jobs(&[job.clone()]).await.unwrap(), 1);
        assert_eq!(store.insert_fetch_jobs(&[job]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn enqueue_coalesces_pending_messages() {
        let store = MemoryStore::new();
        let message = NewStageMessage {
            kind: "dispatch_fetch".into(),
            payload: serde_json::json!({}),
            dedupe_key: "dispatch_fetch:1".into(),
            available_at: Utc::now(),
        };
        assert!(matches!(
            store.enqueue_message(&message).await.unwrap(),
            EnqueueResult::Created(_)
        ));
        assert_eq!(
            store.enqueue_message(&message).await.unwrap(),
            EnqueueResult::Duplicate
        );

        let claimed = store.claim_messages(10, Utc::now()).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].attempts, 1);

        // Once claimed, a new trigger for the same stage is accepted again
        assert!(matches!(
            store.enqueue_message(&message).await.unwrap(),
            EnqueueResult::Created(_)
        ));
    }
}
