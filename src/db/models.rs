//! Database models for the pipeline tables

use crate::window::TimeWindow;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use sqlx::FromRow;

// ============================================================================
// Tasks
// ============================================================================

/// Task - Matches tasks table
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub owner_id: String,
    pub task_type: String,
    pub status: String,
    pub config: serde_json::Value,
    pub progress: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn task_status(&self) -> Option<TaskStatus> {
        TaskStatus::parse(&self.status)
    }

    pub fn is_terminal(&self) -> bool {
        self.task_status().map(|s| s.is_terminal()).unwrap_or(false)
    }

    /// Keyword stored in `config.time_range`, defaulting to a week
    pub fn time_range(&self) -> String {
        self.config
            .get("time_range")
            .and_then(|v| v.as_str())
            .unwrap_or("week")
            .to_string()
    }

    pub fn time_window(&self) -> TimeWindow {
        TimeWindow::parse(&self.time_range())
    }

    pub fn progress(&self) -> TaskProgress {
        serde_json::from_value(self.progress.clone()).unwrap_or_default()
    }
}

/// Task lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Processing,
    Completed,
    CompletedWithErrors,
    Failed,
}

impl TaskStatus {
    /// Statuses that count toward the one-active-task-per-owner rule
    pub const ACTIVE: [TaskStatus; 3] = [
        TaskStatus::Pending,
        TaskStatus::Running,
        TaskStatus::Processing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::CompletedWithErrors => "completed_with_errors",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "running" => Some(TaskStatus::Running),
            "processing" => Some(TaskStatus::Processing),
            "completed" => Some(TaskStatus::Completed),
            "completed_with_errors" => Some(TaskStatus::CompletedWithErrors),
            "failed" => Some(TaskStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !Self::ACTIVE.contains(self)
    }
}

/// Task type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Digest,
    ScheduledDigest,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Digest => "digest",
            TaskType::ScheduledDigest => "scheduled_digest",
        }
    }
}

/// Progress counters kept in `tasks.progress`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskProgress {
    #[serde(default)]
    pub current: i64,
    #[serde(default)]
    pub total: i64,
    #[serde(default)]
    pub processed_sources: Vec<String>,
    #[serde(default)]
    pub skipped_sources: Vec<SkippedSource>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedSource {
    pub source: String,
    pub reason: String,
}

/// NewTask - For inserting new tasks
#[derive(Debug, Clone)]
pub struct NewTask {
    pub owner_id: String,
    pub task_type: TaskType,
    pub time_range: String,
    pub total: i64,
}

impl NewTask {
    pub fn config_json(&self) -> serde_json::Value {
        serde_json::json!({ "time_range": self.time_range })
    }

    pub fn progress_json(&self) -> serde_json::Value {
        serde_json::to_value(TaskProgress {
            total: self.total,
            ..Default::default()
        })
        .unwrap_or_else(|_| serde_json::json!({}))
    }
}

/// Partial update of a task row. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub progress: Option<TaskProgress>,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    /// Apply only while the task is still in this status
    pub expected_status: Option<TaskStatus>,
}

impl TaskUpdate {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: Some(TaskStatus::Failed),
            error_message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn with_progress(mut self, progress: TaskProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_result(mut self, result: serde_json::Value) -> Self {
        self.result = Some(result);
        self
    }

    /// Guard the write on the task's current status
    pub fn only_from(mut self, status: TaskStatus) -> Self {
        self.expected_status = Some(status);
        self
    }
}

// ============================================================================
// Sources and quotas
// ============================================================================

/// Source - Matches sources table
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Source {
    pub id: i64,
    pub owner_id: String,
    pub name: String,
    pub feed_url: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Billing limits for an owner. Read-only input to the pipeline.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct OwnerQuota {
    pub owner_id: String,
    pub max_sources: i64,
    pub can_schedule: bool,
}

// ============================================================================
// Fetch jobs
// ============================================================================

/// FetchJob - Matches fetch_jobs table
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct FetchJob {
    pub id: i64,
    pub task_id: i64,
    pub owner_id: String,
    pub source_id: i64,
    pub article_url: String,
    pub article_key: String,
    pub article_title: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub status: String,
    pub content: Option<String>,
    pub error_message: Option<String>,
    pub summary_attempts: i32,
    pub summary_error: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FetchJob {
    pub fn job_status(&self) -> Option<FetchJobStatus> {
        FetchJobStatus::parse(&self.status)
    }
}

/// Fetch job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchJobStatus {
    Pending,
    Fetching,
    Completed,
    Failed,
}

impl FetchJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchJobStatus::Pending => "pending",
            FetchJobStatus::Fetching => "fetching",
            FetchJobStatus::Completed => "completed",
            FetchJobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(FetchJobStatus::Pending),
            "fetching" => Some(FetchJobStatus::Fetching),
            "completed" => Some(FetchJobStatus::Completed),
            "failed" => Some(FetchJobStatus::Failed),
            _ => None,
        }
    }
}

/// NewFetchJob - For bulk fan-out
#[derive(Debug, Clone)]
pub struct NewFetchJob {
    pub task_id: i64,
    pub owner_id: String,
    pub source_id: i64,
    pub article_url: String,
    pub article_key: String,
    pub article_title: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

impl NewFetchJob {
    pub fn new(
        task_id: i64,
        owner_id: &str,
        source_id: i64,
        article_url: &str,
        article_title: Option<String>,
        published_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            task_id,
            owner_id: owner_id.to_string(),
            source_id,
            article_url: article_url.to_string(),
            article_key: article_key(article_url),
            article_title,
            published_at,
        }
    }
}

/// SHA-256 hex of the article URL
pub fn article_key(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.trim().as_bytes());
    hex::encode(hasher.finalize())
}

/// Terminal result written by a fetch worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Completed { content: String },
    Failed { error: String },
}

/// Per-task fetch job tallies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchJobCounts {
    pub total: i64,
    pub pending: i64,
    pub fetching: i64,
    pub completed: i64,
    pub failed: i64,
    /// Completed jobs that already have a summary
    pub summarized: i64,
    /// Completed, unsummarized jobs whose attempts are used up
    pub summary_exhausted: i64,
}

impl FetchJobCounts {
    /// Completed jobs still eligible for summarization
    pub fn unsummarized(&self) -> i64 {
        self.completed - self.summarized - self.summary_exhausted
    }

    /// Jobs that will see no further progress
    pub fn settled(&self) -> i64 {
        self.failed + self.summarized + self.summary_exhausted
    }

    pub fn is_settled(&self) -> bool {
        self.total > 0 && self.settled() == self.total
    }

    pub fn has_errors(&self) -> bool {
        self.failed > 0 || self.summary_exhausted > 0
    }
}

// ============================================================================
// Content items, summaries, digests
// ============================================================================

/// ContentItem - Matches content_items table
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: i64,
    pub fetch_job_id: i64,
    pub task_id: i64,
    pub owner_id: String,
    pub source_id: i64,
    pub title: String,
    pub url: String,
    pub content: String,
    pub published_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Summary - Matches summaries table
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Summary {
    pub id: i64,
    pub content_item_id: i64,
    pub summary_text: String,
    pub model: String,
    pub created_at: DateTime<Utc>,
}

/// A content item and its summary, written together
#[derive(Debug, Clone)]
pub struct NewSummarizedItem {
    pub fetch_job_id: i64,
    pub task_id: i64,
    pub owner_id: String,
    pub source_id: i64,
    pub title: String,
    pub url: String,
    pub content: String,
    pub published_at: DateTime<Utc>,
    pub summary_text: String,
    pub model: String,
}

/// Summary joined with its content item, as read by the digest generator
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SummaryEntry {
    pub summary_id: i64,
    pub content_item_id: i64,
    pub task_id: i64,
    pub source_id: i64,
    pub title: String,
    pub url: String,
    pub summary_text: String,
    pub published_at: DateTime<Utc>,
}

/// Digest - Matches digests table
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Digest {
    pub id: i64,
    pub owner_id: String,
    pub task_id: Option<i64>,
    pub title: String,
    pub content: String,
    pub time_range: String,
    pub generation_date: NaiveDate,
    pub item_count: i32,
    pub source_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// NewDigest - For inserting digests
#[derive(Debug, Clone)]
pub struct NewDigest {
    pub owner_id: String,
    pub task_id: Option<i64>,
    pub title: String,
    pub content: String,
    pub time_range: String,
    pub generation_date: NaiveDate,
    pub item_count: i32,
    pub source_count: i32,
}

/// DigestItem - Matches digest_items table
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DigestItem {
    pub digest_id: i64,
    pub summary_id: i64,
    pub position: i32,
}

// ============================================================================
// Schedules
// ============================================================================

/// UserScheduleConfig - Matches schedule_configs table
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct UserScheduleConfig {
    pub owner_id: String,
    pub enabled: bool,
    /// Local time `HH:MM`
    pub scheduled_time: String,
    pub timezone: Option<String>,
    pub last_run_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Stage messages
// ============================================================================

/// StageMessage - Matches stage_messages table
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct StageMessage {
    pub id: i64,
    pub kind: String,
    pub payload: serde_json::Value,
    pub dedupe_key: String,
    pub status: String,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub available_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Stage message status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Claimed,
    Done,
    Dead,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Claimed => "claimed",
            MessageStatus::Done => "done",
            MessageStatus::Dead => "dead",
        }
    }
}

/// NewStageMessage - For enqueueing
#[derive(Debug, Clone)]
pub struct NewStageMessage {
    pub kind: String,
    pub payload: serde_json::Value,
    pub dedupe_key: String,
    pub available_at: DateTime<Utc>,
}

/// Whether an enqueue created a row or coalesced into a pending one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueResult {
    Created(i64),
    Duplicate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn article_key_is_stable_sha256_hex() {
        let a = article_key("https://example.com/post");
        let b = article_key(" https://example.com/post ");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, article_key("https://example.com/other"));
    }

    #[test]
    fn terminal_statuses() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Processing.is_terminal());
        assert!(TaskStatus::CompletedWithErrors.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert_eq!(
            TaskStatus::parse("completed_with_errors"),
            Some(TaskStatus::CompletedWithErrors)
        );
    }

    #[test]
    fn settled_counts_include_exhausted_summaries() {
        let counts = FetchJobCounts {
            total: 10,
            completed: 10,
            summarized: 8,
            summary_exhausted: 2,
            ..Default::default()
        };
        assert_eq!(counts.unsummarized(), 0);
        assert!(counts.is_settled());
        assert!(counts.has_errors());

        let empty = FetchJobCounts::default();
        assert!(!empty.is_settled());
    }

    #[test]
    fn progress_tolerates_partial_json() {
        let task = Task {
            id: 1,
            owner_id: "o".into(),
            task_type: "digest".into(),
            status: "pending".into(),
            config: serde_json::json!({"time_range": "today"}),
            progress: serde_json::json!({"total": 4}),
            result: None,
            error_message: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        assert_eq!(task.progress().total, 4);
        assert!(task.progress().processed_sources.is_empty());
        assert_eq!(task.time_window(), TimeWindow::Today);
    }
}
