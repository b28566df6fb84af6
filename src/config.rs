//! Stage tunables shared by every pipeline stage

use crate::error::{PipelineError, Result};
use std::time::Duration;

/// Bounded exponential backoff used for task status writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        std::cmp::min(
            self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1)),
            self.max_delay,
        )
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
        }
    }
}

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Fetch jobs claimed per dispatcher invocation
    pub fetch_batch_size: i64,

    /// Timeout for a single article page fetch
    pub fetch_timeout: Duration,

    /// Jobs left in `fetching` longer than this are released back to `pending`
    pub fetch_lease: Duration,

    /// Minimum extracted text length for a fetch to succeed
    pub min_content_length: usize,

    /// Extracted text is truncated to this many characters
    pub max_content_length: usize,

    /// Maximum articles fanned out per source per task
    pub max_articles_per_source: usize,

    /// Timeout for listing a source's feed entries
    pub feed_timeout: Duration,

    /// Jobs summarized per dispatcher invocation
    pub summary_batch_size: i64,

    /// Response-time budget for one completion call
    pub summary_timeout: Duration,

    /// Article content is truncated to this many characters in the prompt
    pub summary_prompt_chars: usize,

    /// Completions shorter than this are rejected
    pub min_summary_length: usize,

    /// Summarization attempts before a job counts as permanently failed
    pub max_summary_attempts: i32,

    /// Delay before re-dispatching summarization after failures
    pub summary_retry_delay: Duration,

    /// Task-level overviews shorter than this are discarded
    pub min_overview_length: usize,

    /// Wall-clock budget for one digest generation
    pub digest_timeout: Duration,

    /// Scheduler eligibility tolerance in minutes
    pub schedule_tolerance_minutes: i64,

    /// Max sources per owner when no quota row exists
    pub default_max_sources: i64,

    /// Whether owners without a quota row may be scheduled
    pub default_can_schedule: bool,

    /// Backoff for task status writes
    pub status_retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fetch_batch_size: 30,
            fetch_timeout: Duration::from_secs(8),
            fetch_lease: Duration::from_secs(300),
            min_content_length: 50,
            max_content_length: 50_000,
            max_articles_per_source: 50,
            feed_timeout: Duration::from_secs(15),
            summary_batch_size: 5,
            summary_timeout: Duration::from_secs(15),
            summary_prompt_chars: 3_000,
            min_summary_length: 50,
            max_summary_attempts: 3,
            summary_retry_delay: Duration::from_secs(60),
            min_overview_length: 200,
            digest_timeout: Duration::from_secs(30),
            schedule_tolerance_minutes: 5,
            default_max_sources: 3,
            default_can_schedule: false,
            status_retry: RetryPolicy::default(),
        }
    }
}

impl PipelineConfig {
    /// Create a new config builder
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Defaults overlaid with `PIPELINE_*` environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = env_parse::<i64>("PIPELINE_FETCH_BATCH_SIZE")? {
            config.fetch_batch_size = v;
        }
        if let Some(v) = env_parse::<u64>("PIPELINE_FETCH_TIMEOUT_SECS")? {
            config.fetch_timeout = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<i64>("PIPELINE_SUMMARY_BATCH_SIZE")? {
            config.summary_batch_size = v;
        }
        if let Some(v) = env_parse::<u64>("PIPELINE_SUMMARY_TIMEOUT_SECS")? {
            config.summary_timeout = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<i32>("PIPELINE_MAX_SUMMARY_ATTEMPTS")? {
            config.max_summary_attempts = v;
        }
        if let Some(v) = env_parse::<u64>("PIPELINE_DIGEST_TIMEOUT_SECS")? {
            config.digest_timeout = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<i64>("PIPELINE_DEFAULT_MAX_SOURCES")? {
            config.default_max_sources = v;
        }

        Ok(config)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| PipelineError::ConfigError(format!("{} has an invalid value: {}", key, raw))),
        Err(_) => Ok(None),
    }
}

/// Builder for PipelineConfig
#[derive(Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn fetch_batch_size(mut self, size: i64) -> Self {
        self.config.fetch_batch_size = size;
        self
    }

    pub fn fetch_timeout(mut self, duration: Duration) -> Self {
        self.config.fetch_timeout = duration;
        self
    }

    pub fn fetch_lease(mut self, duration: Duration) -> Self {
        self.config.fetch_lease = duration;
        self
    }

    pub fn summary_batch_size(mut self, size: i64) -> Self {
        self.config.summary_batch_size = size;
        self
    }

    pub fn summary_timeout(mut self, duration: Duration) -> Self {
        self.config.summary_timeout = duration;
        self
    }

    pub fn max_summary_attempts(mut self, attempts: i32) -> Self {
        self.config.max_summary_attempts = attempts;
        self
    }

    pub fn summary_retry_delay(mut self, duration: Duration) -> Self {
        self.config.summary_retry_delay = duration;
        self
    }

    pub fn digest_timeout(mut self, duration: Duration) -> Self {
        self.config.digest_timeout = duration;
        self
    }

    pub fn default_max_sources(mut self, max: i64) -> Self {
        self.config.default_max_sources = max;
        self
    }

    pub fn default_can_schedule(mut self, allowed: bool) -> Self {
        self.config.default_can_schedule = allowed;
        self
    }

    pub fn status_retry(mut self, policy: RetryPolicy) -> Self {
        self.config.status_retry = policy;
        self
    }

    /// Build the config
    pub fn build(self) -> PipelineConfig {
        self.config
    }
}
