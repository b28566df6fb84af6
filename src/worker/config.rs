//! Worker configuration

use std::time::Duration;

/// Worker configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Poll interval when no messages are available
    pub poll_interval: Duration,

    /// Stage messages claimed per poll
    pub batch_size: i64,

    /// Claimed messages not acknowledged within this lease are redelivered
    pub message_lease: Duration,

    /// Deliveries before a message is marked dead
    pub max_attempts: i32,

    /// Timeout for handling one stage message
    pub stage_timeout: Duration,

    /// First retry delay for a failed message, doubled per attempt
    pub retry_base_delay: Duration,

    /// Cap on the retry delay
    pub retry_max_delay: Duration,

    /// How often the completion monitor runs inside the loop
    pub monitor_interval: Duration,

    /// How often the auto-digest scheduler runs inside the loop
    pub scheduler_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            batch_size: 10,
            message_lease: Duration::from_secs(120),
            max_attempts: 5,
            stage_timeout: Duration::from_secs(90),
            retry_base_delay: Duration::from_secs(5),
            retry_max_delay: Duration::from_secs(300),
            monitor_interval: Duration::from_secs(60),
            scheduler_interval: Duration::from_secs(60),
        }
    }
}

impl WorkerConfig {
    /// Create a new config builder
    pub fn builder() -> WorkerConfigBuilder {
        WorkerConfigBuilder::default()
    }

    /// Backoff before redelivering a message that failed `attempts` times
    pub fn retry_delay(&self, attempts: i32) -> Duration {
        let exponent = attempts.saturating_sub(1).clamp(0, 16) as u32;
        std::cmp::min(
            self.retry_base_delay.saturating_mul(2u32.saturating_pow(exponent)),
            self.retry_max_delay,
        )
    }
}

/// Builder for WorkerConfig
#[derive(Default)]
pub struct WorkerConfigBuilder {
    config: WorkerConfig,
}

impl WorkerConfigBuilder {
    /// Set poll interval
    pub fn poll_interval(mut self, duration: Duration) -> Self {
        self.config.poll_interval = duration;
        self
    }

    /// Set poll interval in seconds
    pub fn poll_interval_secs(mut self, secs: u64) -> Self {
        self.config.poll_interval = Duration::from_secs(secs);
        self
    }

    pub fn batch_size(mut self, size: i64) -> Self {
        self.config.batch_size = size;
        self
    }

    pub fn max_attempts(mut self, attempts: i32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    /// Set per-message timeout
    pub fn stage_timeout(mut self, duration: Duration) -> Self {
        self.config.stage_timeout = duration;
        self
    }

    pub fn retry_base_delay(mut self, duration: Duration) -> Self {
        self.config.retry_base_delay = duration;
        self
    }

    pub fn monitor_interval(mut self, duration: Duration) -> Self {
        self.config.monitor_interval = duration;
        self
    }

    pub fn scheduler_interval(mut self, duration: Duration) -> Self {
        self.config.scheduler_interval = duration;
        self
    }

    /// Build the config
    pub fn build(self) -> WorkerConfig {
        self.config
    }
}
