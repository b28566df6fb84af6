//! Stage runner - main worker loop

use crate::context::PipelineContext;
use crate::db::models::{MessageStatus, StageMessage};
use crate::error::Result;
use crate::queue::StageCommand;
use crate::stages::{self, monitor, scheduler};
use crate::worker::WorkerConfig;
use chrono::Utc;
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, error, info, warn};

/// Polls the stage queue and runs each claimed message's stage
pub struct StageRunner {
    ctx: PipelineContext,
    config: WorkerConfig,
    shutdown: Arc<AtomicBool>,
}

impl StageRunner {
    /// Create a new stage runner
    pub fn new(ctx: PipelineContext, config: WorkerConfig) -> Self {
        Self {
            ctx,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get a handle to signal shutdown
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Main worker loop
    ///
    /// Drains stage messages and runs the monitor and scheduler on their
    /// intervals until shutdown is signaled
    pub async fn run(&self) -> Result<()> {
        info!("Starting digest-pipeline worker...");
        info!("Poll interval: {:?}", self.config.poll_interval);
        info!("Stage timeout: {:?}", self.config.stage_timeout);
        info!(
            "Monitor every {:?}, scheduler every {:?}",
            self.config.monitor_interval, self.config.scheduler_interval
        );

        let mut last_monitor: Option<Instant> = None;
        let mut last_scheduler: Option<Instant> = None;

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                info!("Shutdown signal received, stopping worker...");
                break;
            }

            if is_due(last_monitor, self.config.monitor_interval) {
                last_monitor = Some(Instant::now());
                if let Err(e) = monitor::run_monitor(&self.ctx).await {
                    error!("Monitor pass failed: {}", e);
                }
            }

            if is_due(last_scheduler, self.config.scheduler_interval) {
                last_scheduler = Some(Instant::now());
                if let Err(e) = scheduler::tick(&self.ctx).await {
                    error!("Scheduler pass failed: {}", e);
                }
            }

            match self.run_once().await {
                Ok(0) => {
                    debug!(
                        "No stage messages, sleeping for {:?}",
                        self.config.poll_interval
                    );
                    sleep(self.config.poll_interval).await;
                }
                Ok(handled) => {
                    debug!("Handled {} stage message(s)", handled);
                }
                Err(e) => {
                    error!("Worker error: {}", e);
                    sleep(Duration::from_secs(10)).await;
                }
            }
        }

        info!("Worker stopped");
        Ok(())
    }

    /// Claim one batch of messages and handle them concurrently.
    ///
    /// Returns the number of messages claimed.
    pub async fn run_once(&self) -> Result<usize> {
        let lease = chrono::Duration::from_std(self.config.message_lease)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let messages = self
            .ctx
            .store
            .claim_messages(self.config.batch_size, Utc::now() - lease)
            .await?;

        let handled = messages.len();
        let results = join_all(messages.iter().map(|message| self.handle(message))).await;
        for (message, result) in messages.iter().zip(results) {
            if let Err(e) = result {
                error!("Could not settle message {}: {}", message.id, e);
            }
        }

        Ok(handled)
    }

    /// Keep claiming until the queue has nothing available, up to `max_rounds`
    pub async fn drain(&self, max_rounds: usize) -> Result<usize> {
        let mut total = 0;
        for _ in 0..max_rounds {
            let handled = self.run_once().await?;
            if handled == 0 {
                break;
            }
            total += handled;
        }
        Ok(total)
    }

    async fn handle(&self, message: &StageMessage) -> Result<()> {
        let command = match StageCommand::decode(message) {
            Ok(command) => command,
            Err(e) => {
                error!("Dropping undecodable message {} ({}): {}", message.id, message.kind, e);
                self.ctx
                    .store
                    .retry_message(message.id, &e.to_string(), None)
                    .await?;
                return Ok(());
            }
        };

        let outcome = tokio::time::timeout(
            self.config.stage_timeout,
            stages::run_command(&self.ctx, &command),
        )
        .await;

        let error = match outcome {
            Ok(Ok(())) => {
                self.ctx.store.ack_message(message.id).await?;
                return Ok(());
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("stage timed out after {:?}", self.config.stage_timeout),
        };

        let retry_at = if message.attempts >= self.config.max_attempts {
            None
        } else {
            let delay = chrono::Duration::from_std(self.config.retry_delay(message.attempts))
                .unwrap_or_else(|_| chrono::Duration::zero());
            Some(Utc::now() + delay)
        };

        match self
            .ctx
            .store
            .retry_message(message.id, &error, retry_at)
            .await?
        {
            MessageStatus::Dead => error!(
                "Message {} ({}) is dead after {} attempt(s): {}",
                message.id, message.dedupe_key, message.attempts, error
            ),
            _ => warn!(
                "Message {} ({}) failed, attempt {}/{}: {}",
                message.id, message.dedupe_key, message.attempts, self.config.max_attempts, error
            ),
        }

        Ok(())
    }
}

fn is_due(last: Option<Instant>, interval: Duration) -> bool {
    last.map_or(true, |at| at.elapsed() >= interval)
}

/// Setup signal handlers for graceful shutdown
pub fn setup_signal_handler(shutdown: Arc<AtomicBool>) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, initiating shutdown...");
                shutdown.store(true, Ordering::Relaxed);
            }
            Err(e) => {
                error!("Failed to listen for Ctrl+C: {}", e);
            }
        }
    });
}
