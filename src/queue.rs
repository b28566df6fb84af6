//! Durable inter-stage triggers.
//!
//! Stages never call each other directly; they enqueue a [`StageCommand`] that
//! the worker loop delivers at least once. Pending commands with the same
//! dedupe key are coalesced.

use crate::db::models::{EnqueueResult, NewStageMessage, StageMessage};
use crate::error::Result;
use crate::store::PipelineStore;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageCommand {
    ExecuteTask { task_id: i64 },
    DispatchFetch { task_id: Option<i64> },
    FetchArticle { job_id: i64, task_id: i64 },
    DispatchSummaries { task_id: Option<i64> },
    GenerateDigest { task_id: i64 },
}

impl StageCommand {
    pub fn kind(&self) -> &'static str {
        match self {
            StageCommand::ExecuteTask { .. } => "execute_task",
            StageCommand::DispatchFetch { .. } => "dispatch_fetch",
            StageCommand::FetchArticle { .. } => "fetch_article",
            StageCommand::DispatchSummaries { .. } => "dispatch_summaries",
            StageCommand::GenerateDigest { .. } => "generate_digest",
        }
    }

    /// Key shared by commands that are interchangeable while pending
    pub fn dedupe_key(&self) -> String {
        let scope = |task_id: &Option<i64>| match task_id {
            Some(id) => id.to_string(),
            None => "*".to_string(),
        };

        match self {
            StageCommand::ExecuteTask { task_id } | StageCommand::GenerateDigest { task_id } => {
                format!("{}:{}", self.kind(), task_id)
            }
            StageCommand::DispatchFetch { task_id } | StageCommand::DispatchSummaries { task_id } => {
                format!("{}:{}", self.kind(), scope(task_id))
            }
            StageCommand::FetchArticle { job_id, .. } => format!("{}:{}", self.kind(), job_id),
        }
    }

    pub fn decode(message: &StageMessage) -> Result<Self> {
        Ok(serde_json::from_value(message.payload.clone())?)
    }
}

/// Enqueue a command for immediate delivery
pub async fn enqueue(store: &dyn PipelineStore, command: StageCommand) -> Result<EnqueueResult> {
    enqueue_after(store, command, Duration::ZERO).await
}

/// Enqueue a command that becomes deliverable after `delay`
pub async fn enqueue_after(
    store: &dyn PipelineStore,
    command: StageCommand,
    delay: Duration,
) -> Result<EnqueueResult> {
    let available_at = Utc::now()
        + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());

    let message = NewStageMessage {
        kind: command.kind().to_string(),
        payload: serde_json::to_value(&command)?,
        dedupe_key: command.dedupe_key(),
        available_at,
    };

    let result = store.enqueue_message(&message).await?;
    if result == EnqueueResult::Duplicate {
        debug!("Coalesced {} into a pending trigger", message.dedupe_key);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedupe_keys_scope_by_task() {
        assert_eq!(
            StageCommand::DispatchFetch { task_id: Some(3) }.dedupe_key(),
            "dispatch_fetch:3"
        );
        assert_eq!(
            StageCommand::DispatchSummaries { task_id: None }.dedupe_key(),
            "dispatch_summaries:*"
        );
        assert_eq!(
            StageCommand::FetchArticle { job_id: 9, task_id: 3 }.dedupe_key(),
            "fetch_article:9"
        );
    }

    #[test]
    fn payload_carries_kind_tag() {
        let value = serde_json::to_value(StageCommand::GenerateDigest { task_id: 5 }).unwrap();
        assert_eq!(value["kind"], "generate_digest");
        assert_eq!(value["task_id"], 5);
        let back: StageCommand = serde_json::from_value(value).unwrap();
        assert_eq!(back, StageCommand::GenerateDigest { task_id: 5 });
    }
}
