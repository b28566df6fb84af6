//! Error types for digest-pipeline

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Owner {owner_id} already has an active task ({existing_task_id})")]
    Conflict {
        owner_id: String,
        existing_task_id: i64,
    },

    #[error("Task not found: {0}")]
    TaskNotFound(i64),

    #[error("Fetch job not found: {0}")]
    FetchJobNotFound(i64),

    #[error("Failed to fetch URL: {url}")]
    FetchError {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP error {status} for URL: {url}")]
    HttpStatusError { url: String, status: u16 },

    #[error("Failed to fetch URL after {attempts} attempts: {url} (last error: {last_error})")]
    RetryExhausted {
        url: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Content too short: {length} characters")]
    ContentTooShort { length: usize },

    #[error("Feed error for {url}: {message}")]
    FeedError { url: String, message: String },

    #[error("Completion service error: {0}")]
    CompletionError(String),

    #[error("Summary too short: {length} characters")]
    SummaryTooShort { length: usize },

    #[error("OpenAI API error: {0}")]
    OpenAiError(#[from] async_openai::error::OpenAIError),

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Unknown timezone: {0}")]
    InvalidTimezone(String),

    #[error("URL parse error: {0}")]
    UrlParseError(#[from] url::ParseError),
}

/// Coarse error taxonomy used for status mapping and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Conflict,
    NotFound,
    ExternalService,
    Persistence,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Conflict => "conflict",
            ErrorKind::NotFound => "not_found",
            ErrorKind::ExternalService => "external_service",
            ErrorKind::Persistence => "persistence",
            ErrorKind::Internal => "internal",
        }
    }
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Validation(_)
            | PipelineError::InvalidTimezone(_)
            | PipelineError::UrlParseError(_) => ErrorKind::Validation,
            PipelineError::Conflict { .. } => ErrorKind::Conflict,
            PipelineError::TaskNotFound(_) | PipelineError::FetchJobNotFound(_) => {
                ErrorKind::NotFound
            }
            PipelineError::FetchError { .. }
            | PipelineError::HttpStatusError { .. }
            | PipelineError::RetryExhausted { .. }
            | PipelineError::ContentTooShort { .. }
            | PipelineError::FeedError { .. }
            | PipelineError::CompletionError(_)
            | PipelineError::SummaryTooShort { .. }
            | PipelineError::OpenAiError(_)
            | PipelineError::Timeout { .. } => ErrorKind::ExternalService,
            PipelineError::DatabaseError(_)
            | PipelineError::MigrationError(_)
            | PipelineError::Persistence(_) => ErrorKind::Persistence,
            PipelineError::SerializationError(_) | PipelineError::ConfigError(_) => {
                ErrorKind::Internal
            }
        }
    }

    pub fn timeout(operation: impl Into<String>, duration: std::time::Duration) -> Self {
        PipelineError::Timeout {
            operation: operation.into(),
            seconds: duration.as_secs(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_message_names_existing_task() {
        let err = PipelineError::Conflict {
            owner_id: "owner-1".to_string(),
            existing_task_id: 42,
        };
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(err.to_string().contains("42"));
    }

    #[test]
    fn external_failures_are_classified_per_item() {
        assert_eq!(
            PipelineError::ContentTooShort { length: 3 }.kind(),
            ErrorKind::ExternalService
        );
        assert_eq!(
            PipelineError::timeout("page fetch", std::time::Duration::from_secs(8)).kind(),
            ErrorKind::ExternalService
        );
        assert_eq!(
            PipelineError::Persistence("write failed".into()).kind(),
            ErrorKind::Persistence
        );
    }
}
