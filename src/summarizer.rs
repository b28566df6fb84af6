//! Language-model completions for article summaries and task overviews

use crate::error::{PipelineError, Result};
use async_openai::{
    config::OpenAIConfig,
    types::{ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs},
    Client,
};
use async_trait::async_trait;
use tracing::debug;

/// Default completion model
pub const DEFAULT_COMPLETION_MODEL: &str = "gpt-4o-mini";

/// Token budget and sampling temperature for a per-article summary
pub const SUMMARY_MAX_TOKENS: u32 = 500;
pub const SUMMARY_TEMPERATURE: f32 = 0.3;

/// Token budget and sampling temperature for a task-level overview
pub const OVERVIEW_MAX_TOKENS: u32 = 2000;
pub const OVERVIEW_TEMPERATURE: f32 = 0.4;

/// A single-prompt completion request
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Text completion service
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Model name recorded alongside generated summaries
    fn model(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

/// OpenAI-compatible chat completion client
pub struct OpenAiCompletionClient {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiCompletionClient {
    /// Create a new completion client
    ///
    /// # Arguments
    /// * `api_key` - API key for the completion endpoint
    /// * `api_base` - Base URL of an OpenAI-compatible API, or `None` for OpenAI
    /// * `model` - Model name (e.g., "gpt-4o-mini")
    pub fn new(api_key: &str, api_base: Option<&str>, model: &str) -> Self {
        let mut config = OpenAIConfig::new().with_api_key(api_key);
        if let Some(base) = api_base {
            config = config.with_api_base(base);
        }
        Self {
            client: Client::with_config(config),
            model: model.to_string(),
        }
    }

    /// Create client from `OPENAI_API_KEY`, `COMPLETION_API_BASE` and `COMPLETION_MODEL`
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| PipelineError::ConfigError("OPENAI_API_KEY not set".to_string()))?;
        let api_base = std::env::var("COMPLETION_API_BASE").ok();
        let model = std::env::var("COMPLETION_MODEL")
            .unwrap_or_else(|_| DEFAULT_COMPLETION_MODEL.to_string());

        Ok(Self::new(&api_key, api_base.as_deref(), &model))
    }
}

#[async_trait]
impl CompletionClient for OpenAiCompletionClient {
    fn model(&self) -> &str {
        &self.model
    }

    #[allow(deprecated)]
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        debug!("Requesting completion for {} prompt chars", request.prompt.len());

        let message = ChatCompletionRequestUserMessageArgs::default()
            .content(request.prompt.as_str())
            .build()?;

        let chat_request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages([message.into()])
            .max_tokens(request.max_tokens)
            .temperature(request.temperature)
            .build()?;

        let response = self.client.chat().create(chat_request).await?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| PipelineError::CompletionError("Empty completion response".to_string()))
    }
}

/// Prompt asking for a short summary of one article
pub fn summary_prompt(title: &str, content: &str, max_content_chars: usize) -> CompletionRequest {
    let excerpt: String = content.chars().take(max_content_chars).collect();
    let prompt = format!(
        "Write a concise summary (roughly 100-200 words) of the following article.\n\n\
         Title: {title}\n\
         Content: {excerpt}...\n\n\
         Requirements:\n\
         1. Lead with the key information\n\
         2. Stay objective and neutral\n\
         3. Do not add facts that are not in the article"
    );

    CompletionRequest {
        prompt,
        max_tokens: SUMMARY_MAX_TOKENS,
        temperature: SUMMARY_TEMPERATURE,
    }
}

/// Prompt asking for an overview across a task's summarized articles
pub fn overview_prompt(items: &[(String, String)]) -> CompletionRequest {
    let listing = items
        .iter()
        .enumerate()
        .map(|(idx, (title, summary))| format!("{}. {}\n{}", idx + 1, title, summary))
        .collect::<Vec<_>>()
        .join("\n\n");

    let prompt = format!(
        "Based on the following {} article summaries, write an overview of the period.\n\n\
         {listing}\n\n\
         Requirements:\n\
         1. Group related stories into themes\n\
         2. Call out the most important developments first\n\
         3. Keep it between 300 and 600 words",
        items.len()
    );

    CompletionRequest {
        prompt,
        max_tokens: OVERVIEW_MAX_TOKENS,
        temperature: OVERVIEW_TEMPERATURE,
    }
}
