//! Shared fakes and fixtures for the integration tests.
//!
//! The fakes answer from in-memory tables so stages can run end to end
//! against a `MemoryStore` without network or LLM calls.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use digest_pipeline::db::models::OwnerQuota;
use digest_pipeline::error::{PipelineError, Result};
use digest_pipeline::worker::{StageRunner, WorkerConfig};
use digest_pipeline::{
    CompletionClient, CompletionRequest, FeedEntry, FeedReader, MemoryStore, PageFetcher,
    PipelineConfig, PipelineContext,
};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Marker placed in an article title to make its summary fail
pub const FAILING_TITLE_MARKER: &str = "[unsummarizable]";

/// Page fetcher answering from a url -> text table
#[derive(Default)]
pub struct FakePages {
    pages: Arc<RwLock<HashMap<String, String>>>,
    calls: Arc<RwLock<Vec<String>>>,
}

impl FakePages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, url: impl Into<String>, text: impl Into<String>) -> Self {
        self.pages.write().unwrap().insert(url.into(), text.into());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.read().unwrap().clone()
    }
}

#[async_trait]
impl PageFetcher for FakePages {
    async fn fetch_article_text(&self, url: &str) -> Result<String> {
        self.calls.write().unwrap().push(url.to_string());
        self.pages
            .read()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| PipelineError::HttpStatusError {
                url: url.to_string(),
                status: 404,
            })
    }
}

/// Feed reader answering from a feed url -> entries table
#[derive(Default)]
pub struct FakeFeeds {
    feeds: Arc<RwLock<HashMap<String, Vec<FeedEntry>>>>,
    delay: Arc<RwLock<Option<std::time::Duration>>>,
}

impl FakeFeeds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_feed(self, feed_url: impl Into<String>, entries: Vec<FeedEntry>) -> Self {
        self.feeds.write().unwrap().insert(feed_url.into(), entries);
        self
    }

    /// Answer every listing only after `delay`
    pub fn with_delay(self, delay: std::time::Duration) -> Self {
        *self.delay.write().unwrap() = Some(delay);
        self
    }
}

#[async_trait]
impl FeedReader for FakeFeeds {
    async fn list_entries(&self, feed_url: &str) -> Result<Vec<FeedEntry>> {
        let delay = *self.delay.read().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.feeds
            .read()
            .unwrap()
            .get(feed_url)
            .cloned()
            .ok_or_else(|| PipelineError::FeedError {
                url: feed_url.to_string(),
                message: "unknown feed".to_string(),
            })
    }
}

/// Completion client producing deterministic summaries and overviews
#[derive(Default)]
pub struct FakeCompletions {
    overview: Arc<RwLock<Option<String>>>,
    prompts: Arc<RwLock<Vec<String>>>,
}

impl FakeCompletions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_overview(self, text: impl Into<String>) -> Self {
        *self.overview.write().unwrap() = Some(text.into());
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.read().unwrap().clone()
    }
}

#[async_trait]
impl CompletionClient for FakeCompletions {
    fn model(&self) -> &str {
        "fake-model"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        self.prompts.write().unwrap().push(request.prompt.clone());

        if request.prompt.contains(FAILING_TITLE_MARKER) {
            return Err(PipelineError::CompletionError(
                "model refused the article".to_string(),
            ));
        }

        if request.prompt.starts_with("Based on the following") {
            return Ok(self
                .overview
                .read()
                .unwrap()
                .clone()
                .unwrap_or_else(|| "too short".to_string()));
        }

        let title = request
            .prompt
            .lines()
            .find_map(|line| line.strip_prefix("Title: "))
            .unwrap_or("article");
        Ok(format!(
            "{} is summarized here with enough detail to clear the minimum summary length.",
            title
        ))
    }
}

/// Article body long enough to pass extraction
pub fn article_text(title: &str) -> String {
    format!(
        "{} opens with a long paragraph of readable text so the fetch worker keeps it.",
        title
    )
}

pub fn entry(url: &str, title: &str, published_at: DateTime<Utc>) -> FeedEntry {
    FeedEntry {
        url: url.to_string(),
        title: Some(title.to_string()),
        published_at: Some(published_at),
    }
}

pub fn hours_ago(hours: i64) -> DateTime<Utc> {
    Utc::now() - Duration::hours(hours)
}

pub fn paid_quota(owner_id: &str) -> OwnerQuota {
    OwnerQuota {
        owner_id: owner_id.to_string(),
        max_sources: 10,
        can_schedule: true,
    }
}

/// Config with failed-summary re-dispatch available immediately
pub fn test_config() -> PipelineConfig {
    PipelineConfig::builder()
        .summary_retry_delay(std::time::Duration::ZERO)
        .build()
}

pub fn context(
    store: Arc<MemoryStore>,
    pages: FakePages,
    feeds: FakeFeeds,
    completions: FakeCompletions,
) -> PipelineContext {
    PipelineContext::new(
        store,
        Arc::new(pages),
        Arc::new(feeds),
        Arc::new(completions),
        test_config(),
    )
}

pub fn runner(ctx: &PipelineContext) -> StageRunner {
    StageRunner::new(
        ctx.clone(),
        WorkerConfig::builder()
            .retry_base_delay(std::time::Duration::ZERO)
            .build(),
    )
}
