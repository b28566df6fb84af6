//! Digest Pipeline - a staged content pipeline that turns an owner's
//! subscribed feeds into periodic digests
//!
//! A task moves through these stages:
//! - executor: list each source's feed and fan out one fetch job per new article
//! - fetch: download pages and extract their main text
//! - summarize: condense each article with an LLM
//! - digest: group summaries by source into a markdown digest
//!
//! Stages hand off through a durable, deduplicated stage queue drained by
//! [`worker::StageRunner`]. A completion monitor finishes tasks whose triggers
//! were lost, and a scheduler starts daily digests at each owner's local time.

pub mod api;
pub mod config;
pub mod context;
pub mod crawler;
pub mod db;
pub mod error;
pub mod feed;
pub mod queue;
pub mod stages;
pub mod store;
pub mod summarizer;
pub mod window;
pub mod worker;

pub use config::{PipelineConfig, RetryPolicy};
pub use context::PipelineContext;
pub use crawler::{Crawler, CrawlerConfig, PageFetcher};
pub use error::{ErrorKind, PipelineError, Result};
pub use feed::{FeedClient, FeedEntry, FeedReader};
pub use queue::StageCommand;
pub use store::{MemoryStore, PgStore, PipelineStore};
pub use summarizer::{CompletionClient, CompletionRequest, OpenAiCompletionClient};
pub use window::TimeWindow;
