//! Shared handles passed to every stage

use crate::config::PipelineConfig;
use crate::crawler::PageFetcher;
use crate::feed::FeedReader;
use crate::store::PipelineStore;
use crate::summarizer::CompletionClient;
use std::sync::Arc;

/// Everything a stage needs: the store, the external collaborators and tunables.
///
/// Cheap to clone; stages hold no other state.
#[derive(Clone)]
pub struct PipelineContext {
    pub store: Arc<dyn PipelineStore>,
    pub pages: Arc<dyn PageFetcher>,
    pub feeds: Arc<dyn FeedReader>,
    pub completions: Arc<dyn CompletionClient>,
    pub config: PipelineConfig,
}

impl PipelineContext {
    pub fn new(
        store: Arc<dyn PipelineStore>,
        pages: Arc<dyn PageFetcher>,
        feeds: Arc<dyn FeedReader>,
        completions: Arc<dyn CompletionClient>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            pages,
            feeds,
            completions,
            config,
        }
    }
}
