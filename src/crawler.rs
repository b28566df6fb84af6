//! Article page fetching and main-text extraction

use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use reqwest::Client;
use scraper::{ElementRef, Html, Node, Selector};
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Elements dropped before any text is read
const UNWANTED_SELECTORS: &[&str] = &[
    "script",
    "style",
    "nav",
    "header",
    "footer",
    ".advertisement",
    ".ads",
    ".sidebar",
    ".comments",
    "#comments",
    ".social-share",
    ".related-posts",
];

/// Main-content candidates, tried in order
const CONTENT_SELECTORS: &[&str] = &[
    "article",
    "[role=\"main\"]",
    "main",
    ".content",
    ".post-content",
    ".article-content",
    ".entry-content",
    ".story-body",
    ".article-body",
];

/// A content candidate must carry more than this many characters
const MIN_CANDIDATE_CHARS: usize = 100;

/// Retrieves an article and returns its readable text
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_article_text(&self, url: &str) -> Result<String>;
}

/// Configuration for the page crawler
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    /// Connection timeout (default: 5 seconds)
    pub connect_timeout: Duration,
    /// Request timeout (default: 8 seconds)
    pub request_timeout: Duration,
    /// Retries after the first attempt (default: 1)
    pub max_retries: u32,
    /// Initial delay between retries (default: 500ms, doubles each retry)
    pub retry_base_delay: Duration,
    /// Maximum delay between retries (default: 2 seconds)
    pub retry_max_delay: Duration,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(8),
            max_retries: 1,
            retry_base_delay: Duration::from_millis(500),
            retry_max_delay: Duration::from_secs(2),
        }
    }
}

/// HTTP page fetcher with retry and main-content extraction
pub struct Crawler {
    client: Client,
    config: CrawlerConfig,
}

impl Crawler {
    /// Create a new crawler instance with default configuration
    pub fn new() -> Result<Self> {
        Self::with_config(CrawlerConfig::default())
    }

    /// Create a new crawler instance with custom configuration
    pub fn with_config(config: CrawlerConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36")
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| PipelineError::FetchError {
                url: "client_init".to_string(),
                source: e,
            })?;

        Ok(Self { client, config })
    }

    /// Fetch a URL and return the HTML content with retry support
    pub async fn fetch(&self, url: &str) -> Result<String> {
        debug!("Fetching URL: {}", url);

        let mut last_error = String::new();

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = std::cmp::min(
                    self.config.retry_base_delay * 2u32.saturating_pow(attempt - 1),
                    self.config.retry_max_delay,
                );
                warn!(
                    "Retry attempt {}/{} for {} after {:?}",
                    attempt, self.config.max_retries, url, delay
                );
                sleep(delay).await;
            }

            match self.fetch_once(url).await {
                Ok(html) => {
                    if attempt > 0 {
                        info!("Fetched {} on attempt {}", url, attempt + 1);
                    }
                    return Ok(html);
                }
                Err(e) => {
                    last_error = e.to_string();
                    warn!(
                        "Fetch attempt {} failed for {}: {}",
                        attempt + 1,
                        url,
                        last_error
                    );

                    // Client errors other than 429 will not improve on retry
                    if let PipelineError::HttpStatusError { status, .. } = &e {
                        if (400..500).contains(status) && *status != 429 {
                            return Err(e);
                        }
                    }
                }
            }
        }

        Err(PipelineError::RetryExhausted {
            url: url.to_string(),
            attempts: self.config.max_retries + 1,
            last_error,
        })
    }

    /// Single fetch attempt without retry
    async fn fetch_once(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PipelineError::FetchError {
                url: url.to_string(),
                source: e,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::HttpStatusError {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let html = response
            .text()
            .await
            .map_err(|e| PipelineError::FetchError {
                url: url.to_string(),
                source: e,
            })?;

        debug!("Fetched {} bytes from {}", html.len(), url);
        Ok(html)
    }
}

#[async_trait]
impl PageFetcher for Crawler {
    async fn fetch_article_text(&self, url: &str) -> Result<String> {
        let html = self.fetch(url).await?;
        Ok(extract_main_text(&html))
    }
}

/// Pull the readable article text out of an HTML page.
///
/// Non-content elements are ignored, the first content candidate with more than
/// 100 characters wins, and the whole body is the fallback.
pub fn extract_main_text(html: &str) -> String {
    let document = Html::parse_document(html);

    let mut excluded = HashSet::new();
    for selector_str in UNWANTED_SELECTORS {
        if let Ok(selector) = Selector::parse(selector_str) {
            excluded.extend(document.select(&selector).map(|el| el.id()));
        }
    }
    let is_unwanted = |el: ElementRef| excluded.contains(&el.id());

    for selector_str in CONTENT_SELECTORS {
        let Ok(selector) = Selector::parse(selector_str) else {
            continue;
        };
        let Some(element) = document
            .select(&selector)
            .find(|el| !is_unwanted(*el) && !has_unwanted_ancestor(el, &is_unwanted))
        else {
            continue;
        };

        let text = visible_text(element, &is_unwanted);
        if text.chars().count() > MIN_CANDIDATE_CHARS {
            return text;
        }
    }

    match Selector::parse("body") {
        Ok(body) => document
            .select(&body)
            .next()
            .map(|el| visible_text(el, &is_unwanted))
            .unwrap_or_default(),
        Err(_) => String::new(),
    }
}

fn has_unwanted_ancestor(element: &ElementRef, is_unwanted: &impl Fn(ElementRef) -> bool) -> bool {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .any(|a| is_unwanted(a))
}

/// Text under `element` outside unwanted subtrees, whitespace collapsed
fn visible_text(element: ElementRef, is_unwanted: &impl Fn(ElementRef) -> bool) -> String {
    let mut words: Vec<&str> = Vec::new();

    for node in element.descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        if node
            .ancestors()
            .filter_map(ElementRef::wrap)
            .any(|a| is_unwanted(a))
        {
            continue;
        }
        words.extend(text.split_whitespace());
    }

    words.join(" ")
}

/// Cap text at `max_chars` characters, marking the cut with an ellipsis
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}...", &text[..byte_idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long_paragraph(word: &str) -> String {
        std::iter::repeat(word).take(40).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn article_wins_over_body() {
        let html = format!(
            "<html><body><p>Body noise</p><article><p>{}</p></article></body></html>",
            long_paragraph("story")
        );
        let text = extract_main_text(&html);
        assert!(text.starts_with("story story"));
        assert!(!text.contains("Body noise"));
    }

    #[test]
    fn unwanted_elements_are_stripped() {
        let html = format!(
            r#"<html><body><article>
                <script>var tracking = 1;</script>
                <div class="ads">Buy now</div>
                <p>{}</p>
                <div id="comments">First!</div>
            </article></body></html>"#,
            long_paragraph("content")
        );
        let text = extract_main_text(&html);
        assert!(!text.contains("tracking"));
        assert!(!text.contains("Buy now"));
        assert!(!text.contains("First!"));
        assert!(text.contains("content content"));
    }

    #[test]
    fn short_candidates_fall_through_to_body() {
        let html = "<html><body><nav>Menu</nav><article>Too short</article><p>Plain body text</p></body></html>";
        let text = extract_main_text(html);
        assert_eq!(text, "Too short Plain body text");
    }

    #[test]
    fn later_selector_used_when_earlier_is_missing() {
        let html = format!(
            r#"<html><body><div class="entry-content">{}</div><p>tail</p></body></html>"#,
            long_paragraph("entry")
        );
        let text = extract_main_text(&html);
        assert!(text.starts_with("entry"));
        assert!(!text.contains("tail"));
    }

    #[test]
    fn truncate_chars_handles_unicode() {
        assert_eq!(truncate_chars("你好世界", 2), "你好...");
        assert_eq!(truncate_chars("short", 10), "short");
    }

    #[test]
    fn crawler_config_default_values() {
        let config = CrawlerConfig::default();
        assert_eq!(config.request_timeout, Duration::from_secs(8));
        assert_eq!(config.max_retries, 1);
        assert!(Crawler::with_config(config).is_ok());
    }
}
