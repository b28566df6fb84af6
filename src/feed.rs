//! Feed listing for article discovery

use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feed_rs::parser;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// One article advertised by a source's feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedEntry {
    pub url: String,
    pub title: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

/// Lists the entries currently advertised by a feed
#[async_trait]
pub trait FeedReader: Send + Sync {
    async fn list_entries(&self, feed_url: &str) -> Result<Vec<FeedEntry>>;
}

/// RSS/Atom reader over reqwest and feed-rs
pub struct FeedClient {
    client: Client,
}

impl FeedClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .user_agent("digest-pipeline/0.1")
            .build()
            .map_err(|e| PipelineError::FetchError {
                url: "client_init".to_string(),
                source: e,
            })?;

        Ok(Self { client })
    }
}

#[async_trait]
impl FeedReader for FeedClient {
    async fn list_entries(&self, feed_url: &str) -> Result<Vec<FeedEntry>> {
        let response = self
            .client
            .get(feed_url)
            .send()
            .await
            .map_err(|e| PipelineError::FetchError {
                url: feed_url.to_string(),
                source: e,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::HttpStatusError {
                url: feed_url.to_string(),
                status: status.as_u16(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| PipelineError::FetchError {
                url: feed_url.to_string(),
                source: e,
            })?;

        let entries = parse_feed(feed_url, &bytes)?;
        debug!("Feed {} lists {} entries", feed_url, entries.len());
        Ok(entries)
    }
}

/// Parse RSS or Atom bytes into entries.
///
/// Relative links are resolved against the feed URL. Entries without an
/// http(s) link are dropped.
pub fn parse_feed(feed_url: &str, bytes: &[u8]) -> Result<Vec<FeedEntry>> {
    let base = Url::parse(feed_url)?;
    let feed = parser::parse(bytes).map_err(|e| PipelineError::FeedError {
        url: feed_url.to_string(),
        message: e.to_string(),
    })?;

    Ok(feed
        .entries
        .into_iter()
        .filter_map(|entry| {
            let href = entry.links.first().map(|l| l.href.trim().to_string())?;
            let url = resolve_link(&base, &href)?;
            Some(FeedEntry {
                url,
                title: entry.title.map(|t| t.content.trim().to_string()),
                published_at: entry.published.or(entry.updated),
            })
        })
        .collect())
}

fn resolve_link(base: &Url, href: &str) -> Option<String> {
    if href.is_empty() {
        return None;
    }
    let url = base.join(href).ok()?;
    matches!(url.scheme(), "http" | "https").then(|| url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Example</title>
<item><title>First</title><link>https://example.com/1</link><pubDate>Sun, 10 May 2026 08:00:00 GMT</pubDate></item>
<item><title>No link</title></item>
<item><title>Undated</title><link>https://example.com/2</link></item>
</channel></rss>"#;

    const RELATIVE: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Example</title>
<item><title>Relative</title><link>/posts/3</link></item>
<item><title>Mail</title><link>mailto:editor@example.com</link></item>
</channel></rss>"#;

    #[test]
    fn rss_entries_are_listed_with_dates() {
        let entries = parse_feed("https://example.com/feed", RSS.as_bytes()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].url, "https://example.com/1");
        assert_eq!(entries[0].title.as_deref(), Some("First"));
        assert!(entries[0].published_at.is_some());
        assert!(entries[1].published_at.is_none());
    }

    #[test]
    fn relative_links_resolve_against_the_feed() {
        let entries = parse_feed("https://example.com/blog/feed.xml", RELATIVE.as_bytes()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].url, "https://example.com/posts/3");
    }

    #[test]
    fn unparseable_feed_url_is_rejected() {
        let err = parse_feed("not a url", RSS.as_bytes()).unwrap_err();
        assert!(matches!(err, PipelineError::UrlParseError(_)));
    }

    #[test]
    fn garbage_is_a_feed_error() {
        let err = parse_feed("https://example.com/feed", b"not a feed").unwrap_err();
        assert!(matches!(err, PipelineError::FeedError { .. }));
    }
}
