//! Page and feed fetching over HTTP

mod common;

use common::*;
use digest_pipeline::db::models::{FetchJobStatus, NewFetchJob};
use digest_pipeline::error::PipelineError;
use digest_pipeline::stages;
use digest_pipeline::{
    Crawler, CrawlerConfig, FeedClient, FeedReader, MemoryStore, PageFetcher, PipelineContext,
    PipelineStore,
};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ARTICLE_HTML: &str = r#"<html><body>
<nav>Home | About | Contact</nav>
<header>Site header</header>
<article>
  <h1>Rust 2026 roadmap</h1>
  <p>The project published its roadmap for the coming year, focusing on async ergonomics and compile times.</p>
  <div class="social-share">Share this on every network</div>
</article>
<footer>Copyright</footer>
</body></html>"#;

fn fast_crawler() -> Crawler {
    Crawler::with_config(CrawlerConfig {
        retry_base_delay: Duration::from_millis(10),
        retry_max_delay: Duration::from_millis(20),
        ..Default::default()
    })
    .unwrap()
}

#[tokio::test]
async fn article_text_is_extracted_from_main_content() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/posts/roadmap"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ARTICLE_HTML))
        .mount(&server)
        .await;

    let text = fast_crawler()
        .fetch_article_text(&format!("{}/posts/roadmap", server.uri()))
        .await
        .unwrap();

    assert!(text.starts_with("Rust 2026 roadmap"));
    assert!(text.contains("async ergonomics"));
    assert!(!text.contains("Share this"));
    assert!(!text.contains("Site header"));
    assert!(!text.contains("Copyright"));
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let err = fast_crawler()
        .fetch(&format!("{}/missing", server.uri()))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::HttpStatusError { status: 404, .. }));
}

#[tokio::test]
async fn server_errors_are_retried_then_exhausted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let err = fast_crawler()
        .fetch(&format!("{}/flaky", server.uri()))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::RetryExhausted { attempts: 2, .. }));
}

#[tokio::test]
async fn feed_client_lists_rss_entries() {
    let server = MockServer::start().await;
    let rss = format!(
        r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Tech</title>
<item><title>Roadmap</title><link>{0}/posts/roadmap</link><pubDate>Mon, 02 Mar 2026 08:00:00 GMT</pubDate></item>
<item><title>Release</title><link>{0}/posts/release</link></item>
</channel></rss>"#,
        server.uri()
    );
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rss))
        .mount(&server)
        .await;

    let client = FeedClient::new(Duration::from_secs(5)).unwrap();
    let entries = client
        .list_entries(&format!("{}/feed.xml", server.uri()))
        .await
        .unwrap();

    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].title.as_deref(), Some("Roadmap"));
    assert!(entries[0].url.ends_with("/posts/roadmap"));
    assert!(entries[1].published_at.is_none());
}

#[tokio::test]
async fn fetch_worker_stores_extracted_text_and_rejects_thin_pages() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/posts/roadmap"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ARTICLE_HTML))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/posts/thin"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html><body><p>Hi</p></body></html>"))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let ctx = PipelineContext::new(
        store.clone(),
        Arc::new(fast_crawler()),
        Arc::new(FakeFeeds::new()),
        Arc::new(FakeCompletions::new()),
        test_config(),
    );

    let jobs = vec![
        NewFetchJob::new(1, "alice", 1, &format!("{}/posts/roadmap", server.uri()), None, None),
        NewFetchJob::new(1, "alice", 1, &format!("{}/posts/thin", server.uri()), None, None),
    ];
    store.insert_fetch_jobs(&jobs).await.unwrap();

    let dispatched = stages::dispatch_fetch(&ctx, Some(1)).await.unwrap();
    assert_eq!(dispatched.claimed, 2);

    let mut statuses = Vec::new();
    for job_id in &dispatched.job_ids {
        let report = stages::run_fetch_worker(&ctx, *job_id).await.unwrap();
        statuses.push(report.status);
    }
    assert_eq!(
        statuses,
        vec![Some(FetchJobStatus::Completed), Some(FetchJobStatus::Failed)]
    );

    let stored = store.fetch_jobs_for_task(1);
    assert!(stored[0].content.as_deref().unwrap().contains("async ergonomics"));
    assert!(stored[1]
        .error_message
        .as_deref()
        .unwrap()
        .contains("Content too short"));

    // A redelivered trigger for a finished job does nothing
    let again = stages::run_fetch_worker(&ctx, dispatched.job_ids[0]).await.unwrap();
    assert_eq!(again.status, None);
}
