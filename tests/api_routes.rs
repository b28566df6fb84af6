//! HTTP envelope and status mapping

mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use common::*;
use digest_pipeline::api;
use digest_pipeline::MemoryStore;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn app() -> (Arc<MemoryStore>, axum::Router) {
    let store = Arc::new(MemoryStore::new());
    store.set_quota(paid_quota("alice"));
    store.add_source("alice", "Tech", "https://tech.test/feed.xml");
    let ctx = context(store.clone(), FakePages::new(), FakeFeeds::new(), FakeCompletions::new());
    (store, api::router(ctx))
}

async fn send(app: &axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(match body {
            Some(value) => Body::from(value.to_string()),
            None => Body::empty(),
        })
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn health_reports_ok() {
    let (_, app) = app();
    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
}

#[tokio::test]
async fn create_task_then_conflict() {
    let (store, app) = app();

    let (status, body) = send(&app, "POST", "/tasks", Some(json!({"owner_id": "alice"}))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "pending");
    let task_id = body["data"]["id"].as_i64().unwrap();
    assert_eq!(store.messages().len(), 1);

    let (status, body) = send(
        &app,
        "POST",
        "/tasks",
        Some(json!({"owner_id": "alice", "time_range": "today"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);
    assert_eq!(body["kind"], "conflict");
    assert_eq!(body["existing_task_id"], task_id);

    let (status, body) = send(&app, "GET", &format!("/tasks/{}", task_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["owner_id"], "alice");
}

#[tokio::test]
async fn blank_owner_is_a_bad_request() {
    let (_, app) = app();
    let (status, body) = send(&app, "POST", "/tasks", Some(json!({"owner_id": ""}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "validation");
}

#[tokio::test]
async fn unknown_task_is_not_found() {
    let (_, app) = app();
    let (status, body) = send(&app, "GET", "/tasks/4242", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "not_found");

    let (status, _) = send(&app, "POST", "/fetch/jobs", Some(json!({"job_id": 4242}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn stage_routes_return_reports() {
    let (_, app) = app();

    let (status, body) = send(&app, "POST", "/fetch/dispatch", Some(json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["claimed"], 0);

    let (status, body) = send(&app, "POST", "/summaries/dispatch", Some(json!({"task_id": 1}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["selected"], 0);

    let (status, body) = send(&app, "POST", "/monitor/run", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["checked"], 0);

    let (status, body) = send(&app, "POST", "/scheduler/run", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["dispatched"], 0);

    let (status, body) = send(&app, "POST", "/tasks/reap", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!([]));
}

#[tokio::test]
async fn digest_without_summaries_reports_empty() {
    let (_, app) = app();
    let (status, body) = send(
        &app,
        "POST",
        "/digests",
        Some(json!({"owner_id": "alice", "time_range": "today"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["outcome"], "empty");
}

#[tokio::test]
async fn malformed_bodies_use_the_error_envelope() {
    let (store, app) = app();

    let (status, body) = send(&app, "POST", "/tasks", Some(json!({"time_range": "week"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["kind"], "validation");
    assert!(body["message"].as_str().unwrap().contains("owner_id"));

    let (status, body) = send(&app, "POST", "/fetch/jobs", Some(json!({"job_id": "seven"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "validation");

    let request = Request::builder()
        .method("POST")
        .uri("/tasks/execute")
        .header("content-type", "application/json")
        .body(Body::from("{\"task_id\": "))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["success"], false);

    assert!(store.tasks().is_empty());
}
