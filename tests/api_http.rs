// tests/api_http.rs
//
// HTTP-level tests for the public API Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot, with the
// offline lexicon provider so no network is involved.
//
// Covered:
// - GET /health, GET /
// - POST /enrich/{id}  (complete header, 404, 400, partial result)
// - POST /enrich_async + GET /job/{id} + POST /job/{id}/cancel
// - GET /metrics, GET /articles, GET /news/fetch without a key

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value as Json};
use tower::ServiceExt as _; // for `oneshot`

use news_enrichment::config::{InferenceMode, PipelineConfig};
use news_enrichment::inference::{InferenceRequest, Provider};
use news_enrichment::{bootstrap, router, InferenceError, MemoryArticleStore};

const BODY_LIMIT: usize = 1024 * 1024; // 1MB, safe for tests

fn offline_config() -> PipelineConfig {
    let mut cfg = PipelineConfig::default();
    cfg.inference.mode = InferenceMode::Lexicon;
    cfg.newsapi.api_key = String::new();
    cfg.dispatcher.workers = 2;
    cfg
}

/// Router over a store seeded with: 1 = positive text, 2 = empty text.
fn test_router() -> Router {
    let store = Arc::new(MemoryArticleStore::new());
    store.seed(
        "Rally",
        "https://news/1",
        "Markets surge after strong earnings. Investors welcome the bipartisan compromise.",
    );
    store.seed("Blank", "https://news/2", "   ");
    let state = bootstrap::build_state_with_store(&offline_config(), store).expect("state");
    router(state)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Json>) -> (StatusCode, axum::http::HeaderMap, Json) {
    let mut req = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(v) => {
            req = req.header("content-type", "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };
    let resp = app
        .clone()
        .oneshot(req.body(body).expect("build request"))
        .await
        .expect("oneshot");
    let status = resp.status();
    let headers = resp.headers().clone();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    let v = serde_json::from_slice(&bytes)
        .unwrap_or_else(|_| Json::String(String::from_utf8_lossy(&bytes).into_owned()));
    (status, headers, v)
}

#[tokio::test]
async fn health_and_root() {
    let app = test_router();
    let (status, _, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Json::String("ok".into()));

    let (status, _, body) = send(&app, "GET", "/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);
    assert_eq!(body["message"], "There are 2 articles in the database.");
}

#[tokio::test]
async fn sync_enrich_returns_annotations_and_complete_header() {
    let app = test_router();
    let (status, headers, body) = send(&app, "POST", "/enrich/1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get("x-enrich-complete").unwrap(), "1");
    assert_eq!(body["id"], 1);
    assert_eq!(body["sentiment"], "POSITIVE");
    assert_eq!(body["bias"], "center");
    assert!(body["summary"].as_str().unwrap().starts_with("Markets surge"));
    assert_eq!(body["missing"], json!([]));
    assert_eq!(body["fields"]["sentiment"]["status"], "computed");

    // same content again -> all served from cache
    let (_, _, again) = send(&app, "POST", "/enrich/1", None).await;
    assert_eq!(again["fields"]["summarize"]["status"], "cached");
    assert_eq!(again["fields"]["bias"]["status"], "cached");
}

#[tokio::test]
async fn sync_enrich_errors() {
    let app = test_router();
    let (status, _, body) = send(&app, "POST", "/enrich/999", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("999"));

    let (status, _, _) = send(&app, "POST", "/enrich/2", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn async_enrich_job_can_be_polled() {
    let app = test_router();
    let (status, _, body) = send(&app, "POST", "/enrich_async?limit=5", None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["articles"], 1, "only the article with text is selected");
    let job_id = body["job_id"].as_str().unwrap().to_string();

    let deadline = Instant::now() + Duration::from_secs(5);
    let job = loop {
        let (status, _, job) = send(&app, "GET", &format!("/job/{job_id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        if job["completed_at"].is_string() {
            break job;
        }
        assert!(Instant::now() < deadline, "job never finished: {job}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    };
    assert_eq!(job["status"], "completed");
    assert_eq!(job["done"], json!([1]));
    assert_eq!(job["articles"]["1"], "done");

    // nothing left to pick
    let (status, _, body) = send(&app, "POST", "/enrich_async", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["job_id"].is_null());

    let (_, _, metrics) = send(&app, "GET", "/metrics", None).await;
    assert_eq!(metrics["labeled"], 1);
    assert_eq!(metrics["sentiment"]["POSITIVE"], 1);
}

#[tokio::test]
async fn explicit_ids_body_and_bad_requests() {
    let app = test_router();
    let (status, _, body) = send(&app, "POST", "/enrich_async", Some(json!({ "ids": [1, 999] }))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["articles"], 2);

    let (status, _, _) = send(&app, "POST", "/enrich_async", Some(json!({ "ids": [] }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _, _) = send(&app, "POST", "/enrich_async", Some(json!({ "nope": 1 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, _) = send(
        &app,
        "GET",
        "/job/00000000-0000-0000-0000-000000000000",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _, _) = send(
        &app,
        "POST",
        "/job/00000000-0000-0000-0000-000000000000/cancel",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn listing_and_unconfigured_news_source() {
    let app = test_router();
    let (status, _, body) = send(&app, "GET", "/articles?limit=1", None).await;
    assert_eq!(status, StatusCode::OK);
    let rows = body.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["id"], 2, "newest first");

    let (status, _, body) = send(&app, "GET", "/news/fetch?q=markets", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].is_string());
}

/// Bias fails on "[unclear]" text; every call sleeps `delay`.
struct ScriptedProvider {
    delay: Duration,
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn infer(&self, request: InferenceRequest<'_>) -> Result<String, InferenceError> {
        tokio::time::sleep(self.delay).await;
        match request {
            InferenceRequest::Summarize { text } => Ok(format!("{} words", text.split_whitespace().count())),
            InferenceRequest::Sentiment { .. } => Ok("NEUTRAL".into()),
            InferenceRequest::Bias { text, .. } if text.contains("[unclear]") => {
                Err(InferenceError::InvalidResponse {
                    message: "scores missing".into(),
                })
            }
            InferenceRequest::Bias { labels, .. } => Ok(labels[0].clone()),
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

fn scripted_router(store: Arc<MemoryArticleStore>, delay: Duration, workers: usize) -> Router {
    let mut cfg = offline_config();
    cfg.dispatcher.workers = workers;
    let provider = Arc::new(ScriptedProvider { delay });
    router(bootstrap::build_state_with_provider(&cfg, store, provider).expect("state"))
}

#[tokio::test]
async fn partial_sync_enrich_reports_missing_fields() {
    let store = Arc::new(MemoryArticleStore::new());
    let id = store.seed("Wire", "https://news/u", "Wire copy [unclear] on the coalition talks.");
    let app = scripted_router(store.clone(), Duration::ZERO, 1);

    let (status, headers, body) = send(&app, "POST", &format!("/enrich/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get("x-enrich-complete").unwrap(), "0");
    assert_eq!(body["missing"], json!(["bias"]));
    assert_eq!(body["summary"], "7 words");
    assert_eq!(body["sentiment"], "NEUTRAL");
    assert!(body["bias"].is_null());
    assert_eq!(body["fields"]["bias"]["status"], "failed");
    assert_eq!(body["fields"]["bias"]["error"]["kind"], "invalid_response");
    assert_eq!(body["fields"]["summarize"]["status"], "computed");
    assert!(body["persist_error"].is_null());

    // what did succeed is stored
    let (_, _, rows) = send(&app, "GET", "/articles", None).await;
    assert_eq!(rows[0]["summary"], "7 words");
    assert!(rows[0]["bias"].is_null());
}

#[tokio::test]
async fn cancel_through_the_router() {
    let store = Arc::new(MemoryArticleStore::new());
    let ids: Vec<u64> = (0..3)
        .map(|i| store.seed("t", &format!("https://news/{i}"), &format!("Story number {i}.")))
        .collect();
    let app = scripted_router(store, Duration::from_millis(150), 1);

    let (status, _, body) = send(&app, "POST", "/enrich_async", Some(json!({ "ids": ids }))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let job_id = body["job_id"].as_str().unwrap().to_string();

    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        let (_, _, job) = send(&app, "GET", &format!("/job/{job_id}"), None).await;
        if job["status"] == "running" {
            break;
        }
        assert!(Instant::now() < deadline, "job never started: {job}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let (status, _, job) = send(&app, "POST", &format!("/job/{job_id}/cancel"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(job["cancel_requested"], true);

    let deadline = Instant::now() + Duration::from_secs(5);
    let job = loop {
        let (_, _, job) = send(&app, "GET", &format!("/job/{job_id}"), None).await;
        if job["completed_at"].is_string() {
            break job;
        }
        assert!(Instant::now() < deadline, "job never finished: {job}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    };
    assert_eq!(job["status"], "cancelled");
    assert_eq!(job["done"].as_array().unwrap().len(), 1);
    assert_eq!(job["failed"], json!([]));

    // cancelling a finished job changes nothing
    let (status, _, again) = send(&app, "POST", &format!("/job/{job_id}/cancel"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["status"], "cancelled");
}
