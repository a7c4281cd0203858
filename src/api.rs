// src/api.rs
//! Dashboard-facing HTTP surface.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header::HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::article::{Article, ArticleId, ArticleStore};
use crate::cache::TaskKind;
use crate::engine::{EnrichOutcome, EnrichmentEngine, FieldOutcome};
use crate::error::ApiError;
use crate::ingest::{self, SourceProvider, DEFAULT_FETCH_LIMIT};
use crate::jobs::{JobDispatcher, JobId};
use crate::metrics::MetricsSnapshot;

pub const DEFAULT_BATCH_LIMIT: usize = 10;
pub const MAX_BATCH_LIMIT: usize = 100;
const DEFAULT_LIST_LIMIT: usize = 20;
const MAX_LIST_LIMIT: usize = 200;

static ENRICH_COMPLETE: HeaderName = HeaderName::from_static("x-enrich-complete");

#[derive(Clone)]
pub struct AppState {
    engine: Arc<EnrichmentEngine>,
    dispatcher: JobDispatcher,
    news: Option<Arc<dyn SourceProvider>>,
    default_query: String,
}

impl AppState {
    pub fn new(dispatcher: JobDispatcher) -> Self {
        Self {
            engine: dispatcher.engine().clone(),
            dispatcher,
            news: None,
            default_query: "world".to_string(),
        }
    }

    pub fn with_news(mut self, provider: Arc<dyn SourceProvider>, default_query: &str) -> Self {
        self.news = Some(provider);
        self.default_query = default_query.to_string();
        self
    }

    fn store(&self) -> &Arc<dyn ArticleStore> {
        self.engine.store()
    }

    pub fn dispatcher(&self) -> &JobDispatcher {
        &self.dispatcher
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(|| async { "ok" }))
        .route("/enrich/{id}", post(enrich_one))
        .route("/enrich_async", post(enrich_async))
        .route("/job/{id}", get(job_status))
        .route("/job/{id}/cancel", post(job_cancel))
        .route("/metrics", get(label_metrics))
        .route("/articles", get(list_articles))
        .route("/news/fetch", get(fetch_news))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

async fn root(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let count = state.store().count().await?;
    Ok(Json(json!({
        "message": format!("There are {count} articles in the database."),
        "count": count,
    })))
}

#[derive(Serialize)]
struct EnrichResp {
    id: ArticleId,
    summary: Option<String>,
    sentiment: Option<String>,
    bias: Option<String>,
    /// Fields without a value after this call.
    missing: Vec<TaskKind>,
    fields: std::collections::BTreeMap<TaskKind, FieldOutcome>,
    persist_error: Option<String>,
}

impl From<EnrichOutcome> for EnrichResp {
    fn from(out: EnrichOutcome) -> Self {
        let missing = out
            .fields
            .iter()
            .filter(|(_, f)| f.value().is_none())
            .map(|(t, _)| *t)
            .collect();
        Self {
            id: out.article.id,
            summary: out.article.summary,
            sentiment: out.article.sentiment,
            bias: out.article.bias,
            missing,
            fields: out.fields,
            persist_error: out.persist_error,
        }
    }
}

/// Synchronous enrichment. Partial results are a 200 with `missing` filled in;
/// `X-Enrich-Complete` tells the caller whether anything is left to retry.
async fn enrich_one(
    State(state): State<AppState>,
    Path(id): Path<ArticleId>,
) -> Result<Response, ApiError> {
    let outcome = state.engine.enrich_by_id(id).await?;
    let complete = outcome.is_complete();
    let mut resp = Json(EnrichResp::from(outcome)).into_response();
    resp.headers_mut().insert(
        ENRICH_COMPLETE.clone(),
        HeaderValue::from_static(if complete { "1" } else { "0" }),
    );
    Ok(resp)
}

#[derive(Deserialize)]
struct LimitQuery {
    limit: Option<usize>,
}

#[derive(Deserialize)]
struct EnqueueBody {
    ids: Vec<ArticleId>,
}

/// `?limit=N` picks unenriched articles; a JSON body `{"ids": [...]}` enqueues
/// exactly those (the way to retry failed articles).
async fn enrich_async(
    State(state): State<AppState>,
    Query(q): Query<LimitQuery>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let explicit = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        let parsed: EnqueueBody = serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("invalid body: {e}")))?;
        Some(parsed.ids)
    };

    let job_id: Option<JobId> = match explicit {
        Some(ids) if ids.is_empty() => {
            return Err(ApiError::BadRequest("ids must not be empty".into()));
        }
        Some(ids) => {
            if ids.len() > MAX_BATCH_LIMIT {
                return Err(ApiError::BadRequest(format!(
                    "at most {MAX_BATCH_LIMIT} ids per request"
                )));
            }
            Some(state.dispatcher.enqueue(&ids)?)
        }
        None => {
            let limit = q
                .limit
                .unwrap_or(DEFAULT_BATCH_LIMIT)
                .clamp(1, MAX_BATCH_LIMIT);
            state.dispatcher.enqueue_pending(limit).await?
        }
    };

    Ok(match job_id {
        Some(id) => {
            let articles = state
                .dispatcher
                .status(id)
                .map(|j| j.articles.len())
                .unwrap_or_default();
            (
                StatusCode::ACCEPTED,
                Json(json!({ "job_id": id, "articles": articles })),
            )
                .into_response()
        }
        None => Json(json!({
            "job_id": null,
            "articles": 0,
            "message": "nothing to enrich",
        }))
        .into_response(),
    })
}

async fn job_status(
    State(state): State<AppState>,
    Path(id): Path<JobId>,
) -> Result<Response, ApiError> {
    let job = state
        .dispatcher
        .status(id)
        .ok_or_else(|| ApiError::NotFound(format!("job {id} not found")))?;
    Ok(Json(job.report()).into_response())
}

async fn job_cancel(
    State(state): State<AppState>,
    Path(id): Path<JobId>,
) -> Result<Response, ApiError> {
    let job = state
        .dispatcher
        .cancel(id)
        .ok_or_else(|| ApiError::NotFound(format!("job {id} not found")))?;
    Ok(Json(job.report()).into_response())
}

async fn label_metrics(State(state): State<AppState>) -> Result<Json<MetricsSnapshot>, ApiError> {
    Ok(Json(MetricsSnapshot::compute(state.store().as_ref()).await?))
}

async fn list_articles(
    State(state): State<AppState>,
    Query(q): Query<LimitQuery>,
) -> Result<Json<Vec<Article>>, ApiError> {
    let limit = q.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
    Ok(Json(state.store().list_articles(limit).await?))
}

#[derive(Deserialize)]
struct FetchQuery {
    q: Option<String>,
    limit: Option<usize>,
}

async fn fetch_news(
    State(state): State<AppState>,
    Query(q): Query<FetchQuery>,
) -> Result<Json<ingest::IngestReport>, ApiError> {
    let provider = state
        .news
        .as_ref()
        .ok_or_else(|| ApiError::Unavailable("news source is not configured".into()))?;
    let query = q
        .q
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| state.default_query.clone());
    let limit = q.limit.unwrap_or(DEFAULT_FETCH_LIMIT);
    let report = ingest::ingest_into(provider.as_ref(), state.store().as_ref(), &query, limit)
        .await
        .map_err(ApiError::Upstream)?;
    Ok(Json(report))
}
