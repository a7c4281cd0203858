// src/metrics.rs
//! Dashboard label counts and the Prometheus recorder for pipeline counters.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use serde::Serialize;

use crate::article::{ArticleStore, StoreError};

/// Aggregated annotation counts over the whole store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub total_articles: usize,
    /// Articles carrying both a sentiment and a bias label.
    pub labeled: usize,
    pub summarized: usize,
    pub sentiment: BTreeMap<String, usize>,
    pub bias: BTreeMap<String, usize>,
}

impl MetricsSnapshot {
    pub async fn compute(store: &dyn ArticleStore) -> Result<Self, StoreError> {
        let articles = store.list_articles(usize::MAX).await?;
        let mut snap = MetricsSnapshot {
            total_articles: articles.len(),
            ..Default::default()
        };
        for a in &articles {
            if a.summary.is_some() {
                snap.summarized += 1;
            }
            if let Some(s) = &a.sentiment {
                *snap.sentiment.entry(s.clone()).or_default() += 1;
            }
            if let Some(b) = &a.bias {
                *snap.bias.entry(b.clone()).or_default() += 1;
            }
            if a.sentiment.is_some() && a.bias.is_some() {
                snap.labeled += 1;
            }
        }
        Ok(snap)
    }
}

/// Register descriptions for every pipeline series once per process.
pub fn describe_pipeline_metrics() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("enrich_cache_hits_total", "Annotation lookups served from the fingerprint cache.");
        describe_counter!("enrich_cache_misses_total", "Annotation lookups that missed the cache.");
        describe_counter!(
            "enrich_collapsed_total",
            "Cache misses that waited on an identical in-flight upstream call."
        );
        describe_counter!("inference_requests_total", "Upstream inference attempts.");
        describe_counter!("inference_retries_total", "Upstream attempts retried after a retryable error.");
        describe_counter!("inference_failures_total", "Upstream calls that ended in a terminal error.");
        describe_histogram!("inference_duration_ms", "Upstream call latency in milliseconds.");
        describe_counter!("jobs_enqueued_total", "Batch enrichment jobs accepted.");
        describe_counter!("jobs_finished_total", "Jobs that reached a terminal status.");
        describe_gauge!("dispatcher_workers", "Worker tasks in the job dispatcher.");
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder. Fails if another recorder is already set.
    pub fn init() -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;
        describe_pipeline_metrics();
        Ok(Self { handle })
    }

    /// `/prometheus` in the text exposition format.
    pub fn router<S>(&self) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        let handle = self.handle.clone();
        Router::new().route(
            "/prometheus",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
