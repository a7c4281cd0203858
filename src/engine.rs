// src/engine.rs
//! Enrichment engine: cache check -> inference on miss -> persist, per article.
//!
//! Each task kind is resolved independently; one failing kind never blocks the
//! others from being persisted. Concurrent misses on the same [`CacheKey`] are
//! collapsed onto a single upstream call through a per-key in-flight cell.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use metrics::counter;
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::article::{Annotations, Article, ArticleId, ArticleStore, StoreError};
use crate::cache::{anon_hash, CacheKey, FingerprintCache, TaskKind};
use crate::inference::{InferenceClient, InferenceError};

/// Result of resolving one task kind for one article.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FieldOutcome {
    /// Served from the fingerprint cache, no upstream call.
    Cached { value: String },
    /// Obtained from upstream (possibly shared with a concurrent caller).
    Computed { value: String },
    Failed { error: InferenceError },
}

impl FieldOutcome {
    pub fn value(&self) -> Option<&str> {
        match self {
            FieldOutcome::Cached { value } | FieldOutcome::Computed { value } => Some(value),
            FieldOutcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&InferenceError> {
        match self {
            FieldOutcome::Failed { error } => Some(error),
            _ => None,
        }
    }
}

/// Article merged with whatever annotations were obtained, plus per-field status.
#[derive(Debug, Clone, Serialize)]
pub struct EnrichOutcome {
    pub article: Article,
    pub fields: BTreeMap<TaskKind, FieldOutcome>,
    /// Set when annotations were computed but the store did not record them.
    pub persist_error: Option<String>,
}

impl EnrichOutcome {
    /// All three annotations present and durably recorded.
    pub fn is_complete(&self) -> bool {
        self.persist_error.is_none() && self.fields.values().all(|f| f.value().is_some())
    }

    pub fn failed_tasks(&self) -> Vec<TaskKind> {
        self.fields
            .iter()
            .filter(|(_, f)| f.error().is_some())
            .map(|(t, _)| *t)
            .collect()
    }

    /// True when something failed and every failure is a rate limit (worth requeueing).
    pub fn only_rate_limited(&self) -> bool {
        let errors: Vec<&InferenceError> = self.fields.values().filter_map(|f| f.error()).collect();
        self.persist_error.is_none()
            && !errors.is_empty()
            && errors
                .iter()
                .all(|e| matches!(e, InferenceError::RateLimited { .. }))
    }

    /// task -> error message, for job status and API responses.
    pub fn error_summary(&self) -> BTreeMap<String, String> {
        let mut out: BTreeMap<String, String> = self
            .fields
            .iter()
            .filter_map(|(t, f)| f.error().map(|e| (t.to_string(), e.to_string())))
            .collect();
        if let Some(p) = &self.persist_error {
            out.insert("persist".to_string(), p.clone());
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnrichError {
    #[error("article {0} not found")]
    NotFound(ArticleId),
    #[error("article {0} has no text to analyze")]
    EmptyText(ArticleId),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
struct Resolved {
    value: String,
    from_cache: bool,
}

type InflightCell = Arc<OnceCell<Result<Resolved, InferenceError>>>;

pub struct EnrichmentEngine {
    cache: Arc<dyn FingerprintCache>,
    client: Arc<InferenceClient>,
    store: Arc<dyn ArticleStore>,
    bias_labels: Vec<String>,
    inflight: Mutex<HashMap<CacheKey, InflightCell>>,
}

impl EnrichmentEngine {
    pub fn new(
        cache: Arc<dyn FingerprintCache>,
        client: Arc<InferenceClient>,
        store: Arc<dyn ArticleStore>,
        bias_labels: Vec<String>,
    ) -> Self {
        Self {
            cache,
            client,
            store,
            bias_labels,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn ArticleStore> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<dyn FingerprintCache> {
        &self.cache
    }

    pub fn client(&self) -> &Arc<InferenceClient> {
        &self.client
    }

    pub async fn enrich_by_id(&self, id: ArticleId) -> Result<EnrichOutcome, EnrichError> {
        let article = self.store.get(id).await?.ok_or(EnrichError::NotFound(id))?;
        self.enrich_one(&article).await
    }

    pub async fn enrich_one(&self, article: &Article) -> Result<EnrichOutcome, EnrichError> {
        let text = article
            .raw_text
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or(EnrichError::EmptyText(article.id))?;

        let (summary, sentiment, bias) = tokio::join!(
            self.resolve(TaskKind::Summarize, text),
            self.resolve(TaskKind::Sentiment, text),
            self.resolve(TaskKind::Bias, text),
        );

        let fresh = |current: &Option<String>, outcome: &FieldOutcome| {
            outcome
                .value()
                .filter(|v| current.as_deref() != Some(*v))
                .map(str::to_string)
        };
        let annotations = Annotations {
            summary: fresh(&article.summary, &summary),
            sentiment: fresh(&article.sentiment, &sentiment),
            bias: fresh(&article.bias, &bias),
        };

        let mut merged = article.clone();
        merged.merge(&annotations);
        let persist_error = if annotations.is_empty() {
            None
        } else {
            match self.store.save_annotations(article.id, &annotations).await {
                Ok(()) => None,
                Err(e) => {
                    warn!(target: "enrich", article_id = article.id, error = %e, "annotations computed but not persisted");
                    Some(e.to_string())
                }
            }
        };

        let fields = BTreeMap::from([
            (TaskKind::Summarize, summary),
            (TaskKind::Sentiment, sentiment),
            (TaskKind::Bias, bias),
        ]);
        let outcome = EnrichOutcome {
            article: merged,
            fields,
            persist_error,
        };
        info!(
            target: "enrich",
            article_id = article.id,
            id = %anon_hash(text),
            complete = outcome.is_complete(),
            failed = ?outcome.failed_tasks(),
            "article enriched"
        );
        Ok(outcome)
    }

    fn params_for(&self, task: TaskKind) -> &[String] {
        match task {
            TaskKind::Bias => &self.bias_labels,
            _ => &[],
        }
    }

    async fn resolve(&self, task: TaskKind, text: &str) -> FieldOutcome {
        let params = self.params_for(task);
        let key = CacheKey::new(task, text, params);

        if let Some(hit) = self.cache.get(&key) {
            counter!("enrich_cache_hits_total", "task" => task.as_str()).increment(1);
            return FieldOutcome::Cached { value: hit.value };
        }
        counter!("enrich_cache_misses_total", "task" => task.as_str()).increment(1);

        let cell: InflightCell = {
            let mut map = self.inflight.lock().unwrap_or_else(|p| p.into_inner());
            map.entry(key.clone()).or_default().clone()
        };

        let ran_here = AtomicBool::new(false);
        let result = cell
            .get_or_init(|| async {
                ran_here.store(true, Ordering::Relaxed);
                // a previous leader may have finished between our miss and the lookup
                if let Some(hit) = self.cache.get(&key) {
                    return Ok(Resolved {
                        value: hit.value,
                        from_cache: true,
                    });
                }
                let value = self.client.run(task, text, params).await?;
                self.cache.put(key.clone(), value.clone());
                Ok(Resolved {
                    value,
                    from_cache: false,
                })
            })
            .await
            .clone();

        {
            let mut map = self.inflight.lock().unwrap_or_else(|p| p.into_inner());
            if map.get(&key).is_some_and(|c| Arc::ptr_eq(c, &cell)) {
                map.remove(&key);
            }
        }
        if !ran_here.load(Ordering::Relaxed) {
            counter!("enrich_collapsed_total", "task" => task.as_str()).increment(1);
        }

        match result {
            Ok(Resolved {
                value,
                from_cache: true,
            }) => FieldOutcome::Cached { value },
            Ok(Resolved { value, .. }) => FieldOutcome::Computed { value },
            Err(error) => FieldOutcome::Failed { error },
        }
    }
}
