// src/article.rs
//! Articles and the store the pipeline reads raw text from and writes annotations to.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub type ArticleId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    pub id: ArticleId,
    pub title: String,
    pub source: Option<String>,
    pub url: String,
    pub published_at: Option<DateTime<Utc>>,
    pub raw_text: Option<String>,
    pub summary: Option<String>,
    pub sentiment: Option<String>,
    pub bias: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Article {
    /// Apply whatever annotations are present; absent fields keep their current value.
    pub fn merge(&mut self, annotations: &Annotations) {
        if let Some(s) = &annotations.summary {
            self.summary = Some(s.clone());
        }
        if let Some(s) = &annotations.sentiment {
            self.sentiment = Some(s.clone());
        }
        if let Some(b) = &annotations.bias {
            self.bias = Some(b.clone());
        }
    }
}

/// Input for inserting a freshly ingested article.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewArticle {
    pub title: String,
    pub source: Option<String>,
    pub url: String,
    pub published_at: Option<DateTime<Utc>>,
    pub raw_text: Option<String>,
}

/// The three fields the pipeline writes back. `None` = leave untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotations {
    pub summary: Option<String>,
    pub sentiment: Option<String>,
    pub bias: Option<String>,
}

impl Annotations {
    pub fn is_empty(&self) -> bool {
        self.summary.is_none() && self.sentiment.is_none() && self.bias.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("article {0} not found")]
    NotFound(ArticleId),
    /// The change was not durably recorded; retry the save, don't recompute.
    #[error("failed to persist article store: {0}")]
    Persist(String),
}

/// Durability boundary for articles. The pipeline only reads raw text and writes
/// the three annotation fields.
#[async_trait]
pub trait ArticleStore: Send + Sync {
    async fn get(&self, id: ArticleId) -> Result<Option<Article>, StoreError>;

    async fn get_raw_text(&self, id: ArticleId) -> Result<Option<String>, StoreError> {
        Ok(self.get(id).await?.and_then(|a| a.raw_text))
    }

    async fn save_annotations(&self, id: ArticleId, annotations: &Annotations)
        -> Result<(), StoreError>;

    /// Newest first.
    async fn list_articles(&self, limit: usize) -> Result<Vec<Article>, StoreError>;

    /// Articles that have raw text but no summary yet, oldest first.
    async fn list_unenriched(&self, limit: usize) -> Result<Vec<Article>, StoreError>;

    /// Insert unless the URL is already known. Returns the new id, or `None` for a duplicate.
    async fn insert(&self, article: NewArticle) -> Result<Option<ArticleId>, StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreState {
    next_id: ArticleId,
    articles: BTreeMap<ArticleId, Article>,
    #[serde(skip)]
    by_url: HashMap<String, ArticleId>,
}

impl StoreState {
    fn reindex(&mut self) {
        self.by_url = self
            .articles
            .values()
            .map(|a| (a.url.clone(), a.id))
            .collect();
        let max = self.articles.keys().next_back().copied().unwrap_or(0);
        self.next_id = self.next_id.max(max + 1);
    }
}

/// In-memory store with an optional JSON snapshot (atomic tmp+rename).
///
/// With a snapshot, a mutation becomes visible only after the snapshot holding
/// it is on disk; a failed write leaves the live state untouched.
#[derive(Debug)]
pub struct MemoryArticleStore {
    state: RwLock<StoreState>,
    snapshot: Option<PathBuf>,
    /// Serializes snapshot writers so files land in commit order.
    writer: tokio::sync::Mutex<()>,
}

impl Default for MemoryArticleStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryArticleStore {
    pub fn new() -> Self {
        let mut state = StoreState::default();
        state.reindex();
        Self {
            state: RwLock::new(state),
            snapshot: None,
            writer: tokio::sync::Mutex::new(()),
        }
    }

    /// Load `path` if it exists and keep it updated after each mutation.
    pub fn with_snapshot(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let mut state = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            serde_json::from_str::<StoreState>(&raw)?
        } else {
            StoreState::default()
        };
        state.reindex();
        info!(
            target: "store",
            path = %path.display(),
            articles = state.articles.len(),
            "article store loaded"
        );
        Ok(Self {
            state: RwLock::new(state),
            snapshot: Some(path),
            writer: tokio::sync::Mutex::new(()),
        })
    }

    /// Seed helper for tests and demos: inserts and returns the id.
    pub fn seed(&self, title: &str, url: &str, raw_text: &str) -> ArticleId {
        let mut s = self.write_state();
        let id = s.next_id;
        s.next_id += 1;
        s.articles.insert(id, new_article_row(id, NewArticle {
            title: title.to_string(),
            source: None,
            url: url.to_string(),
            published_at: None,
            raw_text: Some(raw_text.to_string()),
        }));
        s.by_url.insert(url.to_string(), id);
        id
    }

    fn read_state(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(|p| p.into_inner())
    }

    /// Apply `change` and make it durable. With a snapshot the change runs on a
    /// copy, the copy is written on the blocking pool, and only then swapped in.
    async fn commit<T, F>(&self, change: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut StoreState) -> Result<T, StoreError> + Send,
        T: Send,
    {
        let Some(path) = self.snapshot.clone() else {
            let mut s = self.write_state();
            return change(&mut *s);
        };

        let _writer = self.writer.lock().await;
        let mut next = self.read_state().clone();
        let out = change(&mut next)?;
        let json = serde_json::to_vec_pretty(&next)
            .map_err(|e| StoreError::Persist(e.to_string()))?;

        let target = path.clone();
        let written = tokio::task::spawn_blocking(move || write_snapshot(&target, &json))
            .await
            .unwrap_or_else(|e| Err(std::io::Error::other(e)));
        if let Err(e) = written {
            warn!(target: "store", path = %path.display(), error = %e, "snapshot write failed");
            return Err(StoreError::Persist(e.to_string()));
        }

        *self.write_state() = next;
        Ok(out)
    }
}

fn new_article_row(id: ArticleId, a: NewArticle) -> Article {
    Article {
        id,
        title: a.title,
        source: a.source,
        url: a.url,
        published_at: a.published_at,
        raw_text: a.raw_text,
        summary: None,
        sentiment: None,
        bias: None,
        created_at: Utc::now(),
    }
}

fn write_snapshot(path: &Path, json: &[u8]) -> std::io::Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    let tmp = path.with_extension("json.tmp");
    let mut f = fs::File::create(&tmp)?;
    f.write_all(json)?;
    f.sync_all()?;
    fs::rename(tmp, path)
}

#[async_trait]
impl ArticleStore for MemoryArticleStore {
    async fn get(&self, id: ArticleId) -> Result<Option<Article>, StoreError> {
        Ok(self.read_state().articles.get(&id).cloned())
    }

    async fn save_annotations(
        &self,
        id: ArticleId,
        annotations: &Annotations,
    ) -> Result<(), StoreError> {
        self.commit(|s| {
            let article = s.articles.get_mut(&id).ok_or(StoreError::NotFound(id))?;
            article.merge(annotations);
            Ok(())
        })
        .await
    }

    async fn list_articles(&self, limit: usize) -> Result<Vec<Article>, StoreError> {
        let s = self.read_state();
        Ok(s.articles.values().rev().take(limit).cloned().collect())
    }

    async fn list_unenriched(&self, limit: usize) -> Result<Vec<Article>, StoreError> {
        let s = self.read_state();
        Ok(s
            .articles
            .values()
            .filter(|a| a.summary.is_none())
            .filter(|a| a.raw_text.as_deref().is_some_and(|t| !t.trim().is_empty()))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn insert(&self, article: NewArticle) -> Result<Option<ArticleId>, StoreError> {
        self.commit(move |s| {
            if s.by_url.contains_key(&article.url) {
                return Ok(None);
            }
            let id = s.next_id;
            s.next_id += 1;
            s.by_url.insert(article.url.clone(), id);
            s.articles.insert(id, new_article_row(id, article));
            Ok(Some(id))
        })
        .await
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.read_state().articles.len())
    }
}
