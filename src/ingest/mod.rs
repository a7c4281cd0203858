// src/ingest/mod.rs
//! Article ingest: pull from a news source and insert into the store, dedup by URL.

pub mod newsapi;

pub use newsapi::NewsApiProvider;

use std::collections::HashSet;

use anyhow::Result;
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use serde::Serialize;
use tracing::{info, warn};

use crate::article::{ArticleId, ArticleStore, NewArticle};

pub const DEFAULT_FETCH_LIMIT: usize = 5;
pub const MAX_FETCH_LIMIT: usize = 20;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_fetched_total", "Articles returned by news providers.");
        describe_counter!("ingest_inserted_total", "Articles newly inserted into the store.");
        describe_counter!("ingest_duplicates_total", "Fetched articles skipped as known URLs.");
        describe_counter!("ingest_provider_errors_total", "Provider fetch/parse errors.");
    });
}

#[async_trait::async_trait]
pub trait SourceProvider: Send + Sync {
    async fn fetch(&self, query: &str, limit: usize) -> Result<Vec<NewArticle>>;
    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub fetched: usize,
    pub ingested: usize,
    pub duplicates: usize,
    pub ids: Vec<ArticleId>,
}

/// Fetch up to `limit` (clamped to 1..=20) articles and insert the new ones.
pub async fn ingest_into(
    provider: &dyn SourceProvider,
    store: &dyn ArticleStore,
    query: &str,
    limit: usize,
) -> Result<IngestReport> {
    ensure_metrics_described();
    let limit = limit.clamp(1, MAX_FETCH_LIMIT);

    let fetched = match provider.fetch(query, limit).await {
        Ok(v) => v,
        Err(e) => {
            counter!("ingest_provider_errors_total", "provider" => provider.name()).increment(1);
            warn!(target: "ingest", provider = provider.name(), error = %e, "fetch failed");
            return Err(e);
        }
    };

    let mut report = IngestReport {
        fetched: fetched.len(),
        ..Default::default()
    };
    let mut seen = HashSet::new();
    for article in fetched.into_iter().take(limit) {
        if article.url.trim().is_empty() || !seen.insert(article.url.clone()) {
            report.duplicates += 1;
            continue;
        }
        match store.insert(article).await? {
            Some(id) => report.ids.push(id),
            None => report.duplicates += 1,
        }
    }
    report.ingested = report.ids.len();

    counter!("ingest_fetched_total", "provider" => provider.name())
        .increment(report.fetched as u64);
    counter!("ingest_inserted_total").increment(report.ingested as u64);
    counter!("ingest_duplicates_total").increment(report.duplicates as u64);
    info!(
        target: "ingest",
        provider = provider.name(),
        query,
        fetched = report.fetched,
        ingested = report.ingested,
        duplicates = report.duplicates,
        "ingest run"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::article::MemoryArticleStore;

    struct Fixed(Vec<NewArticle>);

    #[async_trait::async_trait]
    impl SourceProvider for Fixed {
        async fn fetch(&self, _query: &str, limit: usize) -> Result<Vec<NewArticle>> {
            Ok(self.0.iter().take(limit).cloned().collect())
        }
        fn name(&self) -> &'static str {
            "fixed"
        }
    }

    fn art(url: &str) -> NewArticle {
        NewArticle {
            title: format!("About {url}"),
            url: url.into(),
            raw_text: Some("text".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn skips_known_and_repeated_urls() {
        let store = MemoryArticleStore::new();
        store.seed("old", "https://n/1", "already here");
        let provider = Fixed(vec![art("https://n/1"), art("https://n/2"), art("https://n/2"), art("")]);

        let report = ingest_into(&provider, &store, "world", 10).await.unwrap();
        assert_eq!(report.fetched, 4);
        assert_eq!(report.ingested, 1);
        assert_eq!(report.duplicates, 3);
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn limit_is_clamped() {
        let store = MemoryArticleStore::new();
        let many: Vec<NewArticle> = (0..30).map(|i| art(&format!("https://n/{i}"))).collect();
        let report = ingest_into(&Fixed(many), &store, "q", 500).await.unwrap();
        assert_eq!(report.ingested, MAX_FETCH_LIMIT);

        let report = ingest_into(&Fixed(vec![art("https://z/1")]), &store, "q", 0)
            .await
            .unwrap();
        assert_eq!(report.ingested, 1);
    }
}
