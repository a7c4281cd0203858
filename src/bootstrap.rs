// src/bootstrap.rs
//! Wire config into the running pipeline: provider, cache, store, engine, dispatcher.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::api::AppState;
use crate::article::{ArticleStore, MemoryArticleStore};
use crate::cache::{FileCache, FingerprintCache, MemoryCache};
use crate::config::{
    CacheBackend, CacheSettings, InferenceMode, InferenceSettings, PipelineConfig, StoreSettings,
};
use crate::engine::EnrichmentEngine;
use crate::ingest::NewsApiProvider;
use crate::inference::{
    DynProvider, HuggingFaceProvider, InferenceClient, LexiconProvider, QuotaBudget,
};
use crate::jobs::JobDispatcher;

/// HuggingFace when selected and a token is present; the offline lexicon otherwise.
pub fn build_provider(settings: &InferenceSettings) -> Result<DynProvider> {
    match settings.mode {
        InferenceMode::HuggingFace if !settings.api_token.trim().is_empty() => {
            let p = HuggingFaceProvider::new(settings).context("building HuggingFace client")?;
            // Safe diagnostics: never the token itself
            info!(
                target: "inference",
                base_url = %settings.base_url,
                token_len = settings.api_token.len(),
                "using HuggingFace provider"
            );
            Ok(Arc::new(p))
        }
        InferenceMode::HuggingFace => {
            warn!(target: "inference", "HF_TOKEN not set, falling back to offline lexicon provider");
            Ok(Arc::new(LexiconProvider::new()))
        }
        InferenceMode::Lexicon => {
            info!(target: "inference", "using offline lexicon provider");
            Ok(Arc::new(LexiconProvider::new()))
        }
    }
}

/// Retry, quota and timeout settings around an already built provider.
pub fn build_client(settings: &InferenceSettings, provider: DynProvider) -> InferenceClient {
    let budget = QuotaBudget::new(settings.requests_per_minute, settings.daily_limit);
    InferenceClient::new(provider)
        .with_backoff(settings.backoff())
        .with_budget(Arc::new(budget))
        .with_timeout(settings.request_timeout())
}

pub fn build_cache(settings: &CacheSettings) -> Arc<dyn FingerprintCache> {
    match settings.backend {
        CacheBackend::Memory => Arc::new(MemoryCache::with_ttl(settings.ttl())),
        CacheBackend::File => Arc::new(FileCache::new(&settings.dir, settings.ttl())),
    }
}

pub fn build_store(settings: &StoreSettings) -> Result<Arc<MemoryArticleStore>> {
    match &settings.snapshot_path {
        Some(path) => Ok(Arc::new(
            MemoryArticleStore::with_snapshot(path)
                .with_context(|| format!("loading article snapshot {}", path.display()))?,
        )),
        None => Ok(Arc::new(MemoryArticleStore::new())),
    }
}

/// Build the shared state with a fresh store from config. Must run inside a
/// tokio runtime (the dispatcher spawns its workers here).
pub fn build_state(cfg: &PipelineConfig) -> Result<AppState> {
    let store = build_store(&cfg.store)?;
    build_state_with_store(cfg, store)
}

pub fn build_state_with_store(
    cfg: &PipelineConfig,
    store: Arc<dyn ArticleStore>,
) -> Result<AppState> {
    build_state_with_provider(cfg, store, build_provider(&cfg.inference)?)
}

/// Same wiring as [`build_state_with_store`] around a caller-supplied provider.
pub fn build_state_with_provider(
    cfg: &PipelineConfig,
    store: Arc<dyn ArticleStore>,
    provider: DynProvider,
) -> Result<AppState> {
    let cache = build_cache(&cfg.cache);
    let client = Arc::new(build_client(&cfg.inference, provider));
    info!(
        cache = cache.name(),
        provider = client.provider_name(),
        workers = cfg.dispatcher.workers,
        "pipeline configured"
    );
    let engine = Arc::new(EnrichmentEngine::new(
        cache,
        client,
        store,
        cfg.inference.bias_labels.clone(),
    ));
    let dispatcher = JobDispatcher::start(engine, cfg.dispatcher.clone());
    let state = AppState::new(dispatcher);

    match NewsApiProvider::new(&cfg.newsapi) {
        Ok(news) => Ok(state.with_news(Arc::new(news), &cfg.newsapi.default_query)),
        Err(e) => {
            warn!(target: "ingest", error = %e, "news fetch disabled");
            Ok(state)
        }
    }
}
