// src/config/mod.rs
//! Pipeline configuration: TOML file + env overrides.
//!
//! Lookup order:
//! 1) $PIPELINE_CONFIG_PATH (must exist)
//! 2) config/pipeline.toml
//! 3) built-in defaults

mod inference;

pub use inference::{InferenceMode, InferenceSettings};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config/pipeline.toml";
pub const ENV_CONFIG_PATH: &str = "PIPELINE_CONFIG_PATH";
pub const ENV_DISPATCHER_WORKERS: &str = "DISPATCHER_WORKERS";
pub const ENV_NEWSAPI_KEY: &str = "NEWSAPI_KEY";

const MAX_WORKERS: usize = 64;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub inference: InferenceSettings,
    pub cache: CacheSettings,
    pub dispatcher: DispatcherSettings,
    pub store: StoreSettings,
    pub newsapi: NewsApiSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Memory,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub backend: CacheBackend,
    /// Directory for the file backend.
    pub dir: PathBuf,
    /// Absolute TTL; `None` keeps entries forever.
    pub ttl_secs: Option<u64>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memory,
            dir: PathBuf::from("cache/enrich"),
            ttl_secs: Some(60 * 60 * 24),
        }
    }
}

impl CacheSettings {
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherSettings {
    /// Worker count; sized to the upstream quota, not to request volume.
    pub workers: usize,
    pub queue_capacity: usize,
    /// How many times an article whose only failures are rate limits is requeued.
    pub max_requeues: u32,
    pub requeue_delay_ms: u64,
    /// Terminal jobs kept for polling before the oldest are dropped.
    pub max_retained_jobs: usize,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
            max_requeues: 1,
            requeue_delay_ms: 5_000,
            max_retained_jobs: 500,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// JSON snapshot loaded at start and rewritten after each mutation.
    pub snapshot_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NewsApiSettings {
    /// "ENV" means: read from NEWSAPI_KEY.
    pub api_key: String,
    pub base_url: String,
    pub language: String,
    pub default_query: String,
}

impl Default for NewsApiSettings {
    fn default() -> Self {
        Self {
            api_key: "ENV".to_string(),
            base_url: "https://newsapi.org/v2".to_string(),
            language: "en".to_string(),
            default_query: "world".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Load using env var + fallbacks (see module docs).
    pub fn load() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
            return Self::load_from(&pb);
        }
        let default = Path::new(DEFAULT_CONFIG_PATH);
        if default.exists() {
            return Self::load_from(default);
        }
        Self::default().finalize()
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading pipeline config from {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("parsing pipeline config {}", path.display()))
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: PipelineConfig = toml::from_str(s)?;
        cfg.finalize()
    }

    /// Resolve secrets, apply env overrides, clamp out-of-range values back to defaults.
    fn finalize(mut self) -> Result<Self> {
        self.inference.finalize()?;

        if self.newsapi.api_key.trim().eq_ignore_ascii_case("env") {
            self.newsapi.api_key = std::env::var(ENV_NEWSAPI_KEY).unwrap_or_default();
        }

        if let Ok(raw) = std::env::var(ENV_DISPATCHER_WORKERS) {
            self.dispatcher.workers = raw
                .trim()
                .parse()
                .with_context(|| format!("{ENV_DISPATCHER_WORKERS} must be a positive integer"))?;
        }
        let defaults = DispatcherSettings::default();
        if self.dispatcher.workers == 0 || self.dispatcher.workers > MAX_WORKERS {
            self.dispatcher.workers = defaults.workers;
        }
        if self.dispatcher.queue_capacity == 0 {
            self.dispatcher.queue_capacity = defaults.queue_capacity;
        }
        if self.dispatcher.max_retained_jobs == 0 {
            self.dispatcher.max_retained_jobs = defaults.max_retained_jobs;
        }
        Ok(self)
    }
}
