// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod article;
pub mod bootstrap;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod inference;
pub mod ingest;
pub mod jobs;
pub mod metrics;

// ---- Re-exports for stable public API ----
pub use crate::api::{router, AppState};
pub use crate::article::{Annotations, Article, ArticleId, ArticleStore, MemoryArticleStore};
pub use crate::config::PipelineConfig;
pub use crate::engine::{EnrichError, EnrichOutcome, EnrichmentEngine, FieldOutcome};
pub use crate::inference::{InferenceClient, InferenceError};
pub use crate::jobs::{ArticleStatus, Job, JobDispatcher, JobId, JobStatus};
