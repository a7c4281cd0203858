//! News enrichment service — binary entrypoint.
//! Boots the Axum HTTP server: config, tracing, Prometheus recorder, pipeline state.

use news_enrichment::{bootstrap, metrics::Metrics, router, PipelineConfig};
use shuttle_axum::ShuttleAxum;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("news_enrichment=info,warn"));

    // The hosting runtime may have installed a subscriber already.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .try_init();
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = PipelineConfig::load()?;
    info!(
        mode = ?cfg.inference.mode,
        cache = ?cfg.cache.backend,
        workers = cfg.dispatcher.workers,
        "pipeline config loaded"
    );

    let state = bootstrap::build_state(&cfg)?;
    let mut app = router(state);
    match Metrics::init() {
        Ok(metrics) => app = app.merge(metrics.router()),
        Err(e) => warn!(error = %e, "prometheus exporter disabled"),
    }

    Ok(app.into())
}
