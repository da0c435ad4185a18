use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use hotspot_forecast::{
    api,
    config::ServiceConfig,
    fallback::FallbackSupplier,
    history::JsonHistoryStore,
    spatial::H3Index,
    ForecastEngine, HotspotRanker, ModelPaths,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = ServiceConfig::from_env()?;
    tracing::info!("config: {:?}", cfg);

    let engine = Arc::new(ForecastEngine::new(ModelPaths {
        model: cfg.model_path.clone(),
        meta: cfg.meta_path.clone(),
    }));

    // Warmup so the first request doesn't pay for loading
    let warm = Arc::clone(&engine);
    match tokio::task::spawn_blocking(move || warm.warm_up()).await? {
        Ok(kind) => tracing::info!("warmup ok ({} load)", kind),
        Err(e) => tracing::warn!("{}; hotspot requests will be served from the fallback dataset", e),
    }

    let history = match JsonHistoryStore::open(&cfg.history_path) {
        Ok(store) => store,
        Err(e) => {
            tracing::warn!("{:#}; starting with empty history", e);
            JsonHistoryStore::default()
        }
    };
    let spatial = H3Index::new(cfg.h3_resolution, cfg.max_cells)?;

    let ranker = HotspotRanker::new(
        Arc::new(spatial),
        Arc::new(history),
        engine.clone(),
        FallbackSupplier::new(cfg.fallback_path.clone()),
    )
    .with_concurrency(cfg.cell_concurrency);

    let app = api::router(api::AppState {
        ranker: Arc::new(ranker),
        engine,
    });

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], cfg.port));
    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
