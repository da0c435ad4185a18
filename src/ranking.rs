//! Per-cell forecast pipeline, ranking, and the single fallback boundary.

use futures::{stream, StreamExt};
use serde_json::value::RawValue;
use std::{cmp::Ordering, sync::Arc};

use crate::engine::Forecaster;
use crate::error::{HotspotError, Result};
use crate::fallback::FallbackSupplier;
use crate::history::HistorySource;
use crate::spatial::{check_ring, SpatialIndex};
use crate::types::{CellDetail, FeatureRow, HotspotCollection, HotspotQuery, RankedCell};

/// Upper bound on returned features.
pub const MAX_RESULTS: usize = 30;

/// What a ranking request produced.
#[derive(Debug, Clone)]
pub enum RankOutcome {
    Live(HotspotCollection),
    /// Static dataset exactly as stored, plus the pipeline error that triggered it.
    Fallback {
        dataset: Box<RawValue>,
        reason: String,
    },
}

impl RankOutcome {
    pub fn source(&self) -> &'static str {
        match self {
            RankOutcome::Live(_) => "live",
            RankOutcome::Fallback { .. } => "fallback",
        }
    }
}

/// Sort by score descending (ties by cell id ascending) and keep the top `limit`.
pub fn rank_cells(mut cells: Vec<RankedCell>, limit: usize) -> Vec<RankedCell> {
    cells.sort_by(|a, b| match b.score.total_cmp(&a.score) {
        Ordering::Equal => a.cell_id.cmp(&b.cell_id),
        other => other,
    });
    cells.truncate(limit);
    cells
}

pub fn mean(values: &[f32]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().map(|v| *v as f64).sum::<f64>() / values.len() as f64
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| HotspotError::Inference(format!("inference task failed: {e}")))?
}

pub struct HotspotRanker {
    spatial: Arc<dyn SpatialIndex>,
    history: Arc<dyn HistorySource>,
    forecaster: Arc<dyn Forecaster>,
    fallback: FallbackSupplier,
    concurrency: usize,
}

impl HotspotRanker {
    pub fn new(
        spatial: Arc<dyn SpatialIndex>,
        history: Arc<dyn HistorySource>,
        forecaster: Arc<dyn Forecaster>,
        fallback: FallbackSupplier,
    ) -> Self {
        Self {
            spatial,
            history,
            forecaster,
            fallback,
            concurrency: 8,
        }
    }

    /// Max cells processed at once within one pass.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Live ranking, or the static dataset when the live pass yields nothing.
    /// Only `FallbackUnavailable` escapes.
    pub async fn rank(&self, query: &HotspotQuery) -> Result<RankOutcome> {
        match self.rank_live(query).await {
            Ok(collection) => {
                tracing::info!(
                    "ranked {} cells around ({}, {}) r={}km",
                    collection.features.len(),
                    query.lat,
                    query.lng,
                    query.radius_km
                );
                Ok(RankOutcome::Live(collection))
            }
            Err(e) => {
                tracing::warn!(
                    "live ranking around ({}, {}) failed: {}; serving {}",
                    query.lat,
                    query.lng,
                    e,
                    self.fallback.path().display()
                );
                let dataset = self.fallback.load().await?;
                Ok(RankOutcome::Fallback {
                    dataset,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// The live pass. Cell-local failures skip the cell; anything else aborts.
    pub async fn rank_live(&self, query: &HotspotQuery) -> Result<HotspotCollection> {
        let candidates = self
            .spatial
            .nearby_cells(query.lat, query.lng, query.radius_km)
            .await?;
        if candidates.is_empty() {
            return Err(HotspotError::NoRankableResults);
        }

        let forecaster = Arc::clone(&self.forecaster);
        let seq_len = run_blocking(move || forecaster.window()).await?;

        let scored: Vec<Result<Option<RankedCell>>> = stream::iter(candidates)
            .map(|cell_id| self.score_cell(cell_id, seq_len))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut cells = Vec::with_capacity(scored.len());
        for r in scored {
            if let Some(cell) = r? {
                cells.push(cell);
            }
        }

        let ranked = rank_cells(cells, MAX_RESULTS);
        if ranked.is_empty() {
            return Err(HotspotError::NoRankableResults);
        }
        Ok(HotspotCollection::from_ranked(ranked))
    }

    async fn score_cell(&self, cell_id: String, seq_len: usize) -> Result<Option<RankedCell>> {
        let rows = self.history.load_last_weeks(&cell_id, seq_len).await?;
        if rows.len() < seq_len {
            tracing::debug!(
                "skipping {}: {} of {} weeks of history",
                cell_id,
                rows.len(),
                seq_len
            );
            return Ok(None);
        }

        let forecast = match self.forecast_rows(rows).await {
            Ok(f) => f,
            Err(e) if e.is_cell_local() => {
                tracing::warn!("skipping {}: {}", cell_id, e);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let score = mean(&forecast);
        if !score.is_finite() {
            tracing::warn!("skipping {}: non-finite score {}", cell_id, score);
            return Ok(None);
        }

        let polygon = self.spatial.cell_polygon(&cell_id).await?;
        check_ring(&cell_id, &polygon)?;
        let centroid = self.spatial.cell_centroid(&cell_id).await?;

        Ok(Some(RankedCell {
            cell_id,
            score,
            forecast,
            polygon,
            centroid,
        }))
    }

    async fn forecast_rows(&self, rows: Vec<FeatureRow>) -> Result<Vec<f32>> {
        let forecaster = Arc::clone(&self.forecaster);
        run_blocking(move || forecaster.forecast(&rows)).await
    }

    /// History window and forecast for a single cell. Errors surface as-is.
    pub async fn cell_detail(&self, cell_id: &str) -> Result<CellDetail> {
        let centroid = self.spatial.cell_centroid(cell_id).await?;
        let forecaster = Arc::clone(&self.forecaster);
        let seq_len = run_blocking(move || forecaster.window()).await?;

        let history = self.history.load_last_weeks(cell_id, seq_len).await?;
        if history.len() < seq_len {
            return Err(HotspotError::InsufficientHistory {
                needed: seq_len,
                got: history.len(),
            });
        }
        let forecast = self.forecast_rows(history.clone()).await?;
        let score = mean(&forecast);

        Ok(CellDetail {
            cell_id: cell_id.to_string(),
            centroid,
            history,
            forecast: forecast.iter().map(|v| *v as f64).collect(),
            score,
        })
    }
}
