use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;

use crate::engine::ForecastEngine;
use crate::error::HotspotError;
use crate::ranking::{HotspotRanker, RankOutcome};
use crate::types::{CellDetail, HotspotQuery};

pub const API_PREFIX: &str = "/api/v1";

// ---------- Server state ----------

#[derive(Clone)]
pub struct AppState {
    pub ranker: Arc<HotspotRanker>,
    pub engine: Arc<ForecastEngine>,
}

type ApiError = (StatusCode, Json<serde_json::Value>);

fn api_error(e: HotspotError) -> ApiError {
    let status = match &e {
        HotspotError::UnknownCell(_) => StatusCode::NOT_FOUND,
        HotspotError::InsufficientHistory { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        HotspotError::ModelUnavailable(_) | HotspotError::FallbackUnavailable { .. } => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        HotspotError::Provider(_) | HotspotError::InvalidGeometry { .. } => StatusCode::BAD_GATEWAY,
        HotspotError::NoRankableResults | HotspotError::Inference(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(json!({ "error": e.to_string() })))
}

// ---------- Handlers ----------

pub async fn next_month_hotspots(
    State(state): State<AppState>,
    Query(query): Query<HotspotQuery>,
) -> Result<Response, ApiError> {
    let outcome = state.ranker.rank(&query).await.map_err(|e| {
        tracing::error!("hotspot request failed with no fallback: {}", e);
        api_error(e)
    })?;

    let mut headers = HeaderMap::new();
    headers.insert("x-hotspot-source", HeaderValue::from_static(outcome.source()));
    let body = match outcome {
        RankOutcome::Live(collection) => Json(collection).into_response(),
        RankOutcome::Fallback { dataset, .. } => Json(dataset).into_response(),
    };
    Ok((headers, body).into_response())
}

pub async fn cell_details(
    State(state): State<AppState>,
    Path(cell_id): Path<String>,
) -> Result<Json<CellDetail>, ApiError> {
    state.ranker.cell_detail(&cell_id).await.map(Json).map_err(api_error)
}

pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let load_kind = state.engine.load_kind().map(|k| k.to_string());
    Json(json!({
        "status": "ok",
        "model": state.engine.state().to_string(),
        "load_kind": load_kind,
    }))
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({ "message": "Welcome to the hotspot forecast API" }))
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/health", get(health))
        .route("/hotspots/next-month", get(next_month_hotspots))
        .route("/hotspots/cells/:cell_id", get(cell_details));

    Router::new()
        .route("/", get(root))
        .nest(API_PREFIX, api)
        .with_state(state)
}
