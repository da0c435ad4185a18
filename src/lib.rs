//! Ranks H3 cells around a point by LSTM-forecast commercial activity, with a
//! static fallback dataset when the live pipeline produces nothing usable.

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod fallback;
pub mod history;
pub mod meta;
pub mod model;
pub mod preprocess;
pub mod ranking;
pub mod spatial;
pub mod types;

pub use engine::{EngineState, ForecastEngine, Forecaster, ModelPaths};
pub use error::{HotspotError, Result};
pub use ranking::{HotspotRanker, RankOutcome, MAX_RESULTS};
