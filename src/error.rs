//! Error kinds for the forecast-and-rank pipeline.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, HotspotError>;

#[derive(Debug, Error)]
pub enum HotspotError {
    /// A cell has fewer weekly rows than the model window. Skipped per cell.
    #[error("need at least {needed} weekly rows, got {got}")]
    InsufficientHistory { needed: usize, got: usize },

    /// Model or metadata failed to load. Permanent for the process lifetime.
    #[error("forecast model unavailable: {0}")]
    ModelUnavailable(String),

    /// The ranking pass retained no candidates.
    #[error("no rankable cells")]
    NoRankableResults,

    /// Spatial index or history source failure.
    #[error("provider error: {0}")]
    Provider(String),

    /// Cell id the spatial index cannot resolve.
    #[error("unknown cell: {0}")]
    UnknownCell(String),

    #[error("invalid geometry for cell {cell_id}: {reason}")]
    InvalidGeometry { cell_id: String, reason: String },

    /// A single forward pass failed (bad output shape, libtorch error).
    #[error("inference failed: {0}")]
    Inference(String),

    /// The static dataset could not be read. Nothing left to fall back to.
    #[error("fallback dataset unavailable at {path}: {source}")]
    FallbackUnavailable {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
}

impl HotspotError {
    /// Errors that only disqualify the current cell rather than the whole pass.
    pub fn is_cell_local(&self) -> bool {
        matches!(
            self,
            HotspotError::InsufficientHistory { .. } | HotspotError::Inference(_)
        )
    }
}
