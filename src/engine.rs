//! Lazily initialised forecast service.
//!
//! The model and its metadata load at most once per process, either on the
//! first inference call or through [`ForecastEngine::warm_up`]. Concurrent first
//! callers block on the init lock; after that, readers only clone an `Arc`.
//! A failed load is terminal until restart.

use parking_lot::{Mutex, RwLock};
use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    path::PathBuf,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use crate::error::{HotspotError, Result};
use crate::meta::ModelMeta;
use crate::model::{LoadKind, Model};
use crate::preprocess::input_stats;
use crate::types::FeatureRow;

/// Anything that turns a cell's weekly history into a forecast vector.
pub trait Forecaster: Send + Sync {
    /// Number of weekly rows one forecast consumes.
    fn window(&self) -> Result<usize>;

    fn forecast(&self, rows: &[FeatureRow]) -> Result<Vec<f32>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Loading,
    Ready,
    Failed,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EngineState::Uninitialized => "uninitialized",
            EngineState::Loading => "loading",
            EngineState::Ready => "ready",
            EngineState::Failed => "failed",
        };
        f.write_str(s)
    }
}

enum Slot {
    Uninitialized,
    Loading,
    Ready(Arc<Model>),
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct ModelPaths {
    pub model: PathBuf,
    pub meta: PathBuf,
}

pub struct ForecastEngine {
    paths: ModelPaths,
    slot: RwLock<Slot>,
    init: Mutex<()>,
    load_attempts: AtomicUsize,
    log_inputs: bool,
}

impl ForecastEngine {
    pub fn new(paths: ModelPaths) -> Self {
        Self {
            paths,
            slot: RwLock::new(Slot::Uninitialized),
            init: Mutex::new(()),
            load_attempts: AtomicUsize::new(0),
            log_inputs: std::env::var("LOG_PRED").ok().as_deref() == Some("1"),
        }
    }

    /// Log per-window input statistics before each forward pass.
    pub fn with_input_logging(mut self, enabled: bool) -> Self {
        self.log_inputs = enabled;
        self
    }

    pub fn state(&self) -> EngineState {
        match &*self.slot.read() {
            Slot::Uninitialized => EngineState::Uninitialized,
            Slot::Loading => EngineState::Loading,
            Slot::Ready(_) => EngineState::Ready,
            Slot::Failed(_) => EngineState::Failed,
        }
    }

    /// How many times the load procedure actually ran. Never exceeds 1.
    pub fn load_attempts(&self) -> usize {
        self.load_attempts.load(Ordering::SeqCst)
    }

    /// Load eagerly instead of on the first request.
    pub fn warm_up(&self) -> Result<LoadKind> {
        Ok(self.model()?.kind())
    }

    pub fn load_kind(&self) -> Option<LoadKind> {
        match &*self.slot.read() {
            Slot::Ready(m) => Some(m.kind()),
            _ => None,
        }
    }

    pub fn meta(&self) -> Result<ModelMeta> {
        Ok(self.model()?.meta.clone())
    }

    fn settled(&self) -> Result<Option<Arc<Model>>> {
        match &*self.slot.read() {
            Slot::Ready(m) => Ok(Some(Arc::clone(m))),
            Slot::Failed(msg) => Err(HotspotError::ModelUnavailable(msg.clone())),
            Slot::Uninitialized | Slot::Loading => Ok(None),
        }
    }

    fn model(&self) -> Result<Arc<Model>> {
        if let Some(m) = self.settled()? {
            return Ok(m);
        }

        let _guard = self.init.lock();
        // another caller may have finished while we waited
        if let Some(m) = self.settled()? {
            return Ok(m);
        }

        *self.slot.write() = Slot::Loading;
        self.load_attempts.fetch_add(1, Ordering::SeqCst);
        tracing::info!(
            "loading forecast model {} (meta {})",
            self.paths.model.display(),
            self.paths.meta.display()
        );

        match load_guarded(&self.paths) {
            Ok(model) => {
                tracing::info!(
                    "loaded {} model; seq_len={} input_dim={} out_len={} features={:?}",
                    model.kind(),
                    model.meta.seq_len,
                    model.meta.input_dim,
                    model.meta.out_len,
                    model.meta.feature_order
                );
                let model = Arc::new(model);
                *self.slot.write() = Slot::Ready(Arc::clone(&model));
                Ok(model)
            }
            Err(e) => {
                let msg = format!("{e:#}");
                tracing::error!("forecast model failed to load: {}", msg);
                *self.slot.write() = Slot::Failed(msg.clone());
                Err(HotspotError::ModelUnavailable(msg))
            }
        }
    }
}

/// Libtorch errors surface as panics from the non-`f_` tensor calls; record
/// them as a load failure so the slot never stays `Loading`.
fn load_guarded(paths: &ModelPaths) -> anyhow::Result<Model> {
    panic::catch_unwind(AssertUnwindSafe(|| Model::load(&paths.model, &paths.meta)))
        .unwrap_or_else(|payload| {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(anyhow::anyhow!("model loader panicked: {}", msg))
        })
}

impl Forecaster for ForecastEngine {
    fn window(&self) -> Result<usize> {
        Ok(self.model()?.meta.seq_len)
    }

    fn forecast(&self, rows: &[FeatureRow]) -> Result<Vec<f32>> {
        let model = self.model()?;
        let mat = model.preprocessor.to_matrix(rows)?;

        // Debug signal so we can confirm we're not sending all-zeros
        if self.log_inputs {
            let stats = input_stats(&mat);
            let sample: Vec<String> = model
                .meta
                .feature_order
                .iter()
                .take(6)
                .enumerate()
                .map(|(i, name)| format!("{}={:.3}", name, mat[[mat.nrows() - 1, i]]))
                .collect();
            tracing::info!(
                "window {}x{} nonzero={} mean={:.3} std={:.3} last=[{}]",
                mat.nrows(),
                mat.ncols(),
                stats.nonzero,
                stats.mean,
                stats.std,
                sample.join(", ")
            );
        }

        model
            .predict(&mat)
            .map_err(|e| HotspotError::Inference(format!("{e:#}")))
    }
}
