#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
};
use tch::{kind::Kind, nn, CModule, Device, Tensor};

use hotspot_forecast::{
    error::{HotspotError, Result},
    meta::ModelMeta,
    model::LstmNet,
    spatial::SpatialIndex,
    types::{Centroid, FeatureRow, Ring},
    Forecaster,
};

pub const COLUMNS: [&str; 5] = ["card_sales", "visitors", "new_stores", "is_holiday_week", "has_festival"];

/// Meta document with 3 numeric + 2 binary columns.
pub fn meta_doc(seq_len: usize, out_len: usize) -> Value {
    json!({
        "seq_len": seq_len,
        "input_dim": 5,
        "numeric_cols": ["card_sales", "visitors", "new_stores"],
        "binary_cols": ["is_holiday_week", "has_festival"],
        "scaler_mean": [100.0, 50.0, 2.0, 0.0, 0.0],
        "scaler_scale": [20.0, 10.0, 0.0, 1.0, 1.0],
        "out_len": out_len,
        "hidden_size": 8,
        "num_layers": 2
    })
}

/// Identity scaler, handy when asserting raw values come through.
pub fn identity_meta_doc(seq_len: usize, out_len: usize) -> Value {
    let mut doc = meta_doc(seq_len, out_len);
    doc["scaler_mean"] = json!([0.0, 0.0, 0.0, 0.0, 0.0]);
    doc["scaler_scale"] = json!([1.0, 1.0, 1.0, 1.0, 1.0]);
    doc
}

pub fn write_meta(dir: &Path, doc: &Value) -> PathBuf {
    let path = dir.join("model_meta.json");
    fs::write(&path, doc.to_string()).unwrap();
    path
}

/// Named-tensor archive for an `LstmNet` built from `doc`.
pub fn write_structural_artifact(dir: &Path, doc: &Value) -> PathBuf {
    let meta = ModelMeta::from_json(&doc.to_string()).unwrap();
    let vs = nn::VarStore::new(Device::Cpu);
    let _net = LstmNet::new(&vs.root(), &meta);
    let path = dir.join("best_lstm.ot");
    vs.save(&path).unwrap();
    path
}

/// Freshly initialised `LstmNet` parameters for `doc`, sorted by name.
pub fn structural_tensors(doc: &Value) -> Vec<(String, Tensor)> {
    let meta = ModelMeta::from_json(&doc.to_string()).unwrap();
    let vs = nn::VarStore::new(Device::Cpu);
    let _net = LstmNet::new(&vs.root(), &meta);
    let mut named: Vec<(String, Tensor)> = vs
        .variables()
        .into_iter()
        .map(|(name, t)| (name, t.detach().copy()))
        .collect();
    named.sort_by(|a, b| a.0.cmp(&b.0));
    named
}

/// Writes `tensors` under `prefix`-ed names; `.safetensors` file names get
/// the safetensors format, anything else a libtorch archive.
pub fn write_named_artifact(
    dir: &Path,
    file_name: &str,
    tensors: &[(String, Tensor)],
    prefix: &str,
) -> PathBuf {
    let path = dir.join(file_name);
    let named: Vec<(String, &Tensor)> = tensors
        .iter()
        .map(|(name, t)| (format!("{prefix}{name}"), t))
        .collect();
    if file_name.ends_with(".safetensors") {
        Tensor::write_safetensors(&named, &path).unwrap();
    } else {
        Tensor::save_multi(&named, &path).unwrap();
    }
    path
}

/// TorchScript module that averages the window over time and keeps the first
/// `out_len` features: [1, T, F] -> [1, out_len].
pub fn write_traced_artifact(dir: &Path, seq_len: usize, input_dim: usize, out_len: usize) -> PathBuf {
    let out_len = out_len as i64;
    let mut closure = move |xs: &[Tensor]| {
        vec![xs[0].mean_dim(&[1i64][..], false, Kind::Float).narrow(1, 0, out_len)]
    };
    let example = Tensor::ones([1, seq_len as i64, input_dim as i64], (Kind::Float, Device::Cpu));
    let module =
        CModule::create_by_tracing("HotspotOpaque", "forward", &[example], &mut closure).unwrap();
    let path = dir.join("best_lstm.pt");
    module.save(&path).unwrap();
    path
}

pub fn row(pairs: &[(&str, f64)]) -> FeatureRow {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

/// `weeks` rows where every column is `base + week index`.
pub fn history(weeks: usize, base: f64) -> Vec<FeatureRow> {
    (0..weeks)
        .map(|w| COLUMNS.iter().map(|c| (c.to_string(), base + w as f64)).collect())
        .collect()
}

/// Rows for `StubForecaster`: the last row's `signal` becomes the forecast.
pub fn signal_history(weeks: usize, signal: f64) -> Vec<FeatureRow> {
    (0..weeks).map(|_| row(&[("signal", signal)])).collect()
}

pub fn square(lat: f64, lng: f64) -> Ring {
    let d = 0.001;
    vec![
        [lng - d, lat - d],
        [lng + d, lat - d],
        [lng + d, lat + d],
        [lng - d, lat + d],
        [lng - d, lat - d],
    ]
}

/// Fixed candidate list; every id resolves to a small square.
pub struct FixedCells {
    pub ids: Vec<String>,
}

impl FixedCells {
    pub fn new(ids: &[&str]) -> Self {
        Self {
            ids: ids.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn position(&self, cell_id: &str) -> Result<usize> {
        self.ids
            .iter()
            .position(|c| c == cell_id)
            .ok_or_else(|| HotspotError::UnknownCell(cell_id.to_string()))
    }
}

#[async_trait]
impl SpatialIndex for FixedCells {
    async fn nearby_cells(&self, _lat: f64, _lng: f64, _radius_km: f64) -> Result<Vec<String>> {
        Ok(self.ids.clone())
    }

    async fn cell_polygon(&self, cell_id: &str) -> Result<Ring> {
        let c = self.cell_centroid(cell_id).await?;
        Ok(square(c.lat, c.lng))
    }

    async fn cell_centroid(&self, cell_id: &str) -> Result<Centroid> {
        let i = self.position(cell_id)? as f64;
        Ok(Centroid {
            lat: 36.6 + 0.002 * i,
            lng: 127.45 + 0.002 * i,
        })
    }
}

/// Cells whose polygon lookup returns an open ring.
pub struct BrokenGeometry(pub FixedCells);

#[async_trait]
impl SpatialIndex for BrokenGeometry {
    async fn nearby_cells(&self, lat: f64, lng: f64, radius_km: f64) -> Result<Vec<String>> {
        self.0.nearby_cells(lat, lng, radius_km).await
    }

    async fn cell_polygon(&self, _cell_id: &str) -> Result<Ring> {
        Ok(vec![[127.0, 36.0], [127.1, 36.0], [127.1, 36.1]])
    }

    async fn cell_centroid(&self, cell_id: &str) -> Result<Centroid> {
        self.0.cell_centroid(cell_id).await
    }
}

pub struct FailingHistory;

#[async_trait]
impl hotspot_forecast::history::HistorySource for FailingHistory {
    async fn load_last_weeks(&self, cell_id: &str, _weeks: usize) -> Result<Vec<FeatureRow>> {
        Err(HotspotError::Provider(format!("history backend unreachable for {cell_id}")))
    }
}

/// Forecast = `out_len` copies of the last row's `signal` column.
pub struct StubForecaster {
    pub seq_len: usize,
    pub out_len: usize,
    pub calls: AtomicUsize,
}

impl StubForecaster {
    pub fn new(seq_len: usize, out_len: usize) -> Self {
        Self {
            seq_len,
            out_len,
            calls: AtomicUsize::new(0),
        }
    }
}

impl Forecaster for StubForecaster {
    fn window(&self) -> Result<usize> {
        Ok(self.seq_len)
    }

    fn forecast(&self, rows: &[FeatureRow]) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let signal = rows
            .last()
            .and_then(|r| r.get("signal"))
            .copied()
            .unwrap_or(0.0);
        if signal.is_nan() {
            return Err(HotspotError::Inference("stub refuses NaN".into()));
        }
        Ok(vec![signal as f32; self.out_len])
    }
}

pub struct UnavailableForecaster;

impl Forecaster for UnavailableForecaster {
    fn window(&self) -> Result<usize> {
        Err(HotspotError::ModelUnavailable("weights missing".into()))
    }

    fn forecast(&self, _rows: &[FeatureRow]) -> Result<Vec<f32>> {
        Err(HotspotError::ModelUnavailable("weights missing".into()))
    }
}

pub fn history_map(entries: Vec<(&str, Vec<FeatureRow>)>) -> HashMap<String, Vec<FeatureRow>> {
    entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

/// Static dataset with two features. Carries keys and literals a typed
/// round-trip would lose: top-level `name`, feature `id`, integer score,
/// empty forecast, null centroid, extra annotations.
pub fn fallback_doc() -> Value {
    json!({
        "type": "FeatureCollection",
        "name": "next_month_hotspots",
        "features": [
            {
                "type": "Feature",
                "id": 1,
                "geometry": { "type": "Polygon", "coordinates": [square(36.64, 127.49)] },
                "properties": {
                    "cell_id": "static-01",
                    "score": 1,
                    "forecast": [],
                    "centroid": null,
                    "target_month": "2025-10",
                    "lift": 1.41
                }
            },
            {
                "type": "Feature",
                "id": 2,
                "geometry": { "type": "Polygon", "coordinates": [square(36.61, 127.45)] },
                "properties": {
                    "cell_id": "static-02",
                    "score": 0.55,
                    "forecast": [0.5, 0.55, 0.57, 0.58],
                    "centroid": { "lat": 36.61, "lng": 127.45 }
                }
            }
        ]
    })
}

pub fn write_fallback(dir: &Path) -> PathBuf {
    let path = dir.join("dummy_hotspots.json");
    fs::write(&path, serde_json::to_string_pretty(&fallback_doc()).unwrap()).unwrap();
    path
}
