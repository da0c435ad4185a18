use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::{collections::HashSet, fs, path::Path};

fn default_out_len() -> usize {
    4
}

fn default_hidden_size() -> usize {
    64
}

fn default_num_layers() -> usize {
    2
}

#[derive(Deserialize)]
struct MetaJson {
    seq_len: usize,
    input_dim: usize,
    #[serde(default)]
    numeric_cols: Vec<String>,
    #[serde(default)]
    binary_cols: Vec<String>,
    scaler_mean: Option<Vec<f32>>,
    scaler_scale: Option<Vec<f32>>,
    #[serde(default = "default_out_len")]
    out_len: usize,
    #[serde(default = "default_hidden_size")]
    hidden_size: usize,
    #[serde(default = "default_num_layers")]
    num_layers: usize,
}

/// Validated model metadata. Immutable once loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelMeta {
    pub seq_len: usize,
    pub input_dim: usize,
    /// `numeric_cols` followed by `binary_cols`; the order the model was trained on.
    pub feature_order: Vec<String>,
    pub scaler_mean: Vec<f32>,
    /// Zero entries already replaced by 1.0.
    pub scaler_scale: Vec<f32>,
    pub out_len: usize,
    pub hidden_size: usize,
    pub num_layers: usize,
}

impl ModelMeta {
    pub fn load(meta_path: &Path) -> Result<Self> {
        let meta_txt = fs::read_to_string(meta_path)
            .with_context(|| format!("failed to read meta at {}", meta_path.display()))?;
        Self::from_json(&meta_txt)
    }

    pub fn from_json(meta_txt: &str) -> Result<Self> {
        let meta: MetaJson =
            serde_json::from_str(meta_txt).context("failed to parse model meta")?;
        Self::validate(meta)
    }

    fn validate(meta: MetaJson) -> Result<Self> {
        if meta.seq_len == 0 || meta.input_dim == 0 || meta.out_len == 0 {
            bail!(
                "seq_len, input_dim and out_len must be positive (got {}, {}, {})",
                meta.seq_len,
                meta.input_dim,
                meta.out_len
            );
        }
        if meta.hidden_size == 0 || meta.num_layers == 0 {
            bail!("hidden_size and num_layers must be positive");
        }

        let n_cols = meta.numeric_cols.len() + meta.binary_cols.len();
        if n_cols != meta.input_dim {
            bail!(
                "numeric_cols ({}) + binary_cols ({}) != input_dim ({})",
                meta.numeric_cols.len(),
                meta.binary_cols.len(),
                meta.input_dim
            );
        }

        let mut feature_order = meta.numeric_cols;
        feature_order.extend(meta.binary_cols);
        let mut seen = HashSet::with_capacity(feature_order.len());
        for col in &feature_order {
            if !seen.insert(col.as_str()) {
                bail!("duplicate feature column {:?}", col);
            }
        }

        let scaler_mean = meta
            .scaler_mean
            .unwrap_or_else(|| vec![0.0; meta.input_dim]);
        let mut scaler_scale = meta
            .scaler_scale
            .unwrap_or_else(|| vec![1.0; meta.input_dim]);
        if scaler_mean.len() != meta.input_dim || scaler_scale.len() != meta.input_dim {
            bail!(
                "scaler vectors must have input_dim ({}) entries, got mean={} scale={}",
                meta.input_dim,
                scaler_mean.len(),
                scaler_scale.len()
            );
        }
        for s in scaler_scale.iter_mut() {
            if *s == 0.0 {
                *s = 1.0;
            }
        }

        Ok(Self {
            seq_len: meta.seq_len,
            input_dim: meta.input_dim,
            feature_order,
            scaler_mean,
            scaler_scale,
            out_len: meta.out_len,
            hidden_size: meta.hidden_size,
            num_layers: meta.num_layers,
        })
    }
}
