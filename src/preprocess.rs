use ndarray::Array2;

use crate::error::{HotspotError, Result};
use crate::meta::ModelMeta;
use crate::types::FeatureRow;

/// Turns weekly feature rows into the standardized `(seq_len, input_dim)` window
/// the model was trained on.
#[derive(Debug, Clone)]
pub struct Preprocessor {
    seq_len: usize,
    feature_order: Vec<String>,
    mean: Vec<f32>,
    scale: Vec<f32>,
}

impl Preprocessor {
    pub fn new(meta: &ModelMeta) -> Self {
        Self {
            seq_len: meta.seq_len,
            feature_order: meta.feature_order.clone(),
            mean: meta.scaler_mean.clone(),
            scale: meta.scaler_scale.clone(),
        }
    }

    pub fn feature_order(&self) -> &[String] {
        &self.feature_order
    }

    /// Rows are oldest first. Only the most recent `seq_len` rows are used.
    pub fn to_matrix(&self, rows: &[FeatureRow]) -> Result<Array2<f32>> {
        if rows.len() < self.seq_len {
            return Err(HotspotError::InsufficientHistory {
                needed: self.seq_len,
                got: rows.len(),
            });
        }
        let window = &rows[rows.len() - self.seq_len..];

        let mut mat = Array2::<f32>::zeros((self.seq_len, self.feature_order.len()));
        for (t, row) in window.iter().enumerate() {
            for (c, col) in self.feature_order.iter().enumerate() {
                let raw = row.get(col).copied().unwrap_or(0.0) as f32;
                mat[[t, c]] = (raw - self.mean[c]) / self.scale[c];
            }
        }
        Ok(mat)
    }
}

/// Summary of one input window for the `LOG_PRED` debug signal.
pub(crate) struct InputStats {
    pub nonzero: usize,
    pub mean: f32,
    pub std: f32,
}

pub(crate) fn input_stats(mat: &Array2<f32>) -> InputStats {
    let n = mat.len();
    let nonzero = mat.iter().filter(|x| **x != 0.0).count();
    let mean = if n == 0 { 0.0 } else { mat.sum() / n as f32 };
    let std = if n < 2 {
        0.0
    } else {
        (mat.iter().map(|x| (x - mean) * (x - mean)).sum::<f32>() / n as f32).sqrt()
    };
    InputStats { nonzero, mean, std }
}
