use anyhow::{bail, Context};
use serde::{de::IgnoredAny, Deserialize};
use serde_json::value::RawValue;
use std::path::{Path, PathBuf};

use crate::error::{HotspotError, Result};

/// Serves the precomputed hotspot collection shipped with the service.
#[derive(Debug, Clone)]
pub struct FallbackSupplier {
    path: PathBuf,
}

// Just enough structure to reject files that are not a feature collection.
#[derive(Deserialize)]
struct CollectionShape {
    #[serde(rename = "type")]
    kind: String,
    features: Vec<IgnoredAny>,
}

impl FallbackSupplier {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read on every call; the file is small and may be replaced on disk.
    /// The document is returned as stored, not re-encoded.
    pub async fn load(&self) -> Result<Box<RawValue>> {
        let read = async {
            let data = tokio::fs::read_to_string(&self.path)
                .await
                .context("failed to read fallback file")?;
            let shape: CollectionShape =
                serde_json::from_str(&data).context("fallback file is not a GeoJSON object")?;
            if shape.kind != "FeatureCollection" {
                bail!("fallback file has type {:?}, expected FeatureCollection", shape.kind);
            }
            tracing::debug!("fallback dataset has {} features", shape.features.len());
            RawValue::from_string(data).context("fallback file is not valid JSON")
        };
        read.await.map_err(|source| HotspotError::FallbackUnavailable {
            path: self.path.clone(),
            source,
        })
    }
}
