use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One week of named observations for one cell. Absent columns read as 0.0.
pub type FeatureRow = HashMap<String, f64>;

/// Closed ring of `[lng, lat]` vertices.
pub type Ring = Vec<[f64; 2]>;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Centroid {
    pub lat: f64,
    pub lng: f64,
}

fn default_radius_km() -> f64 {
    5.0
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct HotspotQuery {
    pub lat: f64,
    pub lng: f64,
    #[serde(default = "default_radius_km")]
    pub radius_km: f64,
}

/// A scored cell, alive only for response assembly.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedCell {
    pub cell_id: String,
    pub score: f64,
    pub forecast: Vec<f32>,
    pub polygon: Ring,
    pub centroid: Centroid,
}

// ---------- GeoJSON response ----------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HotspotCollection {
    #[serde(rename = "type")]
    pub kind: String,
    pub features: Vec<HotspotFeature>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HotspotFeature {
    #[serde(rename = "type")]
    pub kind: String,
    pub geometry: PolygonGeometry,
    pub properties: HotspotProperties,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolygonGeometry {
    #[serde(rename = "type")]
    pub kind: String,
    pub coordinates: Vec<Ring>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HotspotProperties {
    pub cell_id: String,
    pub score: f64,
    pub forecast: Vec<f64>,
    pub centroid: Centroid,
}

impl HotspotCollection {
    pub fn from_ranked(cells: Vec<RankedCell>) -> Self {
        let features = cells.into_iter().map(HotspotFeature::from).collect();
        Self {
            kind: "FeatureCollection".to_string(),
            features,
        }
    }
}

impl From<RankedCell> for HotspotFeature {
    fn from(cell: RankedCell) -> Self {
        Self {
            kind: "Feature".to_string(),
            geometry: PolygonGeometry {
                kind: "Polygon".to_string(),
                coordinates: vec![cell.polygon],
            },
            properties: HotspotProperties {
                cell_id: cell.cell_id,
                score: cell.score,
                forecast: cell.forecast.iter().map(|v| *v as f64).collect(),
                centroid: cell.centroid,
            },
        }
    }
}

/// Per-cell detail: recent history plus the forecast it produces.
#[derive(Debug, Clone, Serialize)]
pub struct CellDetail {
    pub cell_id: String,
    pub centroid: Centroid,
    pub history: Vec<FeatureRow>,
    pub forecast: Vec<f64>,
    pub score: f64,
}
