use async_trait::async_trait;
use h3o::{CellIndex, LatLng, Resolution};
use std::str::FromStr;

use crate::error::{HotspotError, Result};
use crate::types::{Centroid, Ring};

/// Resolves a query circle into cells, and cells into geometry.
#[async_trait]
pub trait SpatialIndex: Send + Sync {
    /// Deterministic for identical inputs. May be empty.
    async fn nearby_cells(&self, lat: f64, lng: f64, radius_km: f64) -> Result<Vec<String>>;

    /// Closed ring of `[lng, lat]` vertices.
    async fn cell_polygon(&self, cell_id: &str) -> Result<Ring>;

    async fn cell_centroid(&self, cell_id: &str) -> Result<Centroid>;
}

// Bounds the grid disk for absurd radii.
const MAX_RING_K: u32 = 64;

/// H3 hexagon grid at a fixed resolution.
#[derive(Debug, Clone)]
pub struct H3Index {
    resolution: Resolution,
    max_cells: usize,
}

impl H3Index {
    pub fn new(resolution: u8, max_cells: usize) -> Result<Self> {
        let resolution = Resolution::try_from(resolution)
            .map_err(|e| HotspotError::Provider(format!("invalid H3 resolution: {e}")))?;
        Ok(Self {
            resolution,
            max_cells,
        })
    }

    fn parse(cell_id: &str) -> Result<CellIndex> {
        CellIndex::from_str(cell_id).map_err(|_| HotspotError::UnknownCell(cell_id.to_string()))
    }

    /// Cells whose centroid lies within `radius_km`, nearest first (ties by id).
    pub fn cells_within(&self, lat: f64, lng: f64, radius_km: f64) -> Result<Vec<CellIndex>> {
        if !radius_km.is_finite() || radius_km <= 0.0 {
            return Err(HotspotError::Provider(format!(
                "radius_km must be positive, got {radius_km}"
            )));
        }
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
            return Err(HotspotError::Provider(format!(
                "coordinate out of range: ({lat}, {lng})"
            )));
        }
        let center = LatLng::new(lat, lng)
            .map_err(|e| HotspotError::Provider(format!("invalid coordinate ({lat}, {lng}): {e}")))?;
        let origin = center.to_cell(self.resolution);

        // Neighbouring centers sit sqrt(3) edge lengths apart, and a k-disk only
        // reaches k * spacing * sqrt(3)/2 along its flat sides: 1.5 edges per ring.
        let reach_per_ring_km = self.resolution.edge_length_km() * 1.5;
        let k = ((radius_km / reach_per_ring_km).ceil() as u32 + 1).min(MAX_RING_K);

        let mut cells: Vec<(f64, CellIndex)> = origin
            .grid_disk::<Vec<_>>(k)
            .into_iter()
            .map(|cell| (center.distance_km(LatLng::from(cell)), cell))
            .filter(|(d, _)| *d <= radius_km)
            .collect();
        cells.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        if cells.len() > self.max_cells {
            tracing::warn!(
                "{} cells within {}km of ({}, {}); keeping the nearest {}",
                cells.len(),
                radius_km,
                lat,
                lng,
                self.max_cells
            );
            cells.truncate(self.max_cells);
        }
        Ok(cells.into_iter().map(|(_, cell)| cell).collect())
    }

    pub fn ring(&self, cell_id: &str) -> Result<Ring> {
        let cell = Self::parse(cell_id)?;
        let mut ring: Ring = cell
            .boundary()
            .iter()
            .map(|ll| [ll.lng(), ll.lat()])
            .collect();
        if let Some(first) = ring.first().copied() {
            ring.push(first);
        }
        Ok(ring)
    }

    pub fn centroid(&self, cell_id: &str) -> Result<Centroid> {
        let ll = LatLng::from(Self::parse(cell_id)?);
        Ok(Centroid {
            lat: ll.lat(),
            lng: ll.lng(),
        })
    }
}

#[async_trait]
impl SpatialIndex for H3Index {
    async fn nearby_cells(&self, lat: f64, lng: f64, radius_km: f64) -> Result<Vec<String>> {
        Ok(self
            .cells_within(lat, lng, radius_km)?
            .into_iter()
            .map(|cell| cell.to_string())
            .collect())
    }

    async fn cell_polygon(&self, cell_id: &str) -> Result<Ring> {
        self.ring(cell_id)
    }

    async fn cell_centroid(&self, cell_id: &str) -> Result<Centroid> {
        self.centroid(cell_id)
    }
}

/// A ring is usable when it has at least three distinct vertices, is closed,
/// and every coordinate is a finite lng/lat.
pub fn check_ring(cell_id: &str, ring: &Ring) -> Result<()> {
    let bad = |reason: &str| HotspotError::InvalidGeometry {
        cell_id: cell_id.to_string(),
        reason: reason.to_string(),
    };
    if ring.len() < 4 {
        return Err(bad("ring needs at least 4 vertices"));
    }
    if ring.first() != ring.last() {
        return Err(bad("ring is not closed"));
    }
    let in_range = |[x, y]: &[f64; 2]| {
        x.is_finite() && y.is_finite() && x.abs() <= 180.0 && y.abs() <= 90.0
    };
    if !ring.iter().all(in_range) {
        return Err(bad("vertex outside lng/lat range"));
    }
    Ok(())
}
