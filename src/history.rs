use anyhow::{Context, Result as AnyResult};
use async_trait::async_trait;
use std::{collections::HashMap, fs, path::Path};

use crate::error::Result;
use crate::types::FeatureRow;

/// Weekly feature rows per cell, produced upstream.
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// At most `weeks` most recent rows, oldest first. Short or empty when the
    /// cell lacks history; never padded.
    async fn load_last_weeks(&self, cell_id: &str, weeks: usize) -> Result<Vec<FeatureRow>>;
}

/// History snapshot read from a JSON document of the form
/// `{ "<cell_id>": [ { "<column>": value, ... }, ... ] }`, rows oldest first.
#[derive(Debug, Default, Clone)]
pub struct JsonHistoryStore {
    cells: HashMap<String, Vec<FeatureRow>>,
}

impl JsonHistoryStore {
    pub fn open(path: &Path) -> AnyResult<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read feature history at {}", path.display()))?;
        let cells: HashMap<String, Vec<FeatureRow>> = serde_json::from_str(&data)
            .with_context(|| format!("invalid feature history JSON in {}", path.display()))?;
        tracing::info!("loaded feature history for {} cells", cells.len());
        Ok(Self { cells })
    }

    pub fn from_map(cells: HashMap<String, Vec<FeatureRow>>) -> Self {
        Self { cells }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

#[async_trait]
impl HistorySource for JsonHistoryStore {
    async fn load_last_weeks(&self, cell_id: &str, weeks: usize) -> Result<Vec<FeatureRow>> {
        let rows = match self.cells.get(cell_id) {
            Some(rows) => rows,
            None => return Ok(Vec::new()),
        };
        let start = rows.len().saturating_sub(weeks);
        Ok(rows[start..].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn week(v: f64) -> FeatureRow {
        [("visits".to_string(), v)].into_iter().collect()
    }

    #[tokio::test]
    async fn returns_most_recent_rows_oldest_first() {
        let store = JsonHistoryStore::from_map(
            [("c1".to_string(), (1..=5).map(|v| week(v as f64)).collect())]
                .into_iter()
                .collect(),
        );
        let rows = store.load_last_weeks("c1", 3).await.unwrap();
        let visits: Vec<f64> = rows.iter().map(|r| r["visits"]).collect();
        assert_eq!(visits, vec![3.0, 4.0, 5.0]);
    }

    #[tokio::test]
    async fn short_and_unknown_cells_are_not_padded() {
        let store = JsonHistoryStore::from_map(
            [("c1".to_string(), vec![week(1.0)])].into_iter().collect(),
        );
        assert_eq!(store.load_last_weeks("c1", 4).await.unwrap().len(), 1);
        assert!(store.load_last_weeks("nope", 4).await.unwrap().is_empty());
    }

    #[test]
    fn open_reads_json_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        fs::write(&path, r#"{"c1": [{"visits": 1.0}, {"visits": 2.0, "is_event": 1}]}"#).unwrap();
        let store = JsonHistoryStore::open(&path).unwrap();
        assert_eq!(store.len(), 1);

        fs::write(&path, "[1, 2").unwrap();
        assert!(JsonHistoryStore::open(&path).is_err());
    }
}
