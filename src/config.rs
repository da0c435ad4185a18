use anyhow::{Context, Result};
use serde::Deserialize;
use std::{fs, path::{Path, PathBuf}};

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ServiceConfig {
    pub model_path: PathBuf,
    pub meta_path: PathBuf,
    pub fallback_path: PathBuf,
    pub history_path: PathBuf,
    pub port: u16,
    pub h3_resolution: u8,
    pub max_cells: usize,
    pub cell_concurrency: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/best_lstm.ot"),
            meta_path: PathBuf::from("models/model_meta.json"),
            fallback_path: PathBuf::from("data/dummy_hotspots.json"),
            history_path: PathBuf::from("data/feature_history.json"),
            port: 8080,
            h3_resolution: 9,
            max_cells: 1000,
            cell_concurrency: 8,
        }
    }
}

impl ServiceConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("config file not found: {}", path.display()))?;
        serde_json::from_str(&data)
            .with_context(|| format!("invalid config JSON in {}", path.display()))
    }

    /// `CONFIG_PATH` (optional JSON file) first, then individual env overrides.
    pub fn from_env() -> Result<Self> {
        let mut cfg = match std::env::var("CONFIG_PATH") {
            Ok(p) => Self::load(Path::new(&p))?,
            Err(_) => Self::default(),
        };
        cfg.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(cfg)
    }

    pub fn apply_overrides<F>(&mut self, get: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = get("MODEL_PATH") {
            self.model_path = v.into();
        }
        if let Some(v) = get("META_PATH") {
            self.meta_path = v.into();
        }
        if let Some(v) = get("FALLBACK_PATH") {
            self.fallback_path = v.into();
        }
        if let Some(v) = get("HISTORY_PATH") {
            self.history_path = v.into();
        }
        if let Some(v) = get("PORT") {
            self.port = v.parse().with_context(|| format!("invalid PORT {:?}", v))?;
        }
        if let Some(v) = get("H3_RESOLUTION") {
            self.h3_resolution = v
                .parse()
                .with_context(|| format!("invalid H3_RESOLUTION {:?}", v))?;
        }
        if let Some(v) = get("MAX_CELLS") {
            self.max_cells = v.parse().with_context(|| format!("invalid MAX_CELLS {:?}", v))?;
        }
        if let Some(v) = get("CELL_CONCURRENCY") {
            self.cell_concurrency = v
                .parse()
                .with_context(|| format!("invalid CELL_CONCURRENCY {:?}", v))?;
        }
        Ok(())
    }
}
