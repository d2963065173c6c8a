use serde::Deserialize;
use std::{fs, path::PathBuf};

use crate::forest::ForestParams;

/// Service settings, read from the environment.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub artifacts_dir: PathBuf,
    pub bind_addr: String,
    pub port: u16,
    /// `LOG_PRED=1`: log every prediction's features and result.
    pub log_predictions: bool,
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            artifacts_dir: get("ARTIFACTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("models")),
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: get("PORT").and_then(|s| s.parse().ok()).unwrap_or(5001),
            log_predictions: get("LOG_PRED").as_deref() == Some("1"),
        }
    }
}

/// Offline training settings. Hyperparameters can be overridden by a JSON
/// file named in `TRAIN_CONFIG`; absent keys keep their defaults.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct TrainConfig {
    pub data_path: PathBuf,
    pub artifacts_dir: PathBuf,
    pub test_fraction: f64,
    pub split_seed: u64,
    pub forest: ForestParams,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("data/cars_data.csv"),
            artifacts_dir: PathBuf::from("models"),
            test_fraction: 0.2,
            split_seed: 42,
            forest: ForestParams::default(),
        }
    }
}

impl TrainConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read train config {}: {}", path, e))?;
        let cfg: Self = serde_json::from_str(&data)
            .map_err(|e| anyhow::anyhow!("invalid train config JSON {}: {}", path, e))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// `TRAIN_CONFIG` file first, then `DATA_PATH` / `ARTIFACTS_DIR` on top.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut cfg = match std::env::var("TRAIN_CONFIG") {
            Ok(path) => Self::load(&path)?,
            Err(_) => Self::default(),
        };
        if let Ok(p) = std::env::var("DATA_PATH") {
            cfg.data_path = PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("ARTIFACTS_DIR") {
            cfg.artifacts_dir = PathBuf::from(p);
        }
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !(0.0..1.0).contains(&self.test_fraction) {
            anyhow::bail!("test_fraction must be in [0, 1), got {}", self.test_fraction);
        }
        if self.forest.n_trees == 0 {
            anyhow::bail!("forest.n_trees must be at least 1");
        }
        Ok(())
    }
}
