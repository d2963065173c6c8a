//! The persisted artifact bundle: forest, four encoders and the dataset index.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::encoder::{EncodeError, EncoderFileError, EncoderSet};
use crate::forest::{ForestError, RandomForest};
use crate::index::{DatasetIndex, IndexError};

pub const MODEL_FILE: &str = "car_price_model.json";
pub const DATASET_INFO_FILE: &str = "dataset_info.json";

/// Column order of the feature vector the forest is trained on.
pub const FEATURE_NAMES: [&str; 5] = [
    "brand_encoded",
    "model_encoded",
    "year",
    "fuel_encoded",
    "transmission_encoded",
];

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error(transparent)]
    Model(#[from] ForestError),
    #[error(transparent)]
    Encoder(#[from] EncoderFileError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error("failed to create artifacts directory {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("model expects {got} features, expected {}", FEATURE_NAMES.len())]
    FeatureCount { got: usize },
}

/// Everything the service needs to validate, encode and predict. Loaded and
/// replaced as a unit.
#[derive(Debug, Clone)]
pub struct Artifacts {
    pub model: RandomForest,
    pub encoders: EncoderSet,
    pub index: DatasetIndex,
}

impl Artifacts {
    pub fn load(dir: &Path) -> Result<Self, ArtifactError> {
        let model = RandomForest::load(&dir.join(MODEL_FILE))?;
        if model.n_features() != FEATURE_NAMES.len() {
            return Err(ArtifactError::FeatureCount {
                got: model.n_features(),
            });
        }
        let encoders = EncoderSet::load(dir)?;
        let index = DatasetIndex::load(&dir.join(DATASET_INFO_FILE))?;

        tracing::info!(
            "loaded artifacts from {}: {} trees, {} brands, {} models",
            dir.display(),
            model.n_trees(),
            index.brands.len(),
            index.models_count()
        );
        Ok(Self {
            model,
            encoders,
            index,
        })
    }

    pub fn save(&self, dir: &Path) -> Result<(), ArtifactError> {
        fs::create_dir_all(dir).map_err(|source| ArtifactError::CreateDir {
            path: dir.display().to_string(),
            source,
        })?;
        self.model.save(&dir.join(MODEL_FILE))?;
        self.encoders.save(dir)?;
        self.index.save(&dir.join(DATASET_INFO_FILE))?;
        Ok(())
    }

    /// Encodes the categorical fields and lays out the feature vector in
    /// `FEATURE_NAMES` order.
    pub fn features(
        &self,
        brand: &str,
        model: &str,
        year: i32,
        fuel_type: &str,
        transmission: &str,
    ) -> Result<[f64; 5], EncodeError> {
        let (b, m, f, t) = self.encoders.encode(brand, model, fuel_type, transmission)?;
        Ok(feature_row(b, m, year, f, t))
    }
}

pub fn feature_row(brand: usize, model: usize, year: i32, fuel: usize, transmission: usize) -> [f64; 5] {
    [
        brand as f64,
        model as f64,
        year as f64,
        fuel as f64,
        transmission as f64,
    ]
}
